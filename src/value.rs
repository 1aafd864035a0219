use std::str::FromStr;

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde_json::{Map, Number, Value};

/// Reads a JSON number, or a numeric string, as an exact decimal.
pub fn as_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(number) => number_to_decimal(number),
        Value::String(text) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                return None;
            }
            Decimal::from_str(trimmed)
                .or_else(|_| Decimal::from_scientific(trimmed))
                .ok()
        }
        _ => None,
    }
}

fn number_to_decimal(number: &Number) -> Option<Decimal> {
    if let Some(integer) = number.as_i64() {
        return Some(Decimal::from(integer));
    }
    if let Some(unsigned) = number.as_u64() {
        return Some(Decimal::from(unsigned));
    }
    let text = number.to_string();
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
}

pub fn decimal_from_f64(value: f64) -> Option<Decimal> {
    if !value.is_finite() {
        return None;
    }
    Decimal::from_str(&value.to_string()).ok()
}

/// Integral decimals become JSON integers; everything else an `f64` number.
pub fn decimal_to_value(decimal: Decimal) -> Value {
    let normalized = decimal.normalize();
    if normalized.scale() == 0 {
        if let Some(integer) = normalized.to_i64() {
            return Value::from(integer);
        }
    }
    normalized
        .to_f64()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

/// Empty in the sense of "nothing entered": null, blank strings, empty lists and maps.
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(text) => text.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

/// Copies only `keys` out of an object value; non-objects pass through unchanged.
pub fn pick_keys(value: &Value, keys: &[String]) -> Value {
    let Value::Object(map) = value else {
        return value.clone();
    };
    let picked = keys
        .iter()
        .filter_map(|key| map.get(key).map(|entry| (key.clone(), entry.clone())))
        .collect::<Map<String, Value>>();
    Value::Object(picked)
}
