use std::sync::{Arc, LazyLock};

use regex::Regex;
use rust_decimal::Decimal;
use serde_json::Value;

use super::ValidatorFn;
use crate::error::ValidationError;
use crate::value::{as_decimal, is_empty_value};

static EMAIL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern compiles")
});

pub fn required() -> ValidatorFn {
    Arc::new(|value: &Value| {
        is_empty_value(value).then(|| ValidationError::new("required", "This field is required"))
    })
}

pub fn min(min: impl Into<Decimal>) -> ValidatorFn {
    let min = min.into();
    Arc::new(move |value: &Value| {
        let actual = as_decimal(value)?;
        (actual < min).then(|| {
            ValidationError::new("min", format!("Must be at least {min}"))
                .with_param("min", min.to_string())
                .with_param("actual", actual.to_string())
        })
    })
}

pub fn max(max: impl Into<Decimal>) -> ValidatorFn {
    let max = max.into();
    Arc::new(move |value: &Value| {
        let actual = as_decimal(value)?;
        (actual > max).then(|| {
            ValidationError::new("max", format!("Must be at most {max}"))
                .with_param("max", max.to_string())
                .with_param("actual", actual.to_string())
        })
    })
}

fn length_of(value: &Value) -> Option<usize> {
    match value {
        Value::String(text) => Some(text.chars().count()),
        Value::Array(items) => Some(items.len()),
        _ => None,
    }
}

pub fn min_length(min: usize) -> ValidatorFn {
    Arc::new(move |value: &Value| {
        let length = length_of(value)?;
        (length < min).then(|| {
            ValidationError::new("minLength", format!("Must contain at least {min} characters"))
                .with_param("requiredLength", min)
                .with_param("actualLength", length)
        })
    })
}

pub fn max_length(max: usize) -> ValidatorFn {
    Arc::new(move |value: &Value| {
        let length = length_of(value)?;
        (length > max).then(|| {
            ValidationError::new("maxLength", format!("Must contain at most {max} characters"))
                .with_param("requiredLength", max)
                .with_param("actualLength", length)
        })
    })
}

pub fn pattern(regex: Regex) -> ValidatorFn {
    Arc::new(move |value: &Value| {
        let text = value.as_str().filter(|text| !text.is_empty())?;
        (!regex.is_match(text)).then(|| {
            ValidationError::new("pattern", "Invalid format")
                .with_param("pattern", regex.as_str().to_string())
        })
    })
}

pub fn email() -> ValidatorFn {
    Arc::new(|value: &Value| {
        let text = value.as_str().filter(|text| !text.is_empty())?;
        (!EMAIL_PATTERN.is_match(text))
            .then(|| ValidationError::new("email", "Invalid email address"))
    })
}

/// Replaces the message of whatever error `validator` produces.
pub fn with_message(validator: ValidatorFn, message: impl Into<String>) -> ValidatorFn {
    let message = message.into();
    Arc::new(move |value: &Value| {
        validator(value).map(|mut error| {
            error.message = message.clone();
            error
        })
    })
}
