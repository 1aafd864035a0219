mod typed;

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde_json::{Map, Value};

use crate::error::{FormError, FormResult};
use crate::node::FormNode;

pub use typed::{ArrayPath, AsFieldPath, Path, PathHandle, PathNode};

#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// Address of a node relative to some root group, e.g. `orders[0].items[1].price`.
#[derive(Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct FieldPath {
    segments: Vec<PathSegment>,
}

impl FieldPath {
    pub const fn root() -> Self {
        Self {
            segments: Vec::new(),
        }
    }

    pub fn parse(input: &str) -> FormResult<Self> {
        let invalid = |reason| FormError::InvalidPath {
            path: input.to_string(),
            reason,
        };

        let mut segments = Vec::new();
        if input.is_empty() {
            return Ok(Self { segments });
        }

        for part in input.split('.') {
            let (key, mut rest) = match part.find('[') {
                Some(open) => (&part[..open], &part[open..]),
                None => (part, ""),
            };
            if key.is_empty() && (rest.is_empty() || !segments.is_empty()) {
                return Err(invalid("empty key"));
            }
            if key.contains(']') {
                return Err(invalid("unexpected `]`"));
            }
            if !key.is_empty() {
                segments.push(PathSegment::Key(key.to_string()));
            }
            while !rest.is_empty() {
                let Some(stripped) = rest.strip_prefix('[') else {
                    return Err(invalid("expected `[` after index"));
                };
                let Some(close) = stripped.find(']') else {
                    return Err(invalid("unclosed `[`"));
                };
                let index = stripped[..close]
                    .parse::<usize>()
                    .map_err(|_| invalid("index must be a non-negative integer"))?;
                segments.push(PathSegment::Index(index));
                rest = &stripped[close + 1..];
            }
        }
        Ok(Self { segments })
    }

    pub fn child(&self, key: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(PathSegment::Key(key.into()));
        Self { segments }
    }

    pub fn index(&self, index: usize) -> Self {
        let mut segments = self.segments.clone();
        segments.push(PathSegment::Index(index));
        Self { segments }
    }

    pub fn join(&self, other: &FieldPath) -> Self {
        let mut segments = self.segments.clone();
        segments.extend(other.segments.iter().cloned());
        Self { segments }
    }

    pub fn parent(&self) -> Option<Self> {
        let (_, head) = self.segments.split_last()?;
        Some(Self {
            segments: head.to_vec(),
        })
    }

    pub fn last(&self) -> Option<&PathSegment> {
        self.segments.last()
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn starts_with(&self, prefix: &FieldPath) -> bool {
        self.segments.starts_with(&prefix.segments)
    }
}

impl Display for FieldPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for (position, segment) in self.segments.iter().enumerate() {
            match segment {
                PathSegment::Key(key) if position == 0 => f.write_str(key)?,
                PathSegment::Key(key) => write!(f, ".{key}")?,
                PathSegment::Index(index) => write!(f, "[{index}]")?,
            }
        }
        Ok(())
    }
}

impl FromStr for FieldPath {
    type Err = FormError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        Self::parse(input)
    }
}

pub fn get_value_by_path<'a>(value: &'a Value, path: &FieldPath) -> Option<&'a Value> {
    path.segments()
        .iter()
        .try_fold(value, |current, segment| match segment {
            PathSegment::Key(key) => current.as_object()?.get(key),
            PathSegment::Index(index) => current.as_array()?.get(*index),
        })
}

/// Writes `next` at `path`, creating intermediate objects and arrays as needed.
/// Arrays are padded with `null` up to the written index.
pub fn set_value_by_path(value: &mut Value, path: &FieldPath, next: Value) -> FormResult<()> {
    let mut current = value;
    for segment in path.segments() {
        current = match segment {
            PathSegment::Key(key) => {
                if current.is_null() {
                    *current = Value::Object(Map::new());
                }
                let Value::Object(map) = current else {
                    return Err(FormError::ValueShape {
                        path: path.to_string(),
                        reason: "expected an object",
                    });
                };
                map.entry(key.clone()).or_insert(Value::Null)
            }
            PathSegment::Index(index) => {
                if current.is_null() {
                    *current = Value::Array(Vec::new());
                }
                let Value::Array(items) = current else {
                    return Err(FormError::ValueShape {
                        path: path.to_string(),
                        reason: "expected an array",
                    });
                };
                if items.len() <= *index {
                    items.resize(*index + 1, Value::Null);
                }
                &mut items[*index]
            }
        };
    }
    *current = next;
    Ok(())
}

/// Walks `path` from `root` against the live tree. Never cached: callers resolve at the
/// moment a rule or effect runs so array reindexing is always observed.
pub fn resolve(root: &FormNode, path: &FieldPath) -> FormResult<FormNode> {
    let mut current = root.clone();
    for (depth, segment) in path.segments().iter().enumerate() {
        let walked = || FieldPath {
            segments: path.segments()[..=depth].to_vec(),
        };
        current = match (segment, &current) {
            (PathSegment::Key(key), FormNode::Group(group)) => {
                group.get(key).ok_or_else(|| FormError::FieldNotFound {
                    path: walked().to_string(),
                })?
            }
            (PathSegment::Index(index), FormNode::Array(array)) => {
                let len = array.len();
                FormNode::Group(array.at(*index).ok_or_else(|| {
                    FormError::IndexOutOfBounds {
                        path: walked().to_string(),
                        index: *index,
                        len,
                    }
                })?)
            }
            (PathSegment::Key(_), _) => {
                return Err(FormError::NodeKindMismatch {
                    path: walked().parent().unwrap_or_default().to_string(),
                    expected: "group",
                });
            }
            (PathSegment::Index(_), _) => {
                return Err(FormError::NodeKindMismatch {
                    path: walked().parent().unwrap_or_default().to_string(),
                    expected: "array",
                });
            }
        };
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_and_display_round_trip() {
        for raw in ["name", "address.city", "orders[0].items[1].price", "a[2][3]", ""] {
            let path = FieldPath::parse(raw).expect("path parses");
            assert_eq!(path.to_string(), raw);
        }
    }

    #[test]
    fn malformed_paths_are_rejected() {
        for raw in ["a..b", "a.", "a[x]", "a[1", "a]b", "a[1]b", "a.[0]"] {
            assert!(
                matches!(FieldPath::parse(raw), Err(FormError::InvalidPath { .. })),
                "{raw} should not parse"
            );
        }
    }

    #[test]
    fn builder_methods_match_parsed_paths() {
        let built = FieldPath::root().child("orders").index(0).child("price");
        assert_eq!(built, FieldPath::parse("orders[0].price").expect("parse"));
        assert_eq!(
            built.parent().expect("parent").to_string(),
            "orders[0]"
        );
        assert!(built.starts_with(&FieldPath::parse("orders").expect("parse")));
    }

    #[test]
    fn value_accessors_round_trip_through_paths() {
        let mut value = json!({ "orders": [{ "items": [{ "price": 1 }] }] });
        let path = FieldPath::parse("orders[0].items[1].price").expect("parse");
        set_value_by_path(&mut value, &path, json!(42)).expect("set");
        assert_eq!(get_value_by_path(&value, &path), Some(&json!(42)));
        assert_eq!(
            value["orders"][0]["items"][0]["price"],
            json!(1),
            "sibling item untouched"
        );

        let mut empty = Value::Null;
        let nested = FieldPath::parse("address.city").expect("parse");
        set_value_by_path(&mut empty, &nested, json!("Oslo")).expect("set into null");
        assert_eq!(empty, json!({ "address": { "city": "Oslo" } }));
    }

    #[test]
    fn writing_through_a_scalar_fails() {
        let mut value = json!({ "name": "x" });
        let path = FieldPath::parse("name.first").expect("parse");
        assert!(matches!(
            set_value_by_path(&mut value, &path, json!(1)),
            Err(FormError::ValueShape { .. })
        ));
    }
}
