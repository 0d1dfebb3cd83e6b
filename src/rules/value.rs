//! Dynamic property values and their loose comparison rules

use serde::{Deserialize, Serialize};

/// A property value as authored in content or written by tasks
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl Value {
    /// Convert a primitive content node. Arrays and maps are not values.
    pub fn from_json(json: &serde_json::Value) -> Option<Value> {
        match json {
            serde_json::Value::Null => Some(Value::Null),
            serde_json::Value::Bool(b) => Some(Value::Bool(*b)),
            serde_json::Value::Number(n) => n.as_f64().map(Value::Number),
            serde_json::Value::String(s) => Some(Value::Text(s.clone())),
            _ => None,
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Text(s) => !s.is_empty(),
        }
    }

    /// Numeric coercion used by comparators and ratios. Unparseable text is NaN.
    pub fn as_number(&self) -> f64 {
        match self {
            Value::Null => 0.0,
            Value::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Value::Number(n) => *n,
            Value::Text(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    0.0
                } else {
                    trimmed.parse().unwrap_or(f64::NAN)
                }
            }
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Equality with number/text/bool coercion; `Null` equals only `Null`
    pub fn loosely_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Null, _) | (_, Value::Null) => false,
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            _ => self.as_number() == other.as_number(),
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", n),
            Value::Text(s) => write!(f, "{}", s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_truthiness() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::from(0.0).is_truthy());
        assert!(!Value::from(f64::NAN).is_truthy());
        assert!(!Value::from("").is_truthy());
        assert!(Value::from("value1").is_truthy());
        assert!(Value::from(5).is_truthy());
    }

    #[test]
    fn test_loose_equality_coerces() {
        assert!(Value::from(5).loosely_equals(&Value::from("5")));
        assert!(Value::from(true).loosely_equals(&Value::from(1)));
        assert!(!Value::from("a").loosely_equals(&Value::from("b")));
        assert!(!Value::Null.loosely_equals(&Value::from(0)));
        assert!(Value::Null.loosely_equals(&Value::Null));
    }

    #[test]
    fn test_from_json_rejects_containers() {
        assert_eq!(Value::from_json(&serde_json::json!(3)), Some(Value::Number(3.0)));
        assert_eq!(Value::from_json(&serde_json::json!([1, 2])), None);
        assert_eq!(Value::from_json(&serde_json::json!({"a": 1})), None);
    }

    proptest! {
        #[test]
        fn prop_numbers_equal_their_text_form(n in -1.0e6f64..1.0e6) {
            let text = Value::Text(n.to_string());
            prop_assert!(Value::Number(n).loosely_equals(&text));
        }

        #[test]
        fn prop_loose_equality_is_symmetric(a in -100i32..100, b in -100i32..100) {
            let left = Value::from(a);
            let right = Value::Text(b.to_string());
            prop_assert_eq!(left.loosely_equals(&right), right.loosely_equals(&left));
        }
    }
}
