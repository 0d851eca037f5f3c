//! Runtime values and property lookup for selector evaluation

use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// A value produced while evaluating a selector
#[derive(Debug, Clone, PartialEq)]
pub enum SelectorValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl SelectorValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SelectorValue::Null)
    }

    /// Numeric view of the value. Strings holding a number are accepted
    /// because wire properties frequently arrive as text.
    pub fn as_number(&self) -> Option<Number> {
        match self {
            SelectorValue::Int(i) => Some(Number::Int(*i)),
            SelectorValue::Float(f) => Some(Number::Float(*f)),
            SelectorValue::Str(s) => {
                let trimmed = s.trim();
                if let Ok(i) = trimmed.parse::<i64>() {
                    Some(Number::Int(i))
                } else {
                    trimmed
                        .parse::<f64>()
                        .ok()
                        .filter(|f| f.is_finite())
                        .map(Number::Float)
                }
            }
            _ => None,
        }
    }

    /// Boolean view of the value; text `true`/`false` is accepted
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SelectorValue::Bool(b) => Some(*b),
            SelectorValue::Str(s) if s.eq_ignore_ascii_case("true") => Some(true),
            SelectorValue::Str(s) if s.eq_ignore_ascii_case("false") => Some(false),
            _ => None,
        }
    }

    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => SelectorValue::Null,
            Value::Bool(b) => SelectorValue::Bool(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    SelectorValue::Int(i)
                } else {
                    n.as_f64()
                        .map(SelectorValue::Float)
                        .unwrap_or(SelectorValue::Null)
                }
            }
            Value::String(s) => SelectorValue::Str(s.clone()),
            // Nested structures have no selector representation; compare by text.
            other => SelectorValue::Str(other.to_string()),
        }
    }
}

impl fmt::Display for SelectorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectorValue::Null => write!(f, "NULL"),
            SelectorValue::Bool(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            SelectorValue::Int(i) => write!(f, "{i}"),
            SelectorValue::Float(x) => write!(f, "{x}"),
            SelectorValue::Str(s) => write!(f, "'{}'", s.replace('\'', "''")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    pub fn as_f64(self) -> f64 {
        match self {
            Number::Int(i) => i as f64,
            Number::Float(f) => f,
        }
    }

    pub fn compare(self, other: Number) -> Option<std::cmp::Ordering> {
        match (self, other) {
            (Number::Int(a), Number::Int(b)) => Some(a.cmp(&b)),
            (a, b) => a.as_f64().partial_cmp(&b.as_f64()),
        }
    }

    pub fn into_value(self) -> SelectorValue {
        match self {
            Number::Int(i) => SelectorValue::Int(i),
            Number::Float(f) => SelectorValue::Float(f),
        }
    }
}

/// Anything a selector can read named properties from
pub trait PropertySource {
    fn property(&self, name: &str) -> Option<SelectorValue>;
}

impl PropertySource for HashMap<String, String> {
    fn property(&self, name: &str) -> Option<SelectorValue> {
        self.get(name).map(|v| SelectorValue::Str(v.clone()))
    }
}

impl PropertySource for BTreeMap<String, String> {
    fn property(&self, name: &str) -> Option<SelectorValue> {
        self.get(name).map(|v| SelectorValue::Str(v.clone()))
    }
}

impl PropertySource for serde_json::Map<String, Value> {
    fn property(&self, name: &str) -> Option<SelectorValue> {
        self.get(name).map(SelectorValue::from_json)
    }
}

impl<T: PropertySource + ?Sized> PropertySource for &T {
    fn property(&self, name: &str) -> Option<SelectorValue> {
        (**self).property(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_string_numbers_are_numeric() {
        assert_eq!(
            SelectorValue::Str("42".to_string()).as_number(),
            Some(Number::Int(42))
        );
        assert_eq!(
            SelectorValue::Str(" 2.5 ".to_string()).as_number(),
            Some(Number::Float(2.5))
        );
        assert_eq!(SelectorValue::Str("abc".to_string()).as_number(), None);
        assert_eq!(SelectorValue::Str("NaN".to_string()).as_number(), None);
    }

    #[test]
    fn test_from_json() {
        assert_eq!(SelectorValue::from_json(&json!(7)), SelectorValue::Int(7));
        assert_eq!(
            SelectorValue::from_json(&json!(1.5)),
            SelectorValue::Float(1.5)
        );
        assert_eq!(
            SelectorValue::from_json(&json!("x")),
            SelectorValue::Str("x".to_string())
        );
        assert_eq!(SelectorValue::from_json(&json!(null)), SelectorValue::Null);
        assert_eq!(
            SelectorValue::from_json(&json!({"a": 1})),
            SelectorValue::Str("{\"a\":1}".to_string())
        );
    }

    #[test]
    fn test_mixed_number_ordering() {
        assert_eq!(
            Number::Int(2).compare(Number::Float(2.5)),
            Some(std::cmp::Ordering::Less)
        );
    }

    #[test]
    fn test_display_escapes_quotes() {
        assert_eq!(SelectorValue::Str("it's".to_string()).to_string(), "'it''s'");
    }
}
