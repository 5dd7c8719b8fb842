//! Dynamic column values.
//!
//! [`Value`] is the currency exchanged between the storage backend and
//! the layers above it. It mirrors SQLite's storage classes (minus blobs)
//! and adds [`Value::List`] for filter operands and tag lists.

use indexmap::IndexMap;
use rusqlite::types::{FromSql, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// An ordered row of column name to value.
pub type Row = IndexMap<String, Value>;

/// A single dynamically typed value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// SQL `NULL` / absent value.
    #[default]
    Null,
    /// 64-bit signed integer.
    Int(i64),
    /// 64-bit float.
    Float(f64),
    /// UTF-8 text.
    Text(String),
    /// A list of values. Never bound directly as a parameter.
    List(Vec<Value>),
}

impl Value {
    /// Returns true for `Null`.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns true when the value counts as "not filled in":
    /// `Null`, an empty string or an empty list.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Text(s) => s.is_empty(),
            Self::List(items) => items.is_empty(),
            Self::Int(_) | Self::Float(_) => false,
        }
    }

    /// Returns the text content, if this is a `Text`.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Interprets the value as an integer.
    ///
    /// Floats are truncated and numeric text is parsed.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Float(f) => Some(*f as i64),
            Self::Text(s) => {
                let s = s.trim();
                s.parse::<i64>()
                    .ok()
                    .or_else(|| s.parse::<f64>().ok().map(|f| f as i64))
            }
            Self::Null | Self::List(_) => None,
        }
    }

    /// Interprets the value as a float.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            Self::Text(s) => s.trim().parse::<f64>().ok(),
            Self::Null | Self::List(_) => None,
        }
    }

    /// Interprets the value as a check flag (non-zero is true).
    #[must_use]
    pub fn as_bool(&self) -> bool {
        match self {
            Self::Text(s) => !matches!(s.trim(), "" | "0" | "false"),
            other => other.as_i64().is_some_and(|i| i != 0),
        }
    }

    /// Returns the list items, if this is a `List`.
    #[must_use]
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Renders the value as plain text, `Null` as the empty string.
    #[must_use]
    pub fn to_text(&self) -> String {
        match self {
            Self::Null => String::new(),
            other => other.to_string(),
        }
    }

    /// Converts a JSON value.
    ///
    /// Booleans become `Int(0|1)`, arrays become lists and objects are kept
    /// as their JSON text.
    #[must_use]
    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Int(i64::from(*b)),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Self::Int)
                .or_else(|| n.as_f64().map(Self::Float))
                .unwrap_or(Self::Null),
            serde_json::Value::String(s) => Self::Text(s.clone()),
            serde_json::Value::Array(items) => {
                Self::List(items.iter().map(Self::from_json).collect())
            }
            serde_json::Value::Object(_) => Self::Text(json.to_string()),
        }
    }

    /// Converts to a JSON value. Non-finite floats become `null`.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Int(i) => serde_json::Value::from(*i),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Self::Text(s) => serde_json::Value::String(s.clone()),
            Self::List(items) => {
                serde_json::Value::Array(items.iter().map(Self::to_json).collect())
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(s) => write!(f, "{s}"),
            Self::List(items) => {
                let parts: Vec<String> = items.iter().map(Value::to_text).collect();
                write!(f, "{}", parts.join(","))
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Int(i64::from(b))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map_or(Self::Null, Into::into)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Self::List(items.into_iter().map(Into::into).collect())
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Self::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            Self::Int(i) => ToSqlOutput::Borrowed(ValueRef::Integer(*i)),
            Self::Float(f) => ToSqlOutput::Borrowed(ValueRef::Real(*f)),
            Self::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Self::List(_) => {
                return Err(rusqlite::Error::ToSqlConversionFailure(
                    "list values cannot be bound as a single parameter".into(),
                ))
            }
        })
    }
}

impl FromSql for Value {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        Ok(match value {
            ValueRef::Null => Self::Null,
            ValueRef::Integer(i) => Self::Int(i),
            ValueRef::Real(f) => Self::Float(f),
            ValueRef::Text(t) | ValueRef::Blob(t) => {
                Self::Text(String::from_utf8_lossy(t).into_owned())
            }
        })
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let json = serde_json::Value::deserialize(deserializer)?;
        Ok(Self::from_json(&json))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_values() {
        assert!(Value::Null.is_empty());
        assert!(Value::from("").is_empty());
        assert!(Value::List(vec![]).is_empty());
        assert!(!Value::Int(0).is_empty());
        assert!(!Value::from("x").is_empty());
    }

    #[test]
    fn numeric_coercion() {
        assert_eq!(Value::from("42").as_i64(), Some(42));
        assert_eq!(Value::from("4.5").as_f64(), Some(4.5));
        assert_eq!(Value::Float(3.9).as_i64(), Some(3));
        assert_eq!(Value::from("abc").as_i64(), None);
        assert!(Value::Int(1).as_bool());
        assert!(!Value::from("0").as_bool());
    }

    #[test]
    fn json_conversion() {
        assert_eq!(Value::from_json(&json!(true)), Value::Int(1));
        assert_eq!(Value::from_json(&json!(1.5)), Value::Float(1.5));
        assert_eq!(
            Value::from_json(&json!(["a", 2])),
            Value::List(vec![Value::from("a"), Value::Int(2)])
        );
        assert_eq!(Value::Float(f64::NAN).to_json(), json!(null));
        assert_eq!(Value::from("x").to_json(), json!("x"));
    }

    #[test]
    fn display_and_text() {
        assert_eq!(Value::Null.to_text(), "");
        assert_eq!(Value::Int(7).to_text(), "7");
        assert_eq!(Value::from(vec!["a", "b"]).to_text(), "a,b");
    }

    #[test]
    fn serde_uses_json_shape() {
        let v: Value = serde_json::from_str("[1, \"two\", null]").unwrap();
        assert_eq!(
            v,
            Value::List(vec![Value::Int(1), Value::from("two"), Value::Null])
        );
        assert_eq!(serde_json::to_string(&Value::Float(2.5)).unwrap(), "2.5");
    }
}
