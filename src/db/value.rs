//! Bind parameters.
//!
//! Every data operation takes its arguments as a slice of [`Value`]; the
//! [`args!`](crate::args) macro builds one from plain Rust values.

use serde::{Deserialize, Serialize};
use sqlx::Any;
use sqlx::any::AnyArguments;
use sqlx::query::Query;

pub(crate) type AnyQuery<'q> = Query<'q, Any, AnyArguments<'q>>;

/// A parameter value for parameterized statements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    /// Stored as i64 for maximum range
    Int(i64),
    Float(f64),
    Text(String),
    /// Binary data (base64 encoded in JSON)
    #[serde(with = "base64_bytes")]
    Bytes(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this value for debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Bytes(_) => "bytes",
        }
    }

    /// Infer a value from command-line text.
    ///
    /// `null`, `true`/`false`, integers and floats are recognized; anything else is
    /// text. Wrap the argument in single quotes to force text (`'42'`).
    pub fn parse_arg(raw: &str) -> Self {
        if let Some(quoted) = raw
            .strip_prefix('\'')
            .and_then(|rest| rest.strip_suffix('\''))
        {
            return Self::Text(quoted.to_string());
        }
        match raw {
            "null" | "NULL" => return Self::Null,
            "true" => return Self::Bool(true),
            "false" => return Self::Bool(false),
            _ => {}
        }
        if let Ok(v) = raw.parse::<i64>() {
            return Self::Int(v);
        }
        match raw.parse::<f64>() {
            Ok(v) if v.is_finite() => Self::Float(v),
            _ => Self::Text(raw.to_string()),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

macro_rules! impl_from_int {
    ($($t:ty),+) => {
        $(
            impl From<$t> for Value {
                fn from(v: $t) -> Self {
                    Self::Int(i64::from(v))
                }
            }
        )+
    };
}

impl_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Self::Float(f64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&String> for Value {
    fn from(v: &String) -> Self {
        Self::Text(v.clone())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Self::Bytes(v.to_vec())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// Bind one value to an `Any` query.
pub(crate) fn bind_value<'q>(query: AnyQuery<'q>, value: &'q Value) -> AnyQuery<'q> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(v) => query.bind(*v),
        Value::Int(v) => query.bind(*v),
        Value::Float(v) => query.bind(*v),
        Value::Text(v) => query.bind(v.as_str()),
        Value::Bytes(v) => query.bind(v.as_slice()),
    }
}

pub(crate) fn bind_all<'q>(query: AnyQuery<'q>, args: &'q [Value]) -> AnyQuery<'q> {
    args.iter().fold(query, bind_value)
}

mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        STANDARD.encode(bytes).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_arg() {
        assert_eq!(Value::parse_arg("42"), Value::Int(42));
        assert_eq!(Value::parse_arg("-7"), Value::Int(-7));
        assert_eq!(Value::parse_arg("1.5"), Value::Float(1.5));
        assert_eq!(Value::parse_arg("true"), Value::Bool(true));
        assert_eq!(Value::parse_arg("NULL"), Value::Null);
        assert_eq!(Value::parse_arg("alice"), Value::Text("alice".into()));
        assert_eq!(Value::parse_arg("'42'"), Value::Text("42".into()));
        assert_eq!(Value::parse_arg("inf"), Value::Text("inf".into()));
    }

    #[test]
    fn test_from_conversions() {
        assert_eq!(Value::from(7u32), Value::Int(7));
        assert_eq!(Value::from("x"), Value::Text("x".into()));
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some(3)), Value::Int(3));
        assert_eq!(Value::from(vec![1u8, 2]), Value::Bytes(vec![1, 2]));
    }

    #[test]
    fn test_args_macro() {
        let args = crate::args![1, "two", 3.0, None::<String>];
        assert_eq!(
            args,
            vec![
                Value::Int(1),
                Value::Text("two".into()),
                Value::Float(3.0),
                Value::Null
            ]
        );
        let empty: Vec<Value> = crate::args![];
        assert!(empty.is_empty());
    }

    #[test]
    fn test_type_name() {
        assert_eq!(Value::Null.type_name(), "null");
        assert_eq!(Value::Bytes(vec![]).type_name(), "bytes");
        assert!(Value::Null.is_null());
    }

    #[test]
    fn test_serde_untagged() {
        let values: Vec<Value> = serde_json::from_str(r#"[null, true, 5, 2.5, "s"]"#).unwrap();
        assert_eq!(
            values,
            vec![
                Value::Null,
                Value::Bool(true),
                Value::Int(5),
                Value::Float(2.5),
                Value::Text("s".into())
            ]
        );
    }
}
