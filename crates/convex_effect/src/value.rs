//! The host value type.
//!
//! Everything that crosses the boundary to the host runtime (documents,
//! function arguments and return values, filter literals) is a [`Value`].
//! User record types travel through serde.

use std::{
    cmp::Ordering,
    collections::BTreeMap,
    fmt::{
        self,
        Display,
    },
};

use anyhow::Context;
use serde::{
    de::{
        self,
        DeserializeOwned,
    },
    ser,
    Deserialize,
    Deserializer,
    Serialize,
    Serializer,
};
use serde_json::{
    Number,
    Value as JsonValue,
};

pub type Object = BTreeMap<String, Value>;

#[derive(Clone, Debug, Default)]
pub enum Value {
    #[default]
    Null,
    Int64(i64),
    Float64(f64),
    Boolean(bool),
    String(String),
    Array(Vec<Value>),
    Object(Object),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Int64(_) => "bigint",
            Value::Float64(_) => "number",
            Value::Boolean(_) => "boolean",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float64(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn into_object(self) -> Option<Object> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Follow a dotted field path (`"author.name"`) through nested objects.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut current = self;
        for part in path.split('.') {
            current = current.as_object()?.get(part)?;
        }
        Some(current)
    }

    fn type_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Int64(_) => 1,
            Value::Float64(_) => 2,
            Value::Boolean(_) => 3,
            Value::String(_) => 4,
            Value::Array(_) => 5,
            Value::Object(_) => 6,
        }
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Int64(a), Value::Int64(b)) => a.cmp(b),
            (Value::Float64(a), Value::Float64(b)) => a.total_cmp(b),
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Array(a), Value::Array(b)) => a.cmp(b),
            (Value::Object(a), Value::Object(b)) => a.iter().cmp(b.iter()),
            _ => self.type_rank().cmp(&other.type_rank()),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Int64(i) => write!(f, "{i}n"),
            Value::Float64(n) => write!(f, "{n:?}"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::String(s) => write!(f, "{s:?}"),
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            },
            Value::Object(fields) => {
                write!(f, "{{")?;
                for (i, (name, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{name}: {value}")?;
                }
                write!(f, "}}")
            },
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int64(i)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float64(n)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<Object> for Value {
    fn from(o: Object) -> Self {
        Value::Object(o)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl TryFrom<JsonValue> for Value {
    type Error = anyhow::Error;

    fn try_from(json: JsonValue) -> anyhow::Result<Self> {
        let value = match json {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Boolean(b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int64(i)
                } else if let Some(f) = n.as_f64() {
                    Value::Float64(f)
                } else {
                    anyhow::bail!("Number {n} is out of range for a Convex value");
                }
            },
            JsonValue::String(s) => Value::String(s),
            JsonValue::Array(items) => Value::Array(
                items
                    .into_iter()
                    .map(Value::try_from)
                    .collect::<anyhow::Result<_>>()?,
            ),
            JsonValue::Object(fields) => Value::Object(
                fields
                    .into_iter()
                    .map(|(k, v)| Ok((k, Value::try_from(v)?)))
                    .collect::<anyhow::Result<_>>()?,
            ),
        };
        Ok(value)
    }
}

impl TryFrom<Value> for JsonValue {
    type Error = anyhow::Error;

    fn try_from(value: Value) -> anyhow::Result<Self> {
        let json = match value {
            Value::Null => JsonValue::Null,
            Value::Int64(i) => JsonValue::Number(i.into()),
            Value::Float64(f) => JsonValue::Number(
                Number::from_f64(f)
                    .with_context(|| format!("{f} cannot be represented as JSON"))?,
            ),
            Value::Boolean(b) => JsonValue::Bool(b),
            Value::String(s) => JsonValue::String(s),
            Value::Array(items) => JsonValue::Array(
                items
                    .into_iter()
                    .map(JsonValue::try_from)
                    .collect::<anyhow::Result<_>>()?,
            ),
            Value::Object(fields) => JsonValue::Object(
                fields
                    .into_iter()
                    .map(|(k, v)| Ok((k, JsonValue::try_from(v)?)))
                    .collect::<anyhow::Result<_>>()?,
            ),
        };
        Ok(json)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        JsonValue::try_from(self.clone())
            .map_err(ser::Error::custom)?
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let json = JsonValue::deserialize(deserializer)?;
        Value::try_from(json).map_err(de::Error::custom)
    }
}

/// Serialize a record into a host value.
pub fn to_value<T: Serialize + ?Sized>(record: &T) -> anyhow::Result<Value> {
    Value::try_from(serde_json::to_value(record)?)
}

/// Deserialize a host value into a record.
pub fn from_value<T: DeserializeOwned>(value: Value) -> anyhow::Result<T> {
    Ok(serde_json::from_value(JsonValue::try_from(value)?)?)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::Value;

    #[test]
    fn test_json_numbers() -> anyhow::Result<()> {
        assert_eq!(Value::try_from(json!(3))?, Value::Int64(3));
        assert_eq!(Value::try_from(json!(3.5))?, Value::Float64(3.5));
        assert!(Value::try_from(json!(u64::MAX)).is_ok_and(|v| matches!(v, Value::Float64(_))));
        Ok(())
    }

    #[test]
    fn test_total_order() {
        let mut values = vec![
            Value::from("b"),
            Value::Float64(f64::NAN),
            Value::Null,
            Value::from(true),
            Value::Int64(-1),
            Value::Float64(1.0),
            Value::from("a"),
        ];
        values.sort();
        assert_eq!(values[0], Value::Null);
        assert_eq!(values[1], Value::Int64(-1));
        assert_eq!(values[2], Value::Float64(1.0));
        assert_eq!(values[4], Value::from(true));
        assert_eq!(values[5], Value::from("a"));
    }

    #[test]
    fn test_non_finite_float_is_not_json() {
        assert!(serde_json::Value::try_from(Value::Float64(f64::INFINITY)).is_err());
    }

    #[test]
    fn test_get_path() -> anyhow::Result<()> {
        let value = Value::try_from(json!({"author": {"name": "ada"}}))?;
        assert_eq!(value.get_path("author.name"), Some(&Value::from("ada")));
        assert_eq!(value.get_path("author.age"), None);
        Ok(())
    }
}
