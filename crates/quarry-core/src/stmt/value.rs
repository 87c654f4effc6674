use super::{Type, ValueRecord};
use crate::{Error, Result};

use std::hash::{Hash, Hasher};
use uuid::Uuid;

/// A single runtime value: a bound parameter, a column read from a row, or
/// the state of a basic attribute.
#[derive(Debug, Default, Clone)]
pub enum Value {
    Bool(bool),
    I32(i32),
    I64(i64),
    F64(f64),
    String(String),
    Uuid(Uuid),
    Bytes(Vec<u8>),

    /// Expanded into one placeholder per element when bound.
    List(Vec<Value>),

    /// Composite values: embeddables, composite keys, rows.
    Record(ValueRecord),

    #[default]
    Null,
}

impl Value {
    pub const fn null() -> Value {
        Value::Null
    }

    pub fn record(fields: Vec<Value>) -> Value {
        Value::Record(ValueRecord::from_vec(fields))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_list(&self) -> bool {
        matches!(self, Value::List(_))
    }

    /// The type of this value. `Null` has the null type.
    pub fn ty(&self) -> Type {
        match self {
            Value::Bool(_) => Type::Bool,
            Value::I32(_) => Type::I32,
            Value::I64(_) => Type::I64,
            Value::F64(_) => Type::F64,
            Value::String(_) => Type::String,
            Value::Uuid(_) => Type::Uuid,
            Value::Bytes(_) => Type::Bytes,
            Value::List(items) => Type::list(
                items
                    .iter()
                    .map(Value::ty)
                    .find(|ty| !ty.is_unknown())
                    .unwrap_or(Type::Unknown),
            ),
            Value::Record(record) => Type::Record(record.iter().map(Value::ty).collect()),
            Value::Null => Type::Null,
        }
    }

    /// Whether this value may be bound where `ty` is expected.
    pub fn is_a(&self, ty: &Type) -> bool {
        match (self, ty) {
            (Value::Null, _) | (_, Type::Unknown) => true,
            (Value::Record(_), Type::Embeddable(_)) => true,
            (value, Type::Entity(_)) => !matches!(value, Value::List(_) | Value::Bool(_)),
            (value, ty) => value.ty().is_comparable_with(ty),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&ValueRecord> {
        match self {
            Value::Record(v) => Some(v),
            _ => None,
        }
    }

    pub fn to_i64(&self) -> Result<i64> {
        match self {
            Value::I32(v) => Ok((*v).into()),
            Value::I64(v) => Ok(*v),
            _ => Err(Error::type_conversion(self.clone(), "i64")),
        }
    }

    /// Splits a composite value into its components; scalars yield themselves.
    pub fn flatten(&self) -> Vec<Value> {
        match self {
            Value::Record(record) => record.iter().flat_map(Value::flatten).collect(),
            value => vec![value.clone()],
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::I32(a), Value::I32(b)) => a == b,
            (Value::I64(a), Value::I64(b)) => a == b,
            (Value::I32(a), Value::I64(b)) | (Value::I64(b), Value::I32(a)) => i64::from(*a) == *b,
            (Value::F64(a), Value::F64(b)) => a.to_bits() == b.to_bits(),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Uuid(a), Value::Uuid(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Record(a), Value::Record(b)) => a == b,
            (Value::Null, Value::Null) => true,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Value::Bool(v) => {
                0u8.hash(state);
                v.hash(state)
            }
            // I32 and I64 compare equal, so they hash alike.
            Value::I32(v) => {
                1u8.hash(state);
                i64::from(*v).hash(state)
            }
            Value::I64(v) => {
                1u8.hash(state);
                v.hash(state)
            }
            Value::F64(v) => {
                2u8.hash(state);
                v.to_bits().hash(state)
            }
            Value::String(v) => {
                3u8.hash(state);
                v.hash(state)
            }
            Value::Uuid(v) => {
                4u8.hash(state);
                v.hash(state)
            }
            Value::Bytes(v) => {
                5u8.hash(state);
                v.hash(state)
            }
            Value::List(v) => {
                6u8.hash(state);
                v.hash(state)
            }
            Value::Record(v) => {
                7u8.hash(state);
                v.hash(state)
            }
            Value::Null => 8u8.hash(state),
        }
    }
}

impl core::fmt::Display for Value {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{v}"),
            Value::I32(v) => write!(f, "{v}"),
            Value::I64(v) => write!(f, "{v}"),
            Value::F64(v) => write!(f, "{v}"),
            Value::String(v) => write!(f, "'{v}'"),
            Value::Uuid(v) => write!(f, "{v}"),
            Value::Bytes(v) => write!(f, "<{} bytes>", v.len()),
            Value::List(items) | Value::Record(ValueRecord { fields: items }) => {
                f.write_str("(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str(")")
            }
            Value::Null => f.write_str("null"),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::I32(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::I64(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::F64(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<Uuid> for Value {
    fn from(value: Uuid) -> Self {
        Value::Uuid(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(value: Vec<T>) -> Self {
        Value::List(value.into_iter().map(Into::into).collect())
    }
}

impl From<ValueRecord> for Value {
    fn from(value: ValueRecord) -> Self {
        Value::Record(value)
    }
}

impl TryFrom<Value> for i64 {
    type Error = Error;

    fn try_from(value: Value) -> Result<i64> {
        value.to_i64()
    }
}

impl TryFrom<Value> for String {
    type Error = Error;

    fn try_from(value: Value) -> Result<String> {
        match value {
            Value::String(v) => Ok(v),
            value => Err(Error::type_conversion(value, "String")),
        }
    }
}

impl TryFrom<Value> for bool {
    type Error = Error;

    fn try_from(value: Value) -> Result<bool> {
        match value {
            Value::Bool(v) => Ok(v),
            value => Err(Error::type_conversion(value, "bool")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn integer_widths_are_one_identity() {
        let mut ids = HashSet::new();
        ids.insert(Value::I32(1));
        assert!(ids.contains(&Value::I64(1)));
    }

    #[test]
    fn list_type_skips_nulls() {
        let value = Value::List(vec![Value::Null, Value::I64(2)]);
        assert_eq!(value.ty(), Type::list(Type::I64));
    }

    #[test]
    fn display_quotes_strings() {
        let value = Value::record(vec![Value::from("a"), Value::I32(1), Value::Null]);
        assert_eq!(value.to_string(), "('a', 1, null)");
    }
}
