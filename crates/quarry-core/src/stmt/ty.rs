use super::Value;
use crate::{
    schema::app::{EmbeddableId, EntityId},
    Error, Result,
};

/// The resolved type of an expression, column, or parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    /// Boolean value
    Bool,

    /// Signed 32-bit integer
    I32,

    /// Signed 64-bit integer
    I64,

    /// 64-bit floating point number
    F64,

    /// String type
    String,

    /// UUID, stored as text
    Uuid,

    /// Raw bytes
    Bytes,

    /// A reference to an instance of an entity. At the column level this is
    /// the entity's identifier.
    Entity(EntityId),

    /// A value of an embeddable type, carried as a record.
    Embeddable(EmbeddableId),

    /// A list of a single type
    List(Box<Type>),

    /// A fixed-length tuple where each item can have a different type.
    Record(Vec<Type>),

    /// The type of the `null` literal, assignable to every type.
    Null,

    /// A type that could not be inferred (e.g. an untyped parameter)
    Unknown,
}

impl Type {
    pub fn list(ty: impl Into<Self>) -> Self {
        Self::List(Box::new(ty.into()))
    }

    pub fn is_bool(&self) -> bool {
        matches!(self, Self::Bool)
    }

    pub fn is_string(&self) -> bool {
        matches!(self, Self::String)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::I32 | Self::I64 | Self::F64)
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, Self::I32 | Self::I64)
    }

    pub fn is_entity(&self) -> bool {
        matches!(self, Self::Entity(_))
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown | Self::Null)
    }

    pub fn as_entity(&self) -> Option<EntityId> {
        match self {
            Self::Entity(id) => Some(*id),
            _ => None,
        }
    }

    /// Whether values of `self` and `other` may be compared or assigned to
    /// each other.
    pub fn is_comparable_with(&self, other: &Type) -> bool {
        match (self, other) {
            (Self::Unknown | Self::Null, _) | (_, Self::Unknown | Self::Null) => true,
            (lhs, rhs) if lhs.is_numeric() && rhs.is_numeric() => true,
            (Self::List(lhs), Self::List(rhs)) => lhs.is_comparable_with(rhs),
            (Self::Record(lhs), Self::Record(rhs)) => {
                lhs.len() == rhs.len()
                    && lhs.iter().zip(rhs).all(|(l, r)| l.is_comparable_with(r))
            }
            (Self::Uuid, Self::String) | (Self::String, Self::Uuid) => true,
            // Subtypes of a hierarchy compare by identifier.
            (Self::Entity(_), Self::Entity(_)) => true,
            (lhs, rhs) => lhs == rhs,
        }
    }

    /// Picks the more specific of two comparable types.
    pub fn unify(&self, other: &Type) -> Type {
        match (self, other) {
            (Self::Unknown | Self::Null, ty) | (ty, Self::Unknown | Self::Null) => ty.clone(),
            (Self::F64, _) | (_, Self::F64) => Self::F64,
            (Self::I64, _) | (_, Self::I64) if self.is_numeric() && other.is_numeric() => Self::I64,
            (ty, _) => ty.clone(),
        }
    }

    /// Coerces `value` into this type, widening numbers and parsing UUIDs.
    pub fn cast(&self, value: Value) -> Result<Value> {
        if value.is_null() {
            return Ok(value);
        }

        Ok(match (value, self) {
            (value @ Value::Bool(_), Type::Bool) => value,
            (Value::I32(v), Type::I32) => Value::I32(v),
            (Value::I32(v), Type::I64) => Value::I64(v.into()),
            (Value::I32(v), Type::F64) => Value::F64(v.into()),
            (Value::I64(v), Type::I64) => Value::I64(v),
            (Value::I64(v), Type::I32) => {
                let v = i32::try_from(v)
                    .map_err(|_| Error::type_conversion(Value::I64(v), "I32"))?;
                Value::I32(v)
            }
            (Value::I64(v), Type::F64) => Value::F64(v as f64),
            (Value::I64(v), Type::Bool) => Value::Bool(v != 0),
            (Value::F64(v), Type::F64) => Value::F64(v),
            (value @ Value::String(_), Type::String) => value,
            (Value::String(v), Type::Uuid) => Value::Uuid(v.parse()?),
            (value @ Value::Uuid(_), Type::Uuid) => value,
            (Value::Uuid(v), Type::String) => Value::String(v.to_string()),
            (value @ Value::Bytes(_), Type::Bytes) => value,
            (value, Type::Unknown) => value,
            (Value::List(items), Type::List(ty)) => Value::List(
                items
                    .into_iter()
                    .map(|item| ty.cast(item))
                    .collect::<Result<_>>()?,
            ),
            (Value::Record(record), Type::Record(tys)) if record.len() == tys.len() => {
                let fields = record
                    .fields
                    .into_iter()
                    .zip(tys)
                    .map(|(field, ty)| ty.cast(field))
                    .collect::<Result<_>>()?;
                Value::Record(super::ValueRecord::from_vec(fields))
            }
            (value @ Value::Record(_), Type::Embeddable(_)) => value,
            (value, ty) => return Err(Error::type_conversion(value, format!("{ty:?}"))),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_types_are_comparable() {
        assert!(Type::I32.is_comparable_with(&Type::I64));
        assert!(Type::F64.is_comparable_with(&Type::I32));
        assert!(!Type::String.is_comparable_with(&Type::I64));
        assert!(Type::Unknown.is_comparable_with(&Type::Bool));
    }

    #[test]
    fn cast_widens_integers() {
        assert_eq!(Type::I64.cast(Value::I32(4)).unwrap(), Value::I64(4));
        assert!(Type::I32.cast(Value::I64(i64::MAX)).is_err());
        assert!(Type::Bool.cast(Value::from("yes")).is_err());
    }
}
