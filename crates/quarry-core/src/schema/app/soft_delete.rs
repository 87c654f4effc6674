use crate::stmt::{Type, Value};

/// Rows are marked instead of removed. The marker column is added to the
/// owning table and is not an attribute of the entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoftDelete {
    pub column: String,
    pub kind: SoftDeleteKind,
    pub converter: MarkerConverter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoftDeleteKind {
    /// The column holds `true` for deleted rows
    Deleted,

    /// The column holds `true` for live rows
    Active,
}

/// Storage representation of the marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerConverter {
    /// Native boolean
    Boolean,

    /// `'Y'` / `'N'`
    YesNo,

    /// `'T'` / `'F'`
    TrueFalse,

    /// `1` / `0`
    Numeric,
}

impl Default for SoftDelete {
    fn default() -> Self {
        SoftDelete {
            column: "deleted".to_string(),
            kind: SoftDeleteKind::Deleted,
            converter: MarkerConverter::Boolean,
        }
    }
}

impl SoftDelete {
    pub fn active() -> SoftDelete {
        SoftDelete {
            column: "active".to_string(),
            kind: SoftDeleteKind::Active,
            converter: MarkerConverter::Boolean,
        }
    }

    pub fn column(mut self, name: impl Into<String>) -> Self {
        self.column = name.into();
        self
    }

    pub fn converter(mut self, converter: MarkerConverter) -> Self {
        self.converter = converter;
        self
    }

    /// Stored value of a deleted row.
    pub fn deleted_value(&self) -> Value {
        self.converter.to_value(self.kind == SoftDeleteKind::Deleted)
    }

    /// Stored value of a live row.
    pub fn not_deleted_value(&self) -> Value {
        self.converter.to_value(self.kind == SoftDeleteKind::Active)
    }

    pub fn column_ty(&self) -> Type {
        self.converter.column_ty()
    }
}

impl MarkerConverter {
    pub fn to_value(self, flag: bool) -> Value {
        match self {
            MarkerConverter::Boolean => Value::Bool(flag),
            MarkerConverter::YesNo => Value::from(if flag { "Y" } else { "N" }),
            MarkerConverter::TrueFalse => Value::from(if flag { "T" } else { "F" }),
            MarkerConverter::Numeric => Value::I32(flag.into()),
        }
    }

    pub fn column_ty(self) -> Type {
        match self {
            MarkerConverter::Boolean => Type::Bool,
            MarkerConverter::YesNo | MarkerConverter::TrueFalse => Type::String,
            MarkerConverter::Numeric => Type::I32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_kind_inverts_stored_flag() {
        let marker = SoftDelete::active().converter(MarkerConverter::YesNo);
        assert_eq!(marker.deleted_value(), Value::from("N"));
        assert_eq!(marker.not_deleted_value(), Value::from("Y"));
    }

    #[test]
    fn numeric_converter() {
        let marker = SoftDelete::default().converter(MarkerConverter::Numeric);
        assert_eq!(marker.deleted_value(), Value::I32(1));
        assert_eq!(marker.column_ty(), Type::I32);
    }
}
