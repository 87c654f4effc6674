use crate::{
    schema::{
        app::{AttributeId, EntityId},
        db::{ColumnId, TableId},
    },
    stmt::Type,
};

/// How one attribute's value is stored.
///
/// Every consumer matches on this exhaustively: basic columns, formulas,
/// embedded column groups, to-one references and collections each need
/// their own handling when selecting, hydrating, and writing.
#[derive(Debug, Clone)]
pub enum ValueMapping {
    /// A single column
    BasicColumn(ColumnId),

    /// A read-only SQL fragment evaluated against the owning table
    FormulaColumn(Formula),

    /// One column per embeddable field, in field order
    EmbeddedColumns(Vec<ColumnId>),

    /// A reference to another entity
    ToOneValue(ToOneMapping),

    /// A collection stored in its own table or in the target's table
    CollectionValue(CollectionMapping),
}

#[derive(Debug, Clone)]
pub struct Formula {
    /// SQL fragment; `{alias}` is replaced with the owning table's alias
    pub sql: String,
    pub ty: Type,
    /// The table the fragment is evaluated against
    pub table: TableId,
}

#[derive(Debug, Clone)]
pub enum ToOneMapping {
    /// Foreign key columns on the owner's table referencing the target's
    /// identifier
    ForeignKey(Vec<ColumnId>),

    /// Inverse one-to-one; the foreign key lives on the target
    Inverse { owning: AttributeId },
}

#[derive(Debug, Clone)]
pub struct CollectionMapping {
    /// Table holding one row per element
    pub table: TableId,

    /// Columns in `table` referencing the owner's identifier
    pub key: Vec<ColumnId>,

    pub element: ElementMapping,

    /// Position column of indexed collections
    pub index: Option<ColumnId>,

    /// Marker column when elements are soft deleted
    pub soft_delete: Option<ColumnId>,

    /// True when the rows are written through the target entity's owning
    /// to-one instead of through the collection
    pub inverse: bool,
}

#[derive(Debug, Clone)]
pub enum ElementMapping {
    /// Elements are entities. `fk` is set for join tables; for one-to-many
    /// the collection table is the target's table and `fk` is empty.
    Entity { target: EntityId, fk: Vec<ColumnId> },

    /// Elements are basic values in a single column
    Value { column: ColumnId, ty: Type },
}

impl ValueMapping {
    pub fn as_collection(&self) -> Option<&CollectionMapping> {
        match self {
            ValueMapping::CollectionValue(mapping) => Some(mapping),
            _ => None,
        }
    }

    /// Columns read when the owning row is selected.
    pub fn columns(&self) -> Vec<ColumnId> {
        match self {
            ValueMapping::BasicColumn(column) => vec![*column],
            ValueMapping::EmbeddedColumns(columns) => columns.clone(),
            ValueMapping::ToOneValue(ToOneMapping::ForeignKey(columns)) => columns.clone(),
            ValueMapping::FormulaColumn(_)
            | ValueMapping::ToOneValue(ToOneMapping::Inverse { .. })
            | ValueMapping::CollectionValue(_) => vec![],
        }
    }
}

impl CollectionMapping {
    pub fn is_join_table(&self) -> bool {
        matches!(&self.element, ElementMapping::Entity { fk, .. } if !fk.is_empty())
    }

    /// True when the rows belong to the collection alone: join tables and
    /// element collection tables.
    pub fn has_own_table(&self) -> bool {
        !matches!(&self.element, ElementMapping::Entity { fk, .. } if fk.is_empty())
    }
}
