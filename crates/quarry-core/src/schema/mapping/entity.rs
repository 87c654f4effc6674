use super::ValueMapping;
use crate::schema::{
    app::EntityId,
    db::{ColumnId, TableId},
};

/// How a single entity's state is spread over tables.
#[derive(Debug, Clone)]
pub struct EntityMapping {
    /// The entity this mapping applies to.
    pub entity: EntityId,

    /// Tables holding the entity's state, in join order. The first entry
    /// holds the identifier of the hierarchy root (for union inheritance,
    /// the entity's own concrete table).
    pub tables: Vec<EntityTable>,

    /// Discriminator column for single-table hierarchies.
    pub discriminator: Option<ColumnId>,

    /// Marker column for soft-deleted entities, on the first table.
    pub soft_delete: Option<ColumnId>,

    /// Per-attribute mappings, indexed by attribute index.
    pub attributes: Vec<ValueMapping>,
}

#[derive(Debug, Clone)]
pub struct EntityTable {
    pub table: TableId,

    /// Columns holding the identifier in this table
    pub key: Vec<ColumnId>,

    pub kind: EntityTableKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityTableKind {
    /// Hierarchy root (or concrete union) table
    Root,

    /// Joined-inheritance table of the given class in the hierarchy
    Subclass(EntityId),

    /// Secondary table of the entity
    Secondary,
}

impl EntityMapping {
    pub fn root_table(&self) -> &EntityTable {
        &self.tables[0]
    }

    pub fn id_columns(&self) -> &[ColumnId] {
        &self.tables[0].key
    }

    pub fn attribute(&self, index: usize) -> &ValueMapping {
        &self.attributes[index]
    }

    /// Position of `table` in `tables`.
    pub fn table_index(&self, table: TableId) -> Option<usize> {
        self.tables.iter().position(|t| t.table == table)
    }
}
