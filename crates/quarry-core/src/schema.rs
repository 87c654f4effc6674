//! The metamodel: entities and their attributes (`app`), tables and columns
//! (`db`), and how the former are stored in the latter (`mapping`).
//!
//! A [`Schema`] is built once through [`Builder`] and is immutable afterwards.

pub mod app;

mod builder;
pub use builder::{AttributeDef, Builder, EntityDef, FetchProfileDef, FilterDef};

pub mod db;

pub mod mapping;
use mapping::Mapping;

use app::{Attribute, AttributeId, Entity, EntityId};
use db::{Column, ColumnId, Table, TableId};

#[derive(Debug)]
pub struct Schema {
    /// Application-level schema
    pub app: app::Schema,

    /// Database-level schema
    pub db: db::Schema,

    /// Maps the app-level schema to the db-level schema
    pub mapping: Mapping,
}

impl Schema {
    pub fn builder() -> Builder {
        Builder::default()
    }

    pub fn entity(&self, id: impl Into<EntityId>) -> &Entity {
        self.app.entity(id)
    }

    pub fn entity_by_name(&self, name: &str) -> Option<&Entity> {
        self.app.entity_by_name(name)
    }

    pub fn attribute(&self, id: AttributeId) -> &Attribute {
        self.app.attribute(id)
    }

    pub fn mapping_for(&self, id: impl Into<EntityId>) -> &mapping::EntityMapping {
        self.mapping.entity(id)
    }

    pub fn table(&self, id: TableId) -> &Table {
        self.db.table(id)
    }

    pub fn column(&self, id: ColumnId) -> &Column {
        self.db.column(id)
    }

    /// The table holding the identifier of `entity`'s hierarchy root row.
    pub fn root_table_for(&self, entity: impl Into<EntityId>) -> &Table {
        self.db.table(self.mapping.entity(entity).tables[0].table)
    }

    /// Role name of an attribute, e.g. `Person.phones`.
    pub fn role(&self, id: AttributeId) -> String {
        format!("{}.{}", self.entity(id.entity).name, self.attribute(id).name)
    }
}
