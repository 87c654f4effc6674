mod entity;
pub use entity::{EntityMapping, EntityTable, EntityTableKind};

mod value;
pub use value::{CollectionMapping, ElementMapping, Formula, ToOneMapping, ValueMapping};

use super::app::EntityId;

/// Defines the correspondence between app-level entities and database-level
/// tables.
///
/// The mapping is constructed during schema building and remains immutable at
/// runtime. The translator reads it to lower attribute paths into column
/// references, and the flush reads it to write entity state back.
#[derive(Debug, Clone, Default)]
pub struct Mapping {
    /// Per-entity mappings indexed by entity identifier.
    pub entities: Vec<EntityMapping>,
}

impl Mapping {
    /// Returns the mapping for the specified entity.
    ///
    /// # Panics
    ///
    /// Panics if the entity ID does not exist in the mapping.
    pub fn entity(&self, id: impl Into<EntityId>) -> &EntityMapping {
        &self.entities[id.into().0]
    }
}
