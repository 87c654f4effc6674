//! Application-level schema: entities, embeddables, filters, and fetch
//! profiles.

mod attribute;
pub use attribute::{
    Attribute, AttributeId, AttributeTy, Basic, Cascade, Collection, CollectionKind, Embedded,
    FetchStyle, FetchTiming, Ordering, ToOne, ToOneKind,
};

mod cache;
pub use cache::{AccessType, CacheConfig};

mod embeddable;
pub use embeddable::{Embeddable, EmbeddableField, EmbeddableId};

mod entity;
pub use entity::{Entity, EntityId, IdStrategy, Identifier, InheritanceType};

mod filter;
pub use filter::{EntityFilter, Filter, FetchProfile, FetchProfileItem, TENANT_FILTER, TENANT_PARAM};

mod soft_delete;
pub use soft_delete::{MarkerConverter, SoftDelete, SoftDeleteKind};

use crate::stmt::Type;

#[derive(Debug, Default)]
pub struct Schema {
    pub entities: Vec<Entity>,

    pub embeddables: Vec<Embeddable>,

    /// Filter definitions, registered once per persistence unit.
    pub filters: Vec<Filter>,

    pub fetch_profiles: Vec<FetchProfile>,

    /// The shared type of every `@TenantId` attribute, when any exists.
    pub tenant_ty: Option<Type>,
}

impl Schema {
    pub fn entity(&self, id: impl Into<EntityId>) -> &Entity {
        &self.entities[id.into().0]
    }

    pub fn entity_by_name(&self, name: &str) -> Option<&Entity> {
        self.entities.iter().find(|entity| entity.name == name)
    }

    pub fn attribute(&self, id: AttributeId) -> &Attribute {
        &self.entity(id.entity).attributes[id.index]
    }

    pub fn embeddable(&self, id: EmbeddableId) -> &Embeddable {
        &self.embeddables[id.0]
    }

    pub fn filter(&self, name: &str) -> Option<&Filter> {
        self.filters.iter().find(|filter| filter.name == name)
    }

    pub fn fetch_profile(&self, name: &str) -> Option<&FetchProfile> {
        self.fetch_profiles.iter().find(|profile| profile.name == name)
    }

    /// `entity` and every entity below it in its hierarchy, parents first.
    pub fn subtree(&self, entity: EntityId) -> Vec<EntityId> {
        let mut out = vec![entity];
        let mut i = 0;
        while i < out.len() {
            out.extend(self.entity(out[i]).subclasses.iter().copied());
            i += 1;
        }
        out
    }

    /// Whether `entity` is `ancestor` or inherits from it.
    pub fn is_subtype_of(&self, entity: EntityId, ancestor: EntityId) -> bool {
        let mut current = Some(entity);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.entity(id).parent;
        }
        false
    }
}
