use super::{Attribute, CacheConfig, EntityFilter, SoftDelete};
use crate::stmt::Value;
use std::fmt;

#[derive(Debug, Clone)]
pub struct Entity {
    /// Uniquely identifies the entity within the schema
    pub id: EntityId,

    /// Entity name as used in queries
    pub name: String,

    /// Direct superclass, if any
    pub parent: Option<EntityId>,

    /// Direct subclasses
    pub subclasses: Vec<EntityId>,

    /// Top of the inheritance hierarchy; `self.id` for roots
    pub root: EntityId,

    /// Abstract entities are never instantiated
    pub is_abstract: bool,

    /// Strategy of the hierarchy, `None` for entities without inheritance
    pub inheritance: Option<InheritanceType>,

    /// Value stored in the discriminator column for this concrete type
    pub discriminator_value: Option<Value>,

    pub identifier: Identifier,

    /// All attributes, inherited ones first in the parent's order
    pub attributes: Vec<Attribute>,

    /// Index of the `@Version` attribute
    pub version: Option<usize>,

    /// Index of the `@TenantId` attribute
    pub tenant: Option<usize>,

    pub soft_delete: Option<SoftDelete>,

    pub cache: Option<CacheConfig>,

    /// Batch size used when loading uninitialized references to this entity
    pub batch_size: Option<usize>,

    pub filters: Vec<EntityFilter>,

    /// Immutable entities are never dirty-checked or updated
    pub immutable: bool,
}

#[derive(Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct EntityId(pub usize);

#[derive(Debug, Clone)]
pub struct Identifier {
    /// Index of the identifier attribute
    pub attribute: usize,
    pub strategy: IdStrategy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdStrategy {
    /// Set by the application before persist
    Assigned,

    /// Generated by the database on insert and read back
    Identity,

    /// Random UUID generated on persist
    Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InheritanceType {
    /// One table for the hierarchy, rows told apart by a discriminator
    SingleTable,

    /// A table per class holding the attributes it declares
    Joined,

    /// A table per concrete class holding all of its attributes
    Union,
}

impl Entity {
    pub fn is_root(&self) -> bool {
        self.root == self.id
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|attr| attr.name == name)
    }

    pub fn id_attribute(&self) -> &Attribute {
        &self.attributes[self.identifier.attribute]
    }

    pub fn version_attribute(&self) -> Option<&Attribute> {
        self.version.map(|index| &self.attributes[index])
    }

    pub fn tenant_attribute(&self) -> Option<&Attribute> {
        self.tenant.map(|index| &self.attributes[index])
    }

    /// Attributes declared by this entity, excluding inherited ones
    pub fn declared_attributes(&self) -> impl Iterator<Item = &Attribute> + '_ {
        self.attributes
            .iter()
            .filter(move |attr| attr.declaring == self.id)
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "EntityId({})", self.0)
    }
}

impl From<&Entity> for EntityId {
    fn from(value: &Entity) -> Self {
        value.id
    }
}

impl From<&EntityId> for EntityId {
    fn from(value: &EntityId) -> Self {
        *value
    }
}
