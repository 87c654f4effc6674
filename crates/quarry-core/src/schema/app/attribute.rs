use super::{CacheConfig, EmbeddableId, EntityId, SoftDelete};
use crate::stmt::Type;
use std::fmt;

#[derive(Debug, Clone)]
pub struct Attribute {
    /// Uniquely identifies the attribute within the containing entity.
    pub id: AttributeId,

    /// The attribute name
    pub name: String,

    /// The entity that declares the attribute. Differs from `id.entity`
    /// for inherited attributes.
    pub declaring: EntityId,

    /// Basic, embedded, association, ...
    pub ty: AttributeTy,

    /// True if the attribute may hold `null`.
    pub nullable: bool,
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttributeId {
    pub entity: EntityId,
    pub index: usize,
}

#[derive(Debug, Clone)]
pub enum AttributeTy {
    Basic(Basic),
    Embedded(Embedded),
    ToOne(ToOne),
    Collection(Collection),
}

#[derive(Debug, Clone)]
pub struct Basic {
    pub ty: Type,
}

#[derive(Debug, Clone)]
pub struct Embedded {
    pub embeddable: EmbeddableId,
}

#[derive(Debug, Clone)]
pub struct ToOne {
    pub target: EntityId,
    pub kind: ToOneKind,

    /// For the inverse side of a one-to-one, the owning attribute's name on
    /// the target.
    pub mapped_by: Option<String>,

    pub fetch: FetchTiming,
    pub cascade: Cascade,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToOneKind {
    ManyToOne,
    OneToOne,
}

#[derive(Debug, Clone)]
pub struct Collection {
    pub kind: CollectionKind,
    pub fetch: FetchTiming,
    pub style: FetchStyle,
    pub cascade: Cascade,
    pub orphan_removal: bool,
    pub ordering: Option<Ordering>,
    pub soft_delete: Option<SoftDelete>,
    pub cache: Option<CacheConfig>,
}

#[derive(Debug, Clone)]
pub enum CollectionKind {
    /// Elements are target entities whose table holds the foreign key.
    OneToMany {
        target: EntityId,
        /// Name of the owning to-one attribute on the target, for
        /// bidirectional associations.
        mapped_by: Option<String>,
    },

    /// Elements are target entities linked through a join table.
    ManyToMany { target: EntityId },

    /// Elements are basic values stored in a collection table.
    Element { ty: Type },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ordering {
    /// Position stored in a dedicated index column
    OrderColumn,

    /// Sorted on load by an element attribute (or the element value itself
    /// when `None`)
    OrderBy { attribute: Option<String>, desc: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchTiming {
    Eager,
    Lazy,
}

/// How an association is loaded when it is loaded separately from its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStyle {
    /// One query per owner
    Select,

    /// Joined into the owner's query
    Join,

    /// One query for every owner loaded by the same query, re-using that
    /// query's restriction
    Subselect,

    /// Up to `n` owners coalesced into an `IN` list
    Batch(usize),
}

/// Operations propagated from an owner to its associated entities.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cascade {
    pub persist: bool,
    pub merge: bool,
    pub remove: bool,
}

impl Cascade {
    pub const NONE: Cascade = Cascade {
        persist: false,
        merge: false,
        remove: false,
    };

    pub const ALL: Cascade = Cascade {
        persist: true,
        merge: true,
        remove: true,
    };

    pub const PERSIST: Cascade = Cascade {
        persist: true,
        merge: false,
        remove: false,
    };
}

impl Attribute {
    pub fn is_basic(&self) -> bool {
        matches!(self.ty, AttributeTy::Basic(_))
    }

    pub fn is_association(&self) -> bool {
        matches!(self.ty, AttributeTy::ToOne(_) | AttributeTy::Collection(_))
    }

    pub fn as_to_one(&self) -> Option<&ToOne> {
        match &self.ty {
            AttributeTy::ToOne(to_one) => Some(to_one),
            _ => None,
        }
    }

    pub fn as_collection(&self) -> Option<&Collection> {
        match &self.ty {
            AttributeTy::Collection(collection) => Some(collection),
            _ => None,
        }
    }

    /// The type of the attribute when used as an expression. Collections
    /// evaluate to their element type.
    pub fn expr_ty(&self) -> Type {
        match &self.ty {
            AttributeTy::Basic(basic) => basic.ty.clone(),
            AttributeTy::Embedded(embedded) => Type::Embeddable(embedded.embeddable),
            AttributeTy::ToOne(to_one) => Type::Entity(to_one.target),
            AttributeTy::Collection(collection) => collection.element_ty(),
        }
    }

    /// The static fetch timing of an association; basic attributes are eager.
    pub fn fetch_timing(&self) -> FetchTiming {
        match &self.ty {
            AttributeTy::ToOne(to_one) => to_one.fetch,
            AttributeTy::Collection(collection) => collection.fetch,
            _ => FetchTiming::Eager,
        }
    }

    pub fn cascade(&self) -> Cascade {
        match &self.ty {
            AttributeTy::ToOne(to_one) => to_one.cascade,
            AttributeTy::Collection(collection) => collection.cascade,
            _ => Cascade::NONE,
        }
    }
}

impl Collection {
    pub fn element_ty(&self) -> Type {
        match &self.kind {
            CollectionKind::OneToMany { target, .. } | CollectionKind::ManyToMany { target } => {
                Type::Entity(*target)
            }
            CollectionKind::Element { ty } => ty.clone(),
        }
    }

    pub fn target(&self) -> Option<EntityId> {
        match &self.kind {
            CollectionKind::OneToMany { target, .. } | CollectionKind::ManyToMany { target } => {
                Some(*target)
            }
            CollectionKind::Element { .. } => None,
        }
    }

    /// Indexed or ordered collections are rewritten as a whole when changed.
    pub fn is_ordered(&self) -> bool {
        self.ordering.is_some()
    }

    /// The batch size when the collection uses batch fetching.
    pub fn batch_size(&self) -> Option<usize> {
        match self.style {
            FetchStyle::Batch(size) => Some(size),
            _ => None,
        }
    }
}

impl fmt::Debug for AttributeId {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "AttributeId({}/{})", self.entity.0, self.index)
    }
}
