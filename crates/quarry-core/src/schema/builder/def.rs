use crate::schema::app::{
    AccessType, Cascade, FetchStyle, FetchTiming, IdStrategy, InheritanceType, Ordering,
    SoftDelete,
};
use crate::stmt::{Type, Value};

/// Declarative description of an entity, consumed by [`Builder`].
///
/// [`Builder`]: super::Builder
#[derive(Debug, Clone)]
pub struct EntityDef {
    pub(super) name: String,
    pub(super) table: Option<String>,
    pub(super) extends: Option<String>,
    pub(super) inheritance: Option<InheritanceType>,
    pub(super) discriminator_column: Option<(String, Type)>,
    pub(super) discriminator_value: Option<Value>,
    pub(super) is_abstract: bool,
    pub(super) attributes: Vec<AttributeDef>,
    pub(super) soft_delete: Option<SoftDelete>,
    pub(super) cache: Option<AccessType>,
    pub(super) batch_size: Option<usize>,
    pub(super) filters: Vec<(String, Option<String>)>,
    pub(super) immutable: bool,
}

/// Declarative description of one attribute of an [`EntityDef`].
#[derive(Debug, Clone)]
pub struct AttributeDef {
    pub(super) name: String,
    pub(super) kind: AttributeDefKind,
    pub(super) column: Option<String>,
    pub(super) nullable: bool,
    pub(super) id: Option<IdStrategy>,
    pub(super) version: bool,
    pub(super) tenant: bool,
    pub(super) secondary_table: Option<String>,
    pub(super) formula: Option<String>,
    pub(super) column_prefix: Option<String>,
    pub(super) fetch: Option<FetchTiming>,
    pub(super) style: Option<FetchStyle>,
    pub(super) cascade: Cascade,
    pub(super) orphan_removal: bool,
    pub(super) mapped_by: Option<String>,
    pub(super) join_column: Option<String>,
    pub(super) collection_table: Option<String>,
    pub(super) key_column: Option<String>,
    pub(super) element_column: Option<String>,
    pub(super) ordering: Option<Ordering>,
    pub(super) order_column: Option<String>,
    pub(super) soft_delete: Option<SoftDelete>,
    pub(super) cache: Option<AccessType>,
}

#[derive(Debug, Clone)]
pub(super) enum AttributeDefKind {
    Basic(Type),
    Embedded(String),
    ManyToOne(String),
    OneToOne(String),
    OneToMany(String),
    ManyToMany(String),
    Element(Type),
}

/// A filter definition: a name, typed parameters, and an optional default
/// condition.
#[derive(Debug, Clone)]
pub struct FilterDef {
    pub(super) name: String,
    pub(super) params: Vec<(String, Type)>,
    pub(super) default_condition: Option<String>,
}

/// A named fetch profile: attributes fetched eagerly while it is enabled.
#[derive(Debug, Clone)]
pub struct FetchProfileDef {
    pub(super) name: String,
    pub(super) items: Vec<(String, String, FetchStyle)>,
}

impl EntityDef {
    pub fn new(name: impl Into<String>) -> EntityDef {
        EntityDef {
            name: name.into(),
            table: None,
            extends: None,
            inheritance: None,
            discriminator_column: None,
            discriminator_value: None,
            is_abstract: false,
            attributes: vec![],
            soft_delete: None,
            cache: None,
            batch_size: None,
            filters: vec![],
            immutable: false,
        }
    }

    pub fn table(mut self, name: impl Into<String>) -> Self {
        self.table = Some(name.into());
        self
    }

    /// Declares `parent` as the superclass.
    pub fn extends(mut self, parent: impl Into<String>) -> Self {
        self.extends = Some(parent.into());
        self
    }

    /// Inheritance strategy; only meaningful on a hierarchy root.
    pub fn inheritance(mut self, strategy: InheritanceType) -> Self {
        self.inheritance = Some(strategy);
        self
    }

    pub fn discriminator_column(mut self, name: impl Into<String>, ty: Type) -> Self {
        self.discriminator_column = Some((name.into(), ty));
        self
    }

    pub fn discriminator_value(mut self, value: impl Into<Value>) -> Self {
        self.discriminator_value = Some(value.into());
        self
    }

    pub fn abstract_entity(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    /// Adds an assigned identifier attribute.
    pub fn id(self, name: impl Into<String>, ty: Type) -> Self {
        self.id_generated(name, ty, IdStrategy::Assigned)
    }

    pub fn id_generated(self, name: impl Into<String>, ty: Type, strategy: IdStrategy) -> Self {
        let mut attr = AttributeDef::basic(name, ty);
        attr.id = Some(strategy);
        attr.nullable = false;
        self.attribute(attr)
    }

    pub fn basic(self, name: impl Into<String>, ty: Type) -> Self {
        self.attribute(AttributeDef::basic(name, ty))
    }

    pub fn attribute(mut self, attribute: AttributeDef) -> Self {
        self.attributes.push(attribute);
        self
    }

    pub fn soft_delete(mut self, soft_delete: SoftDelete) -> Self {
        self.soft_delete = Some(soft_delete);
        self
    }

    pub fn cache(mut self, access: AccessType) -> Self {
        self.cache = Some(access);
        self
    }

    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = Some(size);
        self
    }

    /// Applies the named filter, optionally overriding its default condition.
    pub fn filter(mut self, name: impl Into<String>, condition: Option<&str>) -> Self {
        self.filters
            .push((name.into(), condition.map(str::to_string)));
        self
    }

    pub fn immutable(mut self) -> Self {
        self.immutable = true;
        self
    }
}

impl AttributeDef {
    fn new(name: impl Into<String>, kind: AttributeDefKind) -> AttributeDef {
        AttributeDef {
            name: name.into(),
            kind,
            column: None,
            nullable: true,
            id: None,
            version: false,
            tenant: false,
            secondary_table: None,
            formula: None,
            column_prefix: None,
            fetch: None,
            style: None,
            cascade: Cascade::NONE,
            orphan_removal: false,
            mapped_by: None,
            join_column: None,
            collection_table: None,
            key_column: None,
            element_column: None,
            ordering: None,
            order_column: None,
            soft_delete: None,
            cache: None,
        }
    }

    pub fn basic(name: impl Into<String>, ty: Type) -> AttributeDef {
        AttributeDef::new(name, AttributeDefKind::Basic(ty))
    }

    pub fn embedded(name: impl Into<String>, embeddable: impl Into<String>) -> AttributeDef {
        AttributeDef::new(name, AttributeDefKind::Embedded(embeddable.into()))
    }

    /// A many-to-one reference; eager unless made lazy.
    pub fn many_to_one(name: impl Into<String>, target: impl Into<String>) -> AttributeDef {
        AttributeDef::new(name, AttributeDefKind::ManyToOne(target.into()))
    }

    pub fn one_to_one(name: impl Into<String>, target: impl Into<String>) -> AttributeDef {
        AttributeDef::new(name, AttributeDefKind::OneToOne(target.into()))
    }

    /// A one-to-many collection; lazy unless made eager.
    pub fn one_to_many(name: impl Into<String>, target: impl Into<String>) -> AttributeDef {
        AttributeDef::new(name, AttributeDefKind::OneToMany(target.into()))
    }

    pub fn many_to_many(name: impl Into<String>, target: impl Into<String>) -> AttributeDef {
        AttributeDef::new(name, AttributeDefKind::ManyToMany(target.into()))
    }

    /// A collection of basic values.
    pub fn element_collection(name: impl Into<String>, ty: Type) -> AttributeDef {
        AttributeDef::new(name, AttributeDefKind::Element(ty))
    }

    pub fn column(mut self, name: impl Into<String>) -> Self {
        self.column = Some(name.into());
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Marks the attribute as the optimistic lock version.
    pub fn version(mut self) -> Self {
        self.version = true;
        self.nullable = false;
        self
    }

    /// Marks the attribute as the tenant discriminator.
    pub fn tenant(mut self) -> Self {
        self.tenant = true;
        self
    }

    pub fn secondary_table(mut self, table: impl Into<String>) -> Self {
        self.secondary_table = Some(table.into());
        self
    }

    /// Computes the attribute from a SQL fragment instead of a column.
    pub fn formula(mut self, sql: impl Into<String>) -> Self {
        self.formula = Some(sql.into());
        self
    }

    /// Prefix for the columns of an embedded attribute.
    pub fn column_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.column_prefix = Some(prefix.into());
        self
    }

    pub fn lazy(mut self) -> Self {
        self.fetch = Some(FetchTiming::Lazy);
        self
    }

    pub fn eager(mut self) -> Self {
        self.fetch = Some(FetchTiming::Eager);
        self
    }

    pub fn fetch_style(mut self, style: FetchStyle) -> Self {
        self.style = Some(style);
        self
    }

    pub fn batch_size(self, size: usize) -> Self {
        self.fetch_style(FetchStyle::Batch(size))
    }

    pub fn cascade(mut self, cascade: Cascade) -> Self {
        self.cascade = cascade;
        self
    }

    pub fn orphan_removal(mut self) -> Self {
        self.orphan_removal = true;
        self
    }

    pub fn mapped_by(mut self, attribute: impl Into<String>) -> Self {
        self.mapped_by = Some(attribute.into());
        self
    }

    /// Foreign key column of a to-one, or of a unidirectional one-to-many
    /// on the target's table.
    pub fn join_column(mut self, name: impl Into<String>) -> Self {
        self.join_column = Some(name.into());
        self
    }

    pub fn collection_table(mut self, name: impl Into<String>) -> Self {
        self.collection_table = Some(name.into());
        self
    }

    /// Column of the collection table referencing the owner.
    pub fn key_column(mut self, name: impl Into<String>) -> Self {
        self.key_column = Some(name.into());
        self
    }

    /// Element column of an element collection, or target column of a join
    /// table.
    pub fn element_column(mut self, name: impl Into<String>) -> Self {
        self.element_column = Some(name.into());
        self
    }

    /// Keeps element positions in an index column.
    pub fn order_column(mut self, name: impl Into<String>) -> Self {
        self.ordering = Some(Ordering::OrderColumn);
        self.order_column = Some(name.into());
        self
    }

    /// Sorts elements on load by an attribute of the element (or the value
    /// itself for element collections when `attribute` is `None`).
    pub fn order_by(mut self, attribute: Option<&str>, desc: bool) -> Self {
        self.ordering = Some(Ordering::OrderBy {
            attribute: attribute.map(str::to_string),
            desc,
        });
        self
    }

    pub fn soft_delete(mut self, soft_delete: SoftDelete) -> Self {
        self.soft_delete = Some(soft_delete);
        self
    }

    pub fn cache(mut self, access: AccessType) -> Self {
        self.cache = Some(access);
        self
    }
}

impl FilterDef {
    pub fn new(name: impl Into<String>) -> FilterDef {
        FilterDef {
            name: name.into(),
            params: vec![],
            default_condition: None,
        }
    }

    pub fn param(mut self, name: impl Into<String>, ty: Type) -> Self {
        self.params.push((name.into(), ty));
        self
    }

    pub fn default_condition(mut self, condition: impl Into<String>) -> Self {
        self.default_condition = Some(condition.into());
        self
    }
}

impl FetchProfileDef {
    pub fn new(name: impl Into<String>) -> FetchProfileDef {
        FetchProfileDef {
            name: name.into(),
            items: vec![],
        }
    }

    /// Fetches `entity.attribute` with `style` while the profile is enabled.
    pub fn fetch(
        mut self,
        entity: impl Into<String>,
        attribute: impl Into<String>,
        style: FetchStyle,
    ) -> Self {
        self.items.push((entity.into(), attribute.into(), style));
        self
    }
}
