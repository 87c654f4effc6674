use quarry_core::{
    schema::app::{Attribute, AttributeTy, Entity, EntityId},
    stmt::Value,
    Error, Result, Schema,
};

use std::{
    cell::{Ref, RefCell, RefMut},
    fmt,
    rc::Rc,
    sync::Arc,
};

/// A handle to one entity instance.
///
/// Within a session there is exactly one instance per persistent identity,
/// so two handles to the same row are [`EntityRef::ptr_eq`]. Handles are
/// cheap to clone and not `Send`: an instance belongs to the session that
/// loaded it.
#[derive(Clone)]
pub struct EntityRef(pub(crate) Rc<RefCell<EntityData>>);

pub(crate) struct EntityData {
    pub(crate) schema: Arc<Schema>,

    /// Concrete type. A proxy starts out with the requested type and is
    /// narrowed when its state is loaded.
    pub(crate) entity: EntityId,

    /// One slot per attribute, indexed like `Entity::attributes`
    pub(crate) slots: Vec<Slot>,

    /// A proxy whose state has not been loaded yet; only the identifier
    /// slot is meaningful
    pub(crate) hollow: bool,
}

#[derive(Debug, Clone)]
pub(crate) enum Slot {
    Value(Value),

    ToOne {
        /// Identifier of the referenced entity, `Null` for no reference
        key: Value,
        target: Lazy<Option<EntityRef>>,
    },

    Collection(Lazy<Vec<Element>>),
}

/// Initialization state of an association.
#[derive(Debug, Clone)]
pub(crate) enum Lazy<T> {
    Uninitialized,

    /// A load is in flight; set so a re-entrant access fails instead of
    /// loading twice
    Loading,

    Initialized(T),
}

/// A member of a collection: an entity for one-to-many and many-to-many
/// associations, a value for element collections.
#[derive(Debug, Clone)]
pub enum Element {
    Entity(EntityRef),
    Value(Value),
}

impl<T> Lazy<T> {
    pub(crate) fn is_initialized(&self) -> bool {
        matches!(self, Lazy::Initialized(_))
    }
}

impl EntityRef {
    /// A new transient instance of `entity`.
    ///
    /// Basic attributes start out null, to-one references empty, and
    /// collections initialized and empty.
    pub fn new(schema: &Arc<Schema>, entity: &str) -> Result<EntityRef> {
        let Some(entity) = schema.entity_by_name(entity) else {
            return Err(Error::illegal_argument(format!("unknown entity `{entity}`")));
        };
        if entity.is_abstract {
            return Err(Error::illegal_argument(format!(
                "cannot instantiate abstract entity `{}`",
                entity.name
            )));
        }

        let slots = entity
            .attributes
            .iter()
            .map(|attr| match &attr.ty {
                AttributeTy::Basic(_) | AttributeTy::Embedded(_) => Slot::Value(Value::Null),
                AttributeTy::ToOne(_) => Slot::ToOne {
                    key: Value::Null,
                    target: Lazy::Initialized(None),
                },
                AttributeTy::Collection(_) => Slot::Collection(Lazy::Initialized(vec![])),
            })
            .collect();

        Ok(EntityRef::from_data(EntityData {
            schema: schema.clone(),
            entity: entity.id,
            slots,
            hollow: false,
        }))
    }

    pub(crate) fn from_data(data: EntityData) -> EntityRef {
        EntityRef(Rc::new(RefCell::new(data)))
    }

    /// An uninitialized proxy for the row identified by `id`.
    pub(crate) fn proxy(schema: &Arc<Schema>, entity: EntityId, id: Value) -> EntityRef {
        let model = schema.entity(entity);
        let slots = model
            .attributes
            .iter()
            .map(|attr| match &attr.ty {
                _ if attr.id.index == model.identifier.attribute => Slot::Value(id.clone()),
                AttributeTy::Basic(_) | AttributeTy::Embedded(_) => Slot::Value(Value::Null),
                AttributeTy::ToOne(_) => Slot::ToOne {
                    key: Value::Null,
                    target: Lazy::Uninitialized,
                },
                AttributeTy::Collection(_) => Slot::Collection(Lazy::Uninitialized),
            })
            .collect();

        EntityRef::from_data(EntityData {
            schema: schema.clone(),
            entity,
            slots,
            hollow: true,
        })
    }

    pub(crate) fn data(&self) -> Ref<'_, EntityData> {
        self.0.borrow()
    }

    pub(crate) fn data_mut(&self) -> RefMut<'_, EntityData> {
        self.0.borrow_mut()
    }

    pub fn ptr_eq(&self, other: &EntityRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn entity_name(&self) -> String {
        let data = self.data();
        data.model().name.clone()
    }

    pub(crate) fn entity_id(&self) -> EntityId {
        self.data().entity
    }

    /// The identifier, `Null` until assigned or generated.
    pub fn id(&self) -> Value {
        let data = self.data();
        data.id().clone()
    }

    /// Whether the instance's state has been loaded. Only proxies obtained
    /// through `Session::get_reference` start out unloaded.
    pub fn is_loaded(&self) -> bool {
        !self.data().hollow
    }

    /// Value of a basic or embedded attribute, or the identifier of the
    /// entity a to-one attribute references.
    pub fn get(&self, attr: &str) -> Result<Value> {
        let data = self.data();
        let attribute = data.attribute(attr)?;
        data.check_loaded(attribute)?;

        match &data.slots[attribute.id.index] {
            Slot::Value(value) => Ok(value.clone()),
            Slot::ToOne { key, target } => Ok(match target {
                Lazy::Initialized(Some(target)) => target.id(),
                Lazy::Initialized(None) => Value::Null,
                _ => key.clone(),
            }),
            Slot::Collection(_) => Err(Error::illegal_argument(format!(
                "`{}` is a collection; use `collection`",
                data.role(attribute)
            ))),
        }
    }

    /// Sets a basic or embedded attribute, converting `value` to the
    /// attribute's type.
    ///
    /// Setting a to-one attribute to an identifier references that row
    /// without loading it.
    pub fn set(&self, attr: &str, value: impl Into<Value>) -> Result<()> {
        let mut data = self.data_mut();
        let attribute = data.attribute(attr)?.clone();
        data.check_loaded(&attribute)?;
        let value = value.into();

        let slot = match &attribute.ty {
            AttributeTy::Basic(basic) => Slot::Value(basic.ty.cast(value)?),
            AttributeTy::Embedded(_) => {
                if !value.is_null() && value.as_record().is_none() {
                    return Err(Error::type_conversion(value, "embeddable"));
                }
                Slot::Value(value)
            }
            AttributeTy::ToOne(to_one) => {
                let schema = data.schema.clone();
                let target = schema.entity(to_one.target).root;
                let key = schema.entity(target).id_attribute().expr_ty().cast(value)?;
                let target = if key.is_null() {
                    Lazy::Initialized(None)
                } else {
                    Lazy::Uninitialized
                };
                Slot::ToOne { key, target }
            }
            AttributeTy::Collection(_) => {
                return Err(Error::illegal_argument(format!(
                    "`{}` is a collection; use `add_element`",
                    data.role(&attribute)
                )))
            }
        };

        data.slots[attribute.id.index] = slot;
        Ok(())
    }

    /// Points a to-one attribute at `target`, or clears it.
    pub fn set_ref(&self, attr: &str, target: Option<&EntityRef>) -> Result<()> {
        let mut data = self.data_mut();
        let attribute = data.attribute(attr)?.clone();
        data.check_loaded(&attribute)?;

        let Some(to_one) = attribute.as_to_one() else {
            return Err(Error::illegal_argument(format!(
                "`{}` is not a to-one association",
                data.role(&attribute)
            )));
        };

        if let Some(target) = target {
            let target_entity = target.entity_id();
            if !data.schema.app.is_subtype_of(target_entity, to_one.target) {
                return Err(Error::illegal_argument(format!(
                    "`{}` cannot reference a `{}`",
                    data.role(&attribute),
                    data.schema.entity(target_entity).name
                )));
            }
        }

        data.slots[attribute.id.index] = Slot::ToOne {
            key: target.map(EntityRef::id).unwrap_or(Value::Null),
            target: Lazy::Initialized(target.cloned()),
        };
        Ok(())
    }

    /// Whether the association `attr` has been loaded. Basic attributes are
    /// initialized whenever the instance is.
    pub fn is_initialized(&self, attr: &str) -> Result<bool> {
        let data = self.data();
        let attribute = data.attribute(attr)?;
        if data.hollow {
            return Ok(attribute.id.index == data.model().identifier.attribute);
        }
        Ok(match &data.slots[attribute.id.index] {
            Slot::Value(_) => true,
            Slot::ToOne { target, .. } => target.is_initialized(),
            Slot::Collection(elements) => elements.is_initialized(),
        })
    }

    /// The entity referenced by `attr`.
    ///
    /// Fails with a lazy-initialization error when the reference has not
    /// been loaded; `Session::to_one` loads it first.
    pub fn to_one(&self, attr: &str) -> Result<Option<EntityRef>> {
        let data = self.data();
        let attribute = data.attribute(attr)?;
        data.check_loaded(attribute)?;

        match &data.slots[attribute.id.index] {
            Slot::ToOne {
                target: Lazy::Initialized(target),
                ..
            } => Ok(target.clone()),
            Slot::ToOne { .. } => Err(Error::lazy_initialization(data.role(attribute))),
            _ => Err(Error::illegal_argument(format!(
                "`{}` is not a to-one association",
                data.role(attribute)
            ))),
        }
    }

    /// Elements of the collection `attr`.
    ///
    /// Fails with a lazy-initialization error when the collection has not
    /// been loaded; `Session::collection` loads it first.
    pub fn collection(&self, attr: &str) -> Result<Vec<Element>> {
        let data = self.data();
        let attribute = data.attribute(attr)?;
        data.check_loaded(attribute)?;

        match &data.slots[attribute.id.index] {
            Slot::Collection(Lazy::Initialized(elements)) => Ok(elements.clone()),
            Slot::Collection(_) => Err(Error::lazy_initialization(data.role(attribute))),
            _ => Err(Error::illegal_argument(format!(
                "`{}` is not a collection",
                data.role(attribute)
            ))),
        }
    }

    /// Entity elements of an initialized collection.
    pub fn entities(&self, attr: &str) -> Result<Vec<EntityRef>> {
        Ok(self
            .collection(attr)?
            .into_iter()
            .filter_map(|element| match element {
                Element::Entity(entity) => Some(entity),
                Element::Value(_) => None,
            })
            .collect())
    }

    /// Values of an initialized element collection.
    pub fn values(&self, attr: &str) -> Result<Vec<Value>> {
        Ok(self
            .collection(attr)?
            .into_iter()
            .filter_map(|element| match element {
                Element::Value(value) => Some(value),
                Element::Entity(_) => None,
            })
            .collect())
    }

    /// Appends to an initialized collection.
    pub fn add_element(&self, attr: &str, element: impl Into<Element>) -> Result<()> {
        let element = element.into();
        let mut data = self.data_mut();
        let attribute = data.attribute(attr)?.clone();
        data.check_loaded(&attribute)?;
        let element = data.check_element(&attribute, element)?;

        match &mut data.slots[attribute.id.index] {
            Slot::Collection(Lazy::Initialized(elements)) => {
                elements.push(element);
                Ok(())
            }
            _ => Err(Error::lazy_initialization(data.role(&attribute))),
        }
    }

    /// Removes the first occurrence of `element`; returns whether it was
    /// present.
    pub fn remove_element(&self, attr: &str, element: impl Into<Element>) -> Result<bool> {
        let element = element.into();
        let mut data = self.data_mut();
        let attribute = data.attribute(attr)?.clone();
        data.check_loaded(&attribute)?;

        match &mut data.slots[attribute.id.index] {
            Slot::Collection(Lazy::Initialized(elements)) => {
                match elements.iter().position(|e| *e == element) {
                    Some(index) => {
                        elements.remove(index);
                        Ok(true)
                    }
                    None => Ok(false),
                }
            }
            _ => Err(Error::lazy_initialization(data.role(&attribute))),
        }
    }
}

impl EntityData {
    pub(crate) fn model(&self) -> &Entity {
        self.schema.entity(self.entity)
    }

    pub(crate) fn id(&self) -> &Value {
        match &self.slots[self.model().identifier.attribute] {
            Slot::Value(value) => value,
            _ => &Value::Null,
        }
    }

    pub(crate) fn attribute(&self, name: &str) -> Result<&Attribute> {
        self.model().attribute(name).ok_or_else(|| {
            Error::illegal_argument(format!(
                "entity `{}` has no attribute `{name}`",
                self.model().name
            ))
        })
    }

    pub(crate) fn role(&self, attribute: &Attribute) -> String {
        format!("{}.{}", self.model().name, attribute.name)
    }

    fn check_loaded(&self, attribute: &Attribute) -> Result<()> {
        if self.hollow && attribute.id.index != self.model().identifier.attribute {
            return Err(Error::lazy_initialization(format!(
                "{}#{} (uninitialized proxy)",
                self.model().name,
                self.id()
            )));
        }
        Ok(())
    }

    fn check_element(&self, attribute: &Attribute, element: Element) -> Result<Element> {
        let Some(collection) = attribute.as_collection() else {
            return Err(Error::illegal_argument(format!(
                "`{}` is not a collection",
                self.role(attribute)
            )));
        };

        match (collection.target(), element) {
            (Some(target), Element::Entity(entity)) => {
                if !self.schema.app.is_subtype_of(entity.entity_id(), target) {
                    return Err(Error::illegal_argument(format!(
                        "`{}` cannot hold a `{}`",
                        self.role(attribute),
                        entity.entity_name()
                    )));
                }
                Ok(Element::Entity(entity))
            }
            (None, Element::Value(value)) => {
                Ok(Element::Value(collection.element_ty().cast(value)?))
            }
            (Some(_), Element::Value(_)) => Err(Error::illegal_argument(format!(
                "`{}` holds entities, not values",
                self.role(attribute)
            ))),
            (None, Element::Entity(_)) => Err(Error::illegal_argument(format!(
                "`{}` holds values, not entities",
                self.role(attribute)
            ))),
        }
    }

    /// Per-attribute state used for dirty checking and the second-level
    /// cache: basic and embedded values, the key of each to-one reference,
    /// `Null` for collections.
    pub(crate) fn state(&self) -> Vec<Value> {
        self.slots
            .iter()
            .map(|slot| match slot {
                Slot::Value(value) => value.clone(),
                Slot::ToOne { key, target } => match target {
                    Lazy::Initialized(Some(target)) => target.id(),
                    Lazy::Initialized(None) => Value::Null,
                    _ => key.clone(),
                },
                Slot::Collection(_) => Value::Null,
            })
            .collect()
    }

    pub(crate) fn collection(&self, index: usize) -> Option<&Lazy<Vec<Element>>> {
        match &self.slots[index] {
            Slot::Collection(elements) => Some(elements),
            _ => None,
        }
    }
}

impl Element {
    pub fn as_entity(&self) -> Option<&EntityRef> {
        match self {
            Element::Entity(entity) => Some(entity),
            Element::Value(_) => None,
        }
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Element::Value(value) => Some(value),
            Element::Entity(_) => None,
        }
    }

    /// The value stored in the collection table: the element's identifier
    /// for entities.
    pub(crate) fn key(&self) -> Value {
        match self {
            Element::Entity(entity) => entity.id(),
            Element::Value(value) => value.clone(),
        }
    }
}

impl PartialEq for Element {
    fn eq(&self, other: &Element) -> bool {
        match (self, other) {
            (Element::Entity(a), Element::Entity(b)) => a.ptr_eq(b),
            (Element::Value(a), Element::Value(b)) => a == b,
            _ => false,
        }
    }
}

impl From<EntityRef> for Element {
    fn from(value: EntityRef) -> Self {
        Element::Entity(value)
    }
}

impl From<&EntityRef> for Element {
    fn from(value: &EntityRef) -> Self {
        Element::Entity(value.clone())
    }
}

impl From<Value> for Element {
    fn from(value: Value) -> Self {
        Element::Value(value)
    }
}

impl From<&str> for Element {
    fn from(value: &str) -> Self {
        Element::Value(value.into())
    }
}

impl fmt::Debug for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.try_borrow() {
            Ok(data) => write!(f, "{}#{}", data.model().name, data.id()),
            Err(_) => f.write_str("EntityRef(<borrowed>)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::{
        schema::{AttributeDef, EntityDef},
        stmt::Type,
    };

    fn schema() -> Arc<Schema> {
        let mut builder = Schema::builder();
        builder
            .entity(
                EntityDef::new("Person")
                    .id("id", Type::I64)
                    .basic("name", Type::String)
                    .attribute(AttributeDef::many_to_one("employer", "Company"))
                    .attribute(AttributeDef::element_collection("nicknames", Type::String)),
            )
            .entity(EntityDef::new("Company").id("id", Type::I64));
        Arc::new(builder.build().unwrap())
    }

    #[test]
    fn transient_instances_start_initialized() {
        let schema = schema();
        let person = EntityRef::new(&schema, "Person").unwrap();

        person.set("id", 1i32).unwrap();
        assert_eq!(person.id(), Value::I64(1));
        assert!(person.is_initialized("nicknames").unwrap());

        person.add_element("nicknames", "Bob").unwrap();
        assert_eq!(person.values("nicknames").unwrap(), vec![Value::from("Bob")]);
        assert!(person.remove_element("nicknames", "Bob").unwrap());
        assert!(!person.remove_element("nicknames", "Bob").unwrap());
    }

    #[test]
    fn proxies_reject_state_access() {
        let schema = schema();
        let company = schema.entity_by_name("Company").unwrap().id;
        let proxy = EntityRef::proxy(&schema, company, Value::I64(9));

        assert!(!proxy.is_loaded());
        assert_eq!(proxy.get("id").unwrap(), Value::I64(9));

        let person = EntityRef::new(&schema, "Person").unwrap();
        person.set("employer", 9i64).unwrap();
        assert_eq!(person.get("employer").unwrap(), Value::I64(9));
        assert!(!person.is_initialized("employer").unwrap());
        assert!(person.to_one("employer").unwrap_err().is_lazy_initialization());
    }

    #[test]
    fn set_ref_checks_the_target_type() {
        let schema = schema();
        let person = EntityRef::new(&schema, "Person").unwrap();
        let other = EntityRef::new(&schema, "Person").unwrap();

        let err = person.set_ref("employer", Some(&other)).unwrap_err();
        assert!(err.is_illegal_argument());

        let company = EntityRef::new(&schema, "Company").unwrap();
        person.set_ref("employer", Some(&company)).unwrap();
        assert!(person.to_one("employer").unwrap().unwrap().ptr_eq(&company));
    }
}
