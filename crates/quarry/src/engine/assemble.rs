use super::{
    plan::{AttributeReader, EntityReader, FetchReader, FetchTarget, ResultReader, SelectionPlan},
    Engine,
};
use crate::{
    entity::{Element, EntityData, EntityRef, Lazy, Slot},
    query::RowValue,
    session::context::{EntityEntry, EntityKey, PersistenceContext},
};

use quarry_core::{
    schema::app::{Attribute, AttributeId, AttributeTy},
    stmt::Value,
    Error, Result,
};

use by_address::ByAddress;
use indexmap::IndexMap;
use std::{cell::RefCell, rc::Rc};
use tracing::trace;

type InstanceKey = ByAddress<Rc<RefCell<EntityData>>>;

/// Turns the rows of one result into managed instances.
///
/// Rows for an identity already in the persistence context resolve to the
/// managed instance; its state is not overwritten. Unloaded proxies are
/// filled in place.
pub(crate) struct Assembler<'a> {
    engine: &'a Engine,
    context: &'a mut PersistenceContext,

    /// Collections being filled by fetch joins, in first-seen order
    filling: IndexMap<(InstanceKey, usize), Vec<Element>>,

    hydrated: Vec<EntityRef>,
}

/// What a result added to the persistence context.
#[derive(Debug, Default)]
pub(crate) struct Assembled {
    /// Instances whose state was read by the result, in row order
    pub(crate) hydrated: Vec<EntityRef>,

    /// Collections initialized by fetch joins: owner and attribute index
    pub(crate) collections: Vec<(EntityRef, usize)>,
}

impl<'a> Assembler<'a> {
    pub(crate) fn new(engine: &'a Engine, context: &'a mut PersistenceContext) -> Assembler<'a> {
        Assembler {
            engine,
            context,
            filling: IndexMap::new(),
            hydrated: vec![],
        }
    }

    /// Reads one row, returning a value per selection.
    pub(crate) fn row(&mut self, plan: &SelectionPlan, row: &[Value]) -> Result<Vec<RowValue>> {
        let mut instances = Vec::with_capacity(plan.entities.len());
        for reader in &plan.entities {
            instances.push(self.entity(reader, row)?);
        }

        let bag_rows = plan.fetches.len() > 1;
        for fetch in &plan.fetches {
            if let Some(owner) = &instances[fetch.owner] {
                self.fetch(owner, fetch, &instances, row, bag_rows)?;
            }
        }

        Ok(plan
            .results
            .iter()
            .map(|reader| match reader {
                ResultReader::Scalar { position, .. } => RowValue::Value(row[*position].clone()),
                ResultReader::Record { positions, .. } => RowValue::Value(Value::record(
                    positions.iter().map(|position| row[*position].clone()).collect(),
                )),
                ResultReader::Entity(index) => match &instances[*index] {
                    Some(instance) => RowValue::Entity(instance.clone()),
                    None => RowValue::Value(Value::Null),
                },
            })
            .collect())
    }

    /// Completes fetched collections and links references to instances the
    /// context already holds.
    pub(crate) fn finish(self) -> Result<Assembled> {
        let Assembler {
            engine,
            context,
            filling,
            hydrated,
        } = self;
        let schema = &engine.schema;
        let mut collections = vec![];

        for ((owner, index), elements) in filling {
            let owner = EntityRef(owner.0);
            let keys = elements.iter().map(Element::key).collect();
            let (role, id) = {
                let data = owner.data();
                (role_of(&data.model().attributes[index]), data.id().clone())
            };

            owner.data_mut().slots[index] = Slot::Collection(Lazy::Initialized(elements));
            if let Some(entry) = context.entry_of_mut(schema, &owner) {
                entry.collections.insert(index, keys);
            }
            context.batch.remove_collection(role, &id);
            context.remove_subselect(role, &id);
            engine.stats.collection_loaded();
            trace!(role = %schema.role(role), owner = %id, "initialized fetched collection");

            collections.push((owner, index));
        }

        for instance in &hydrated {
            link_references(engine, context, instance);
        }

        Ok(Assembled {
            hydrated,
            collections,
        })
    }

    fn entity(&mut self, reader: &EntityReader, row: &[Value]) -> Result<Option<EntityRef>> {
        let key: Vec<Value> = reader.key.iter().map(|position| row[*position].clone()).collect();
        if key.iter().all(Value::is_null) {
            return Ok(None);
        }
        let id = match <[Value; 1]>::try_from(key) {
            Ok([id]) => id,
            Err(key) => Value::record(key),
        };

        let schema = &self.engine.schema;
        let key = EntityKey::new(schema.entity(reader.entity).root, id);

        if let Some(instance) = self.context.instance(&key) {
            if !instance.is_loaded() {
                self.hydrate(&instance, reader, row, &key)?;
            }
            return Ok(Some(instance));
        }

        let instance = EntityRef::proxy(schema, reader.entity, key.id.clone());
        self.context
            .insert(key.clone(), EntityEntry::proxy(instance.clone()));
        self.hydrate(&instance, reader, row, &key)?;
        Ok(Some(instance))
    }

    fn hydrate(
        &mut self,
        instance: &EntityRef,
        reader: &EntityReader,
        row: &[Value],
        key: &EntityKey,
    ) -> Result<()> {
        let schema = &self.engine.schema;
        let Some(concrete) = reader.concrete.resolve(row) else {
            return Err(Error::mapping(format!(
                "row of `{}` with identifier {} does not map to a concrete entity type",
                schema.entity(reader.entity).name,
                key.id
            )));
        };
        let Some((_, readers)) = reader.attributes.iter().find(|(entity, _)| *entity == concrete)
        else {
            return Err(Error::sql_ast_syntax(format!(
                "no attribute readers for `{}`",
                schema.entity(concrete).name
            )));
        };

        let model = schema.entity(concrete);
        let slots = model
            .attributes
            .iter()
            .zip(readers)
            .map(|(attr, reader)| slot(attr, reader, row))
            .collect::<Vec<_>>();

        let state = {
            let mut data = instance.data_mut();
            data.entity = concrete;
            data.slots = slots;
            data.hollow = false;
            data.state()
        };

        if let Some(entry) = self.context.get_mut(key) {
            entry.loaded = Some(state);
            entry.collections.clear();
        }
        self.context.batch.remove_entity(key.root, &key.id);
        self.engine.stats.entity_loaded();
        trace!(entity = %model.name, id = %key.id, "hydrated");

        self.hydrated.push(instance.clone());
        Ok(())
    }

    fn fetch(
        &mut self,
        owner: &EntityRef,
        fetch: &FetchReader,
        instances: &[Option<EntityRef>],
        row: &[Value],
        bag_rows: bool,
    ) -> Result<()> {
        let index = fetch.attribute;

        let element = match &fetch.target {
            FetchTarget::Entity(target) => instances[*target].clone().map(Element::Entity),
            FetchTarget::Value { position, .. } => {
                Some(row[*position].clone()).filter(|value| !value.is_null()).map(Element::Value)
            }
        };

        let is_to_one = matches!(owner.data().slots.get(index), Some(Slot::ToOne { .. }));
        if is_to_one {
            let mut data = owner.data_mut();
            if let Slot::ToOne { key, target } = &mut data.slots[index] {
                if !target.is_initialized() {
                    let reference = element.and_then(|element| element.as_entity().cloned());
                    *key = reference.as_ref().map(EntityRef::id).unwrap_or(Value::Null);
                    *target = Lazy::Initialized(reference);
                }
            }
            return Ok(());
        }

        let slot = (ByAddress(owner.0.clone()), index);
        if !self.filling.contains_key(&slot) {
            match owner.data_mut().slots.get_mut(index) {
                Some(Slot::Collection(state @ Lazy::Uninitialized)) => *state = Lazy::Loading,
                Some(Slot::Collection(_)) => return Ok(()),
                _ => {
                    return Err(Error::sql_ast_syntax(format!(
                        "fetched attribute {index} is not an association"
                    )))
                }
            }
            self.filling.insert(slot.clone(), vec![]);
        }

        let (Some(elements), Some(element)) = (self.filling.get_mut(&slot), element) else {
            return Ok(());
        };
        let repeated = match &element {
            Element::Entity(_) => elements.contains(&element),
            Element::Value(_) => bag_rows && elements.contains(&element),
        };
        if !repeated {
            elements.push(element);
        }
        Ok(())
    }
}

fn slot(attr: &Attribute, reader: &AttributeReader, row: &[Value]) -> Slot {
    match (reader, &attr.ty) {
        (AttributeReader::Value { position, .. }, _) => Slot::Value(row[*position].clone()),
        (AttributeReader::Embedded { positions, .. }, _) => {
            let fields: Vec<Value> = positions.iter().map(|position| row[*position].clone()).collect();
            if fields.iter().all(Value::is_null) {
                Slot::Value(Value::Null)
            } else {
                Slot::Value(Value::record(fields))
            }
        }
        (AttributeReader::ToOne { position, .. }, _) => {
            let key = row[*position].clone();
            let target = if key.is_null() {
                Lazy::Initialized(None)
            } else {
                Lazy::Uninitialized
            };
            Slot::ToOne { key, target }
        }
        (AttributeReader::Deferred, AttributeTy::ToOne(_)) => Slot::ToOne {
            key: Value::Null,
            target: Lazy::Uninitialized,
        },
        (AttributeReader::Deferred, AttributeTy::Collection(_)) => {
            Slot::Collection(Lazy::Uninitialized)
        }
        (AttributeReader::Deferred, _) => Slot::Value(Value::Null),
    }
}

/// Points unresolved to-one references at instances already managed.
pub(crate) fn link_references(engine: &Engine, context: &PersistenceContext, instance: &EntityRef) {
    let schema = &engine.schema;
    let mut data = instance.data_mut();
    let model = schema.entity(data.entity);

    for (attr, slot) in model.attributes.iter().zip(data.slots.iter_mut()) {
        let (AttributeTy::ToOne(to_one), Slot::ToOne { key, target }) = (&attr.ty, slot) else {
            continue;
        };
        if target.is_initialized() || key.is_null() {
            continue;
        }
        let key = EntityKey::new(schema.entity(to_one.target).root, key.clone());
        if let Some(existing) = context.get(&key).filter(|entry| !entry.is_deleted()) {
            *target = Lazy::Initialized(Some(existing.instance.clone()));
        }
    }
}

/// Collection roles are named after the declaring entity so subclasses
/// share one region and one batch queue.
pub(crate) fn role_of(attr: &Attribute) -> AttributeId {
    AttributeId {
        entity: attr.declaring,
        index: attr.id.index,
    }
}
