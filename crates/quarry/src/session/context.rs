use crate::{
    engine::{lower::EnabledFilters, Bindings},
    entity::EntityRef,
};

use quarry_core::{
    schema::app::{AttributeId, EntityId},
    sqm::{FromId, SqmSelectStatement},
    stmt::Value,
    Schema,
};

use indexmap::{IndexMap, IndexSet};
use std::{collections::HashMap, rc::Rc};

/// Identity of a persistent instance: the hierarchy root and the
/// identifier. Subclass instances share the root's identity space.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct EntityKey {
    pub(crate) root: EntityId,
    pub(crate) id: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EntryStatus {
    Managed,

    /// Removed; the delete is issued on the next flush
    Deleted,
}

#[derive(Debug)]
pub(crate) struct EntityEntry {
    pub(crate) instance: EntityRef,
    pub(crate) status: EntryStatus,

    /// State as last read from or written to the database. `None` while the
    /// insert is pending or the instance is an unloaded proxy.
    pub(crate) loaded: Option<Vec<Value>>,

    /// Element keys of each initialized collection as last synchronized,
    /// by attribute index
    pub(crate) collections: HashMap<usize, Vec<Value>>,

    /// Set when the row exists in the database
    pub(crate) exists: bool,
}

/// The query that loaded a set of owners, kept so their subselect-fetched
/// collections can be loaded for all of them at once.
#[derive(Debug)]
pub(crate) struct SubselectFetch {
    pub(crate) stmt: SqmSelectStatement,
    pub(crate) bindings: Bindings,
    pub(crate) filters: EnabledFilters,

    /// From element of the owners in `stmt`
    pub(crate) owner: FromId,

    /// Identifiers of every owner the query returned
    pub(crate) keys: Vec<Value>,
}

/// Keys of proxies and collections waiting to be initialized, so one load
/// can pick up the siblings of the instance being accessed.
#[derive(Debug, Default)]
pub(crate) struct BatchFetchQueue {
    entities: HashMap<EntityId, IndexSet<Value>>,
    collections: HashMap<AttributeId, IndexSet<Value>>,
}

/// The first-level cache of a session.
#[derive(Debug, Default)]
pub(crate) struct PersistenceContext {
    /// In the order instances became managed; flush inserts and deletes
    /// follow it.
    entities: IndexMap<EntityKey, EntityEntry>,

    pub(crate) batch: BatchFetchQueue,

    subselects: HashMap<(AttributeId, Value), Rc<SubselectFetch>>,
}

impl EntityKey {
    pub(crate) fn new(root: EntityId, id: Value) -> EntityKey {
        EntityKey { root, id }
    }

    pub(crate) fn of(schema: &Schema, instance: &EntityRef) -> EntityKey {
        let data = instance.data();
        EntityKey {
            root: schema.entity(data.entity).root,
            id: data.id().clone(),
        }
    }
}

impl EntityEntry {
    /// An instance read from the database.
    pub(crate) fn loaded(instance: EntityRef, state: Vec<Value>) -> EntityEntry {
        EntityEntry {
            instance,
            status: EntryStatus::Managed,
            loaded: Some(state),
            collections: HashMap::new(),
            exists: true,
        }
    }

    /// A proxy standing for a row that has not been read.
    pub(crate) fn proxy(instance: EntityRef) -> EntityEntry {
        EntityEntry {
            instance,
            status: EntryStatus::Managed,
            loaded: None,
            collections: HashMap::new(),
            exists: true,
        }
    }

    /// A new instance waiting to be inserted.
    pub(crate) fn pending(instance: EntityRef) -> EntityEntry {
        EntityEntry {
            instance,
            status: EntryStatus::Managed,
            loaded: None,
            collections: HashMap::new(),
            exists: false,
        }
    }

    pub(crate) fn is_deleted(&self) -> bool {
        self.status == EntryStatus::Deleted
    }
}

impl PersistenceContext {
    pub(crate) fn get(&self, key: &EntityKey) -> Option<&EntityEntry> {
        self.entities.get(key)
    }

    pub(crate) fn get_mut(&mut self, key: &EntityKey) -> Option<&mut EntityEntry> {
        self.entities.get_mut(key)
    }

    /// The entry managing exactly `instance`, not merely an instance with
    /// the same identity.
    pub(crate) fn entry_of(&self, schema: &Schema, instance: &EntityRef) -> Option<&EntityEntry> {
        self.entities
            .get(&EntityKey::of(schema, instance))
            .filter(|entry| entry.instance.ptr_eq(instance))
    }

    pub(crate) fn entry_of_mut(
        &mut self,
        schema: &Schema,
        instance: &EntityRef,
    ) -> Option<&mut EntityEntry> {
        self.entities
            .get_mut(&EntityKey::of(schema, instance))
            .filter(|entry| entry.instance.ptr_eq(instance))
    }

    pub(crate) fn contains(&self, schema: &Schema, instance: &EntityRef) -> bool {
        self.entry_of(schema, instance)
            .is_some_and(|entry| !entry.is_deleted())
    }

    pub(crate) fn instance(&self, key: &EntityKey) -> Option<EntityRef> {
        self.entities.get(key).map(|entry| entry.instance.clone())
    }

    pub(crate) fn insert(&mut self, key: EntityKey, entry: EntityEntry) {
        self.entities.insert(key, entry);
    }

    pub(crate) fn remove(&mut self, key: &EntityKey) -> Option<EntityEntry> {
        self.batch.remove_entity(key.root, &key.id);
        self.subselects.retain(|(_, owner), _| *owner != key.id);
        self.entities.shift_remove(key)
    }

    pub(crate) fn entries(&self) -> impl Iterator<Item = (&EntityKey, &EntityEntry)> + '_ {
        self.entities.iter()
    }

    pub(crate) fn len(&self) -> usize {
        self.entities.len()
    }

    pub(crate) fn add_subselect(&mut self, role: AttributeId, fetch: Rc<SubselectFetch>) {
        for key in &fetch.keys {
            self.subselects.insert((role, key.clone()), fetch.clone());
        }
    }

    pub(crate) fn subselect(&self, role: AttributeId, owner: &Value) -> Option<Rc<SubselectFetch>> {
        self.subselects.get(&(role, owner.clone())).cloned()
    }

    pub(crate) fn remove_subselect(&mut self, role: AttributeId, owner: &Value) {
        self.subselects.remove(&(role, owner.clone()));
    }

    pub(crate) fn clear(&mut self) {
        self.entities.clear();
        self.batch = BatchFetchQueue::default();
        self.subselects.clear();
    }
}

impl BatchFetchQueue {
    pub(crate) fn add_entity(&mut self, root: EntityId, id: Value) {
        self.entities.entry(root).or_default().insert(id);
    }

    pub(crate) fn remove_entity(&mut self, root: EntityId, id: &Value) {
        if let Some(ids) = self.entities.get_mut(&root) {
            ids.shift_remove(id);
        }
    }

    /// `id` followed by up to `size - 1` other queued identifiers of the
    /// same hierarchy.
    pub(crate) fn entity_batch(&self, root: EntityId, id: &Value, size: usize) -> Vec<Value> {
        batch(self.entities.get(&root), id, size)
    }

    pub(crate) fn add_collection(&mut self, role: AttributeId, owner: Value) {
        self.collections.entry(role).or_default().insert(owner);
    }

    pub(crate) fn remove_collection(&mut self, role: AttributeId, owner: &Value) {
        if let Some(owners) = self.collections.get_mut(&role) {
            owners.shift_remove(owner);
        }
    }

    pub(crate) fn collection_batch(&self, role: AttributeId, owner: &Value, size: usize) -> Vec<Value> {
        batch(self.collections.get(&role), owner, size)
    }
}

fn batch(queued: Option<&IndexSet<Value>>, first: &Value, size: usize) -> Vec<Value> {
    let mut keys = vec![first.clone()];
    if let Some(queued) = queued {
        keys.extend(
            queued
                .iter()
                .filter(|key| *key != first)
                .take(size.saturating_sub(1))
                .cloned(),
        );
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_starts_with_the_requested_key() {
        let mut queue = BatchFetchQueue::default();
        let root = EntityId(0);
        for id in 1..=5 {
            queue.add_entity(root, Value::I64(id));
        }

        let batch = queue.entity_batch(root, &Value::I64(3), 3);
        assert_eq!(batch, vec![Value::I64(3), Value::I64(1), Value::I64(2)]);

        queue.remove_entity(root, &Value::I64(1));
        let batch = queue.entity_batch(root, &Value::I64(3), 10);
        assert_eq!(batch.len(), 4);
    }

    #[test]
    fn unqueued_key_is_loaded_alone() {
        let queue = BatchFetchQueue::default();
        let role = AttributeId {
            entity: EntityId(1),
            index: 2,
        };
        assert_eq!(
            queue.collection_batch(role, &Value::I64(7), 16),
            vec![Value::I64(7)]
        );
    }
}
