//! Second-level cache contract.
//!
//! The cache itself lives outside the session; the core only reads and
//! writes disassembled state through [`CacheRegion`]. Regions are created
//! per entity hierarchy (named after the root entity) and per collection
//! role (`Entity.attribute`).

use quarry_core::{
    schema::app::{AccessType, EntityId},
    stmt::Value,
};

use dashmap::DashMap;
use std::{fmt, sync::Arc};

/// Creates the regions a factory caches into.
pub trait RegionFactory: Send + Sync + fmt::Debug {
    fn region(&self, name: &str, access: AccessType) -> Arc<dyn CacheRegion>;
}

pub trait CacheRegion: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn access(&self) -> AccessType;

    fn get(&self, key: &Value) -> Option<CacheEntry>;

    fn put(&self, key: Value, entry: CacheEntry);

    fn evict(&self, key: &Value);

    fn clear(&self);

    fn contains(&self, key: &Value) -> bool {
        self.get(key).is_some()
    }
}

/// Disassembled state stored in a region.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEntry {
    /// Per-attribute state of an entity: basic and embedded values, the key
    /// of each to-one reference, `Null` for collections.
    Entity {
        entity: EntityId,
        state: Vec<Value>,
        version: Option<Value>,
    },

    /// Element identifiers (entity collections) or element values.
    Collection(Vec<Value>),
}

/// Regions backed by concurrent hash maps, living as long as the factory.
#[derive(Debug, Default)]
pub struct InMemoryRegionFactory {
    regions: DashMap<String, Arc<InMemoryRegion>>,
}

#[derive(Debug)]
pub struct InMemoryRegion {
    name: String,
    access: AccessType,
    entries: DashMap<Value, CacheEntry>,
}

impl InMemoryRegionFactory {
    pub fn new() -> InMemoryRegionFactory {
        InMemoryRegionFactory::default()
    }

    /// Number of entries across all regions.
    pub fn len(&self) -> usize {
        self.regions
            .iter()
            .map(|region| region.entries.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RegionFactory for InMemoryRegionFactory {
    fn region(&self, name: &str, access: AccessType) -> Arc<dyn CacheRegion> {
        self.regions
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(InMemoryRegion {
                    name: name.to_string(),
                    access,
                    entries: DashMap::new(),
                })
            })
            .clone()
    }
}

impl CacheRegion for InMemoryRegion {
    fn name(&self) -> &str {
        &self.name
    }

    fn access(&self) -> AccessType {
        self.access
    }

    fn get(&self, key: &Value) -> Option<CacheEntry> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    fn put(&self, key: Value, entry: CacheEntry) {
        self.entries.insert(key, entry);
    }

    fn evict(&self, key: &Value) {
        self.entries.remove(key);
    }

    fn clear(&self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regions_are_shared_by_name() {
        let factory = InMemoryRegionFactory::new();
        let a = factory.region("Person", AccessType::ReadWrite);
        let b = factory.region("Person", AccessType::ReadWrite);

        a.put(Value::I64(1), CacheEntry::Collection(vec![Value::I64(7)]));
        assert_eq!(
            b.get(&Value::I32(1)),
            Some(CacheEntry::Collection(vec![Value::I64(7)]))
        );

        b.evict(&Value::I64(1));
        assert!(!a.contains(&Value::I64(1)));
        assert!(factory.is_empty());
    }
}
