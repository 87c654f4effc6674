//! Everything between a semantic query tree and assembled entities.
//!
//! [`lower`] translates SQM into the SQL AST, [`exec`] binds, renders, and
//! runs statements, [`load`] builds the statements the session issues on
//! its own (by-id loads, collection loads), and [`assemble`] turns rows
//! back into managed entities.

pub(crate) mod assemble;
pub(crate) mod exec;
pub(crate) mod load;
pub(crate) mod lower;
pub(crate) mod plan;

pub(crate) use exec::{Bindings, ResourceGuard, ResourceRegistry};

use crate::{
    cache::{CacheRegion, RegionFactory},
    factory::Settings,
    stats::{StatementInspector, Statistics},
};

use quarry_core::{
    driver::Capability,
    schema::app::{AttributeId, EntityId},
    sqm::FunctionRegistry,
    Schema,
};
use quarry_sql::Serializer;

use std::sync::Arc;

/// Factory-wide state shared by every session.
pub(crate) struct Engine {
    pub(crate) schema: Arc<Schema>,

    pub(crate) functions: Arc<FunctionRegistry>,

    /// Renders the SQL AST in the driver's dialect
    pub(crate) serializer: Serializer,

    pub(crate) settings: Settings,

    pub(crate) cache: Option<Arc<dyn RegionFactory>>,

    pub(crate) inspector: Option<Arc<dyn StatementInspector>>,

    pub(crate) stats: Arc<Statistics>,
}

impl Engine {
    pub(crate) fn capability(&self) -> &'static Capability {
        self.serializer.capability()
    }

    /// The region caching `entity`'s hierarchy, if the hierarchy is cached
    /// and a cache is configured.
    pub(crate) fn entity_region(&self, entity: EntityId) -> Option<Arc<dyn CacheRegion>> {
        let cache = self.cache.as_ref()?;
        let root = self.schema.entity(entity).root;
        let config = self.schema.entity(root).cache.as_ref()?;
        Some(cache.region(&config.region, config.access))
    }

    pub(crate) fn collection_region(&self, attribute: AttributeId) -> Option<Arc<dyn CacheRegion>> {
        let cache = self.cache.as_ref()?;
        let config = self
            .schema
            .attribute(attribute)
            .as_collection()?
            .cache
            .as_ref()?;
        Some(cache.region(&config.region, config.access))
    }
}
