pub mod cache;
pub use cache::{CacheEntry, CacheRegion, InMemoryRegionFactory, RegionFactory};

mod engine;

mod entity;
pub use entity::{Element, EntityRef};

pub mod factory;
pub use factory::{Builder, SessionFactory, Settings};

mod graph;
pub use graph::{EntityGraph, GraphSemantic};

mod query;
pub use query::{LockMode, MutationQuery, Query, Row, RowValue, ScrollableResults};

mod session;
pub use session::Session;

mod stats;
pub use stats::{StatementInspector, Statistics};

pub use quarry_core::{
    driver,
    schema::{self, Schema},
    sqm::{self, criteria},
    stmt::{Type, Value},
    Error, Result,
};
