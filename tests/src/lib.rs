//! Shared harness for the integration tests: an in-memory SQLite factory
//! with a statement recorder attached, and the schemas the tests map.

mod inspector;
pub use inspector::RecordingInspector;

pub mod models;

use quarry::{driver::Driver, Builder, Schema, SessionFactory};
use quarry_driver_sqlite::Sqlite;

use std::sync::Once;
use tracing_subscriber::EnvFilter;

/// Installs a subscriber honoring `RUST_LOG`, once per test binary.
///
/// `RUST_LOG=quarry::sql=debug` prints every statement.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// A factory over a fresh in-memory database with the schema pushed.
pub struct Fixture {
    pub factory: SessionFactory,

    /// Every statement sent through `factory`
    pub sql: RecordingInspector,
}

impl Fixture {
    pub async fn new(schema: Schema) -> Fixture {
        Fixture::with(schema, |_| {}).await
    }

    /// Like [`Fixture::new`], letting `configure` adjust the builder first.
    pub async fn with(schema: Schema, configure: impl FnOnce(&mut Builder)) -> Fixture {
        Fixture::with_driver(schema, Sqlite::in_memory().unwrap(), configure).await
    }

    /// A factory over `driver`, which must accept the pushed schema.
    pub async fn with_driver(
        schema: Schema,
        driver: impl Driver,
        configure: impl FnOnce(&mut Builder),
    ) -> Fixture {
        init_tracing();

        let sql = RecordingInspector::default();
        let mut builder = SessionFactory::builder();
        builder.schema(schema).statement_inspector(sql.clone());
        configure(&mut builder);

        let factory = builder.build(driver).unwrap();
        factory.push_schema().await.unwrap();

        Fixture { factory, sql }
    }
}
