use super::{connect, Settings, Shared};
use crate::{cache::RegionFactory, engine::Engine, stats::StatementInspector, SessionFactory};

use quarry_core::{
    driver::Driver, sqm::FunctionRegistry, stmt::Type, Error, Result, Schema,
};
use quarry_sql::Serializer;

use std::{sync::Arc, time::Duration};

#[derive(Default)]
pub struct Builder {
    schema: Option<Arc<Schema>>,
    settings: Settings,

    /// Registered on top of the dialect's built-in functions once the
    /// driver is known
    functions: Vec<CustomFunction>,

    cache: Option<Arc<dyn RegionFactory>>,
    inspector: Option<Arc<dyn StatementInspector>>,
}

struct CustomFunction {
    name: String,
    pattern: String,
    arity: usize,
    ret: Type,
}

impl Builder {
    pub fn schema(&mut self, schema: Schema) -> &mut Self {
        self.schema = Some(Arc::new(schema));
        self
    }

    pub fn settings(&mut self, settings: Settings) -> &mut Self {
        self.settings = settings;
        self
    }

    pub fn batch_fetch_size(&mut self, size: usize) -> &mut Self {
        self.settings.default_batch_fetch_size = Some(size).filter(|size| *size > 1);
        self
    }

    pub fn statement_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.settings.statement_timeout = Some(timeout);
        self
    }

    pub fn criteria_copy_tree(&mut self, copy: bool) -> &mut Self {
        self.settings.criteria_copy_tree = copy;
        self
    }

    pub fn show_sql(&mut self, show: bool) -> &mut Self {
        self.settings.show_sql = show;
        self
    }

    pub fn auto_flush(&mut self, auto_flush: bool) -> &mut Self {
        self.settings.auto_flush = auto_flush;
        self
    }

    /// Registers a function rendered from `pattern`, where `?1`, `?2`, …
    /// stand for the arguments.
    pub fn register_function(
        &mut self,
        name: &str,
        pattern: &str,
        arity: usize,
        ret: Type,
    ) -> &mut Self {
        self.functions.push(CustomFunction {
            name: name.to_ascii_lowercase(),
            pattern: pattern.to_string(),
            arity,
            ret,
        });
        self
    }

    pub fn second_level_cache(&mut self, factory: impl RegionFactory + 'static) -> &mut Self {
        self.cache = Some(Arc::new(factory));
        self
    }

    pub fn statement_inspector(
        &mut self,
        inspector: impl StatementInspector + 'static,
    ) -> &mut Self {
        self.inspector = Some(Arc::new(inspector));
        self
    }

    /// Builds a factory for the database at `url`, e.g. `sqlite::memory:`.
    pub fn connect(&mut self, url: &str) -> Result<SessionFactory> {
        let driver = connect::driver_for_url(url)?;
        self.build_boxed(driver)
    }

    pub fn build(&mut self, driver: impl Driver) -> Result<SessionFactory> {
        self.build_boxed(Box::new(driver))
    }

    fn build_boxed(&mut self, driver: Box<dyn Driver>) -> Result<SessionFactory> {
        let Some(schema) = self.schema.clone() else {
            return Err(Error::illegal_argument(
                "a session factory needs a schema; call `Builder::schema` first",
            ));
        };

        let dialect = driver.capability().dialect;

        let mut functions = FunctionRegistry::new(dialect);
        for function in &self.functions {
            functions.register_pattern(
                &function.name,
                &function.pattern,
                function.arity,
                function.ret.clone(),
            );
        }

        tracing::debug!(url = %driver.url(), ?dialect, "building session factory");

        let engine = Engine {
            schema,
            functions: Arc::new(functions),
            serializer: Serializer::for_dialect(dialect),
            settings: self.settings.clone(),
            cache: self.cache.clone(),
            inspector: self.inspector.clone(),
            stats: Arc::default(),
        };

        Ok(SessionFactory {
            shared: Arc::new(Shared { engine, driver }),
        })
    }
}
