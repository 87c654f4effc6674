mod builder;
pub use builder::Builder;

mod connect;

mod settings;
pub use settings::Settings;

use crate::{engine::Engine, stats::Statistics, Session};

use quarry_core::{driver::Driver, sqm::criteria::CriteriaBuilder, stmt::Value, Error, Result, Schema};

use std::sync::Arc;

/// State shared by a factory and every session it opens.
pub(crate) struct Shared {
    pub(crate) engine: Engine,
    pub(crate) driver: Box<dyn Driver>,
}

/// Thread-safe, immutable entry point: owns the metamodel, the dialect, the
/// function registry, the statistics, and the second-level cache.
///
/// Cloning is cheap; every clone shares the same state.
#[derive(Clone)]
pub struct SessionFactory {
    pub(crate) shared: Arc<Shared>,
}

impl SessionFactory {
    pub fn builder() -> Builder {
        Builder::default()
    }

    pub fn open_session(&self) -> Session {
        Session::new(self.shared.clone(), None)
    }

    /// Opens a session bound to `tenant`. Every entity with a tenant
    /// attribute is restricted to the tenant's rows, and new entities are
    /// stamped with it.
    pub fn open_session_for_tenant(&self, tenant: impl Into<Value>) -> Result<Session> {
        let Some(ty) = &self.shared.engine.schema.app.tenant_ty else {
            return Err(Error::illegal_argument(
                "no entity declares a tenant attribute",
            ));
        };
        let tenant = ty.cast(tenant.into())?;
        Ok(Session::new(self.shared.clone(), Some(tenant)))
    }

    /// Creates every table of the schema that does not exist yet.
    pub async fn push_schema(&self) -> Result<()> {
        let mut connection = self.shared.driver.connect().await?;
        connection.push_schema(&self.shared.engine.schema.db).await
    }

    pub fn statistics(&self) -> &Statistics {
        &self.shared.engine.stats
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.shared.engine.schema
    }

    /// A builder for criteria queries against this factory's schema and
    /// functions.
    pub fn criteria_builder(&self) -> CriteriaBuilder {
        let engine = &self.shared.engine;
        if engine.settings.criteria_copy_tree {
            CriteriaBuilder::with_copy_tree(engine.schema.clone(), engine.functions.clone())
        } else {
            CriteriaBuilder::new(engine.schema.clone(), engine.functions.clone())
        }
    }
}

impl std::fmt::Debug for SessionFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionFactory")
            .field("url", &self.shared.driver.url())
            .finish()
    }
}
