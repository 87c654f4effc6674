mod capability;
pub use capability::{Capability, Dialect};

mod response;
pub use response::{Response, Rows};

pub mod operation;
pub use operation::Operation;

use crate::{async_trait, schema::db::Schema, Result};

use std::{borrow::Cow, fmt::Debug};

/// A database the session factory can open connections to.
#[async_trait]
pub trait Driver: Debug + Send + Sync + 'static {
    /// The connection URL this driver was configured with.
    fn url(&self) -> Cow<'_, str>;

    /// Describes the database dialect, which informs the translator and the
    /// renderer.
    fn capability(&self) -> &'static Capability;

    /// Opens a new connection.
    async fn connect(&self) -> Result<Box<dyn Connection>>;
}

#[async_trait]
pub trait Connection: Debug + Send + 'static {
    /// Execute a database operation
    async fn exec(&mut self, op: Operation) -> Result<Response>;

    /// Creates the tables of `schema`.
    async fn push_schema(&mut self, schema: &Schema) -> Result<()>;
}
