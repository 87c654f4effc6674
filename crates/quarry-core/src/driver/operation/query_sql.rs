use super::Operation;

use crate::stmt;

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct QuerySql {
    /// The rendered SQL text
    pub sql: String,

    /// Parameter values, in placeholder order
    pub params: Vec<stmt::Value>,

    /// Column types of the returned rows. `None` when the statement only
    /// reports an update count.
    pub ret: Option<Vec<stmt::Type>>,

    /// Statement timeout, passed through to the database
    pub timeout: Option<Duration>,

    /// Rows are read from the database as the returned stream is polled,
    /// instead of before the response is returned.
    pub cursor: bool,
}

impl From<QuerySql> for Operation {
    fn from(value: QuerySql) -> Self {
        Self::QuerySql(value)
    }
}
