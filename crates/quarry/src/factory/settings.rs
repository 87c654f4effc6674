use std::time::Duration;

/// Factory-wide behavior switches.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Batch size applied to associations mapped with plain select fetching.
    pub default_batch_fetch_size: Option<usize>,

    /// Passed to the driver with every statement.
    pub statement_timeout: Option<Duration>,

    /// Copy criteria trees when a query is created from them, so later
    /// changes to the criteria do not leak into the query.
    pub criteria_copy_tree: bool,

    /// Log every statement at `info` in addition to the `debug` SQL log.
    pub show_sql: bool,

    /// Flush pending changes before executing a query.
    pub auto_flush: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            default_batch_fetch_size: None,
            statement_timeout: None,
            criteria_copy_tree: false,
            show_sql: false,
            auto_flush: true,
        }
    }
}
