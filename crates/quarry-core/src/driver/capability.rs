/// The SQL dialects the renderer knows how to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    Sqlite,
    Postgresql,
    Mysql,
    SqlServer,
}

#[derive(Debug)]
pub struct Capability {
    pub dialect: Dialect,

    /// Supports `with recursive`.
    pub recursive_cte: bool,

    /// Renders `search` / `cycle` clauses natively on recursive CTEs.
    pub cte_search_cycle: bool,

    /// Recursive CTE `search` / `cycle` clauses can be emulated with
    /// synthetic path and marker columns.
    pub cte_search_cycle_emulation: bool,

    /// Supports returning generated values from `insert`.
    pub insert_returning: bool,

    /// Supports row-level locking.
    pub select_for_update: bool,

    /// Boolean columns are stored as native booleans rather than integers.
    pub native_bool: bool,
}

impl Capability {
    /// SQLite capabilities.
    pub const SQLITE: Self = Self {
        dialect: Dialect::Sqlite,
        recursive_cte: true,
        cte_search_cycle: false,
        cte_search_cycle_emulation: true,
        insert_returning: true,
        select_for_update: false,
        native_bool: false,
    };

    /// PostgreSQL capabilities
    pub const POSTGRESQL: Self = Self {
        dialect: Dialect::Postgresql,
        cte_search_cycle: true,
        cte_search_cycle_emulation: false,
        select_for_update: true,
        native_bool: true,
        ..Self::SQLITE
    };

    /// MySQL capabilities
    pub const MYSQL: Self = Self {
        dialect: Dialect::Mysql,
        cte_search_cycle_emulation: false,
        insert_returning: false,
        select_for_update: true,
        ..Self::SQLITE
    };

    /// SQL Server capabilities
    pub const SQLSERVER: Self = Self {
        dialect: Dialect::SqlServer,
        cte_search_cycle_emulation: false,
        select_for_update: true,
        ..Self::SQLITE
    };

    pub fn for_dialect(dialect: Dialect) -> &'static Capability {
        match dialect {
            Dialect::Sqlite => &Self::SQLITE,
            Dialect::Postgresql => &Self::POSTGRESQL,
            Dialect::Mysql => &Self::MYSQL,
            Dialect::SqlServer => &Self::SQLSERVER,
        }
    }
}
