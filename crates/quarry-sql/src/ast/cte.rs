use super::{Materialization, NullPrecedence, SearchKind, SelectStatement};
use quarry_core::stmt::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct With {
    /// Set when any CTE refers to itself
    pub recursive: bool,
    pub ctes: Vec<Cte>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Cte {
    pub name: String,
    pub columns: Vec<String>,
    pub query: Box<SelectStatement>,
    pub materialization: Materialization,

    /// Rendered natively; dialects without native support get a tree with
    /// the clauses already emulated
    pub search: Option<SearchClause>,
    pub cycle: Option<CycleClause>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchClause {
    pub kind: SearchKind,
    pub columns: Vec<(String, bool, Option<NullPrecedence>)>,
    pub set_column: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CycleClause {
    pub columns: Vec<String>,
    pub mark_column: String,
    pub cycle_value: Value,
    pub no_cycle_value: Value,
    pub path_column: String,
}
