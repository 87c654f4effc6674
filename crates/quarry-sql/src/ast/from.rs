use super::{JoinKind, Predicate, SelectStatement};

/// The tables one from element reads: a primary reference plus the tables
/// joined to it by key (secondary and inheritance tables), and the groups
/// joined onto it.
#[derive(Debug, Clone, PartialEq)]
pub struct TableGroup {
    pub primary: TableReference,
    pub table_joins: Vec<TableJoin>,
    pub group_joins: Vec<TableGroupJoin>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TableReference {
    /// A table or CTE by name
    Table { name: String, alias: String },

    /// A subquery; selection aliases name its columns
    Derived {
        query: Box<SelectStatement>,
        alias: String,
    },
}

/// A table joined inside a group on the group's key.
#[derive(Debug, Clone, PartialEq)]
pub struct TableJoin {
    pub kind: JoinKind,
    pub table: TableReference,
    pub on: Predicate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableGroupJoin {
    pub kind: JoinKind,
    pub group: TableGroup,

    /// `None` only for cross joins
    pub on: Option<Predicate>,
}

impl TableGroup {
    pub fn new(primary: TableReference) -> TableGroup {
        TableGroup {
            primary,
            table_joins: vec![],
            group_joins: vec![],
        }
    }
}

impl TableReference {
    pub fn table(name: impl Into<String>, alias: impl Into<String>) -> TableReference {
        TableReference::Table {
            name: name.into(),
            alias: alias.into(),
        }
    }

    pub fn alias(&self) -> &str {
        match self {
            TableReference::Table { alias, .. } | TableReference::Derived { alias, .. } => alias,
        }
    }
}
