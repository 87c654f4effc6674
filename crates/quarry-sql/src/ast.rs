//! The dialect-neutral SQL tree.
//!
//! Nodes carry relational meaning only: tables, aliases, columns, and
//! parameters. Entity, attribute, and path semantics are gone by the time a
//! tree is built. `Expr` and `Predicate` are closed enums, so the serializer
//! and the visitors match every kind exhaustively.

mod create_table;
pub use create_table::{ColumnDef, CreateTable};

mod cte;
pub use cte::{Cte, CycleClause, SearchClause, With};

mod dml;
pub use dml::{Assignment, DeleteStatement, InsertSource, InsertStatement, UpdateStatement};

mod expr;
pub use expr::{ColumnRef, Expr, FunctionCall};

mod from;
pub use from::{TableGroup, TableGroupJoin, TableJoin, TableReference};

mod param;
pub use param::JdbcParameter;

mod predicate;
pub use predicate::Predicate;

mod query;
pub use query::{LockMode, QueryGroup, QueryPart, QuerySpec, SelectItem, SelectStatement, SortSpec};

pub mod visit_mut;
pub use visit_mut::VisitMut;

pub use quarry_core::sqm::{
    ArithmeticOp, ComparisonOp, JoinKind, JunctionKind, Materialization, NullPrecedence,
    SearchKind, SetOperator,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Select(SelectStatement),
    Insert(InsertStatement),
    Update(UpdateStatement),
    Delete(DeleteStatement),
    CreateTable(CreateTable),
}

impl Statement {
    pub fn is_select(&self) -> bool {
        matches!(self, Statement::Select(_))
    }

    pub fn as_select(&self) -> Option<&SelectStatement> {
        match self {
            Statement::Select(select) => Some(select),
            _ => None,
        }
    }

    /// Number of columns each returned row holds, if the statement returns
    /// rows.
    pub fn returning_len(&self) -> Option<usize> {
        match self {
            Statement::Select(select) => Some(select.body.first_spec().select.len()),
            Statement::Insert(insert) if !insert.returning.is_empty() => {
                Some(insert.returning.len())
            }
            _ => None,
        }
    }
}

impl From<SelectStatement> for Statement {
    fn from(value: SelectStatement) -> Self {
        Statement::Select(value)
    }
}

impl From<InsertStatement> for Statement {
    fn from(value: InsertStatement) -> Self {
        Statement::Insert(value)
    }
}

impl From<UpdateStatement> for Statement {
    fn from(value: UpdateStatement) -> Self {
        Statement::Update(value)
    }
}

impl From<DeleteStatement> for Statement {
    fn from(value: DeleteStatement) -> Self {
        Statement::Delete(value)
    }
}

impl From<CreateTable> for Statement {
    fn from(value: CreateTable) -> Self {
        Statement::CreateTable(value)
    }
}
