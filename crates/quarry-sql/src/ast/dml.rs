use super::{Expr, Predicate, SelectStatement};

#[derive(Debug, Clone, PartialEq)]
pub struct InsertStatement {
    pub table: String,
    pub columns: Vec<String>,
    pub source: InsertSource,

    /// Columns whose generated values are read back
    pub returning: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InsertSource {
    /// One or more rows
    Values(Vec<Vec<Expr>>),
    Select(Box<SelectStatement>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateStatement {
    pub table: String,
    pub assignments: Vec<Assignment>,
    pub where_: Option<Predicate>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub column: String,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteStatement {
    pub table: String,
    pub where_: Option<Predicate>,
}

impl Assignment {
    pub fn new(column: impl Into<String>, value: impl Into<Expr>) -> Assignment {
        Assignment {
            column: column.into(),
            value: value.into(),
        }
    }
}
