use super::{Expr, NullPrecedence, Predicate, SetOperator, TableGroup, With};

/// A query expression: optional CTEs, a body, and an optional row lock.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectStatement {
    pub with: Option<With>,
    pub body: QueryPart,
    pub lock: Option<LockMode>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryPart {
    Spec(Box<QuerySpec>),
    Group(Box<QueryGroup>),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuerySpec {
    pub distinct: bool,
    pub select: Vec<SelectItem>,
    pub from: Vec<TableGroup>,
    pub where_: Option<Predicate>,
    pub group_by: Vec<Expr>,
    pub having: Option<Predicate>,
    pub order_by: Vec<SortSpec>,
    pub offset: Option<Expr>,
    pub fetch: Option<Expr>,
}

/// Parts combined by one set operator. Sort items reference the selection
/// by position.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryGroup {
    pub op: SetOperator,
    pub parts: Vec<QueryPart>,
    pub order_by: Vec<SortSpec>,
    pub offset: Option<Expr>,
    pub fetch: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectItem {
    pub expr: Expr,
    pub alias: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortSpec {
    pub expr: Expr,
    pub desc: bool,
    pub nulls: Option<NullPrecedence>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Exclusive row lock
    Update,

    /// Shared row lock
    Share,
}

impl SelectStatement {
    pub fn new(body: QueryPart) -> SelectStatement {
        SelectStatement {
            with: None,
            body,
            lock: None,
        }
    }

    pub fn spec(spec: QuerySpec) -> SelectStatement {
        SelectStatement::new(QueryPart::Spec(Box::new(spec)))
    }
}

impl QueryPart {
    pub fn first_spec(&self) -> &QuerySpec {
        match self {
            QueryPart::Spec(spec) => spec,
            QueryPart::Group(group) => group.parts[0].first_spec(),
        }
    }

    pub fn as_spec_mut(&mut self) -> Option<&mut QuerySpec> {
        match self {
            QueryPart::Spec(spec) => Some(spec),
            QueryPart::Group(_) => None,
        }
    }

    pub fn has_limit(&self) -> bool {
        match self {
            QueryPart::Spec(spec) => spec.offset.is_some() || spec.fetch.is_some(),
            QueryPart::Group(group) => group.offset.is_some() || group.fetch.is_some(),
        }
    }

    pub fn has_order_by(&self) -> bool {
        match self {
            QueryPart::Spec(spec) => !spec.order_by.is_empty(),
            QueryPart::Group(group) => !group.order_by.is_empty(),
        }
    }
}

impl SelectItem {
    pub fn new(expr: impl Into<Expr>) -> SelectItem {
        SelectItem {
            expr: expr.into(),
            alias: None,
        }
    }

    pub fn aliased(expr: impl Into<Expr>, alias: impl Into<String>) -> SelectItem {
        SelectItem {
            expr: expr.into(),
            alias: Some(alias.into()),
        }
    }
}

impl SortSpec {
    pub fn asc(expr: impl Into<Expr>) -> SortSpec {
        SortSpec {
            expr: expr.into(),
            desc: false,
            nulls: None,
        }
    }
}
