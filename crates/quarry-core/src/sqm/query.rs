use super::{SqmCteStatement, SqmExpr, SqmFromClause, SqmPredicate};
use crate::stmt::Type;

/// A query expression with the CTEs it declares.
#[derive(Debug, Clone, PartialEq)]
pub struct SqmQuery {
    pub ctes: Vec<SqmCteStatement>,
    pub body: SqmQueryPart,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SqmQueryPart {
    Spec(Box<SqmQuerySpec>),
    Group(Box<SqmQueryGroup>),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SqmQuerySpec {
    pub distinct: bool,
    pub from: SqmFromClause,
    pub select: Vec<SqmSelection>,
    pub where_: Option<SqmPredicate>,
    pub group_by: Vec<SqmExpr>,
    pub having: Option<SqmPredicate>,
    pub order_by: Vec<SqmSortSpec>,
    pub offset: Option<SqmExpr>,
    pub fetch: Option<SqmExpr>,
}

/// Parts combined by a set operator.
#[derive(Debug, Clone, PartialEq)]
pub struct SqmQueryGroup {
    pub op: SetOperator,
    pub parts: Vec<SqmQueryPart>,
    pub order_by: Vec<SqmSortSpec>,
    pub offset: Option<SqmExpr>,
    pub fetch: Option<SqmExpr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SqmSelection {
    pub expr: SqmExpr,
    pub alias: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SqmSortSpec {
    pub expr: SqmExpr,
    pub desc: bool,
    pub nulls: Option<NullPrecedence>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOperator {
    Union,
    UnionAll,
    Intersect,
    IntersectAll,
    Except,
    ExceptAll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullPrecedence {
    First,
    Last,
}

impl SqmQuery {
    pub fn spec(spec: SqmQuerySpec) -> SqmQuery {
        SqmQuery {
            ctes: vec![],
            body: SqmQueryPart::Spec(Box::new(spec)),
        }
    }

    /// The first query spec, following the leftmost arm of set operations.
    pub fn first_spec(&self) -> &SqmQuerySpec {
        self.body.first_spec()
    }

    /// Types of the selected expressions.
    pub fn selection_tys(&self) -> Vec<Type> {
        self.first_spec()
            .select
            .iter()
            .map(|selection| selection.expr.ty())
            .collect()
    }

    /// True when the query restricts the number of rows it returns.
    pub fn has_limit(&self) -> bool {
        match &self.body {
            SqmQueryPart::Spec(spec) => spec.offset.is_some() || spec.fetch.is_some(),
            SqmQueryPart::Group(group) => group.offset.is_some() || group.fetch.is_some(),
        }
    }
}

impl SqmQueryPart {
    pub fn first_spec(&self) -> &SqmQuerySpec {
        match self {
            SqmQueryPart::Spec(spec) => spec,
            SqmQueryPart::Group(group) => group.parts[0].first_spec(),
        }
    }

    pub fn as_spec(&self) -> Option<&SqmQuerySpec> {
        match self {
            SqmQueryPart::Spec(spec) => Some(spec),
            SqmQueryPart::Group(_) => None,
        }
    }
}

impl SetOperator {
    pub fn as_str(self) -> &'static str {
        match self {
            SetOperator::Union => "union",
            SetOperator::UnionAll => "union all",
            SetOperator::Intersect => "intersect",
            SetOperator::IntersectAll => "intersect all",
            SetOperator::Except => "except",
            SetOperator::ExceptAll => "except all",
        }
    }
}
