//! Syntax tree produced by the parser, before any name is resolved.

use crate::sqm::{
    ArithmeticOp, ComparisonOp, JoinKind, Materialization, NullPrecedence, SearchKind,
    SetOperator,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Select(Query),
    Update(Update),
    Delete(Delete),
    Insert(Insert),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub ctes: Vec<Cte>,
    pub body: QueryBody,
    pub order_by: Vec<SortItem>,
    pub offset: Option<Expr>,
    pub fetch: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryBody {
    Spec(Box<QuerySpec>),
    Nested(Box<Query>),
    Set {
        op: SetOperator,
        lhs: Box<QueryBody>,
        rhs: Box<QueryBody>,
    },
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct QuerySpec {
    pub distinct: bool,
    pub select: Vec<SelectItem>,
    pub from: Vec<FromRoot>,
    pub where_: Option<Predicate>,
    pub group_by: Vec<Expr>,
    pub having: Option<Predicate>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectItem {
    pub expr: Expr,
    pub alias: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FromRoot {
    /// Entity or CTE name, or `alias.attribute` in a correlated subquery
    pub path: Vec<String>,
    pub alias: Option<String>,
    pub joins: Vec<Join>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub kind: JoinKind,
    pub fetch: bool,

    /// `alias.attribute`, or an entity or CTE name
    pub path: Vec<String>,
    pub alias: Option<String>,
    pub on: Option<Predicate>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortItem {
    pub expr: Expr,
    pub desc: bool,
    pub nulls: Option<NullPrecedence>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Cte {
    pub name: String,
    pub columns: Option<Vec<String>>,
    pub materialization: Materialization,
    pub query: Query,
    pub search: Option<SearchClause>,
    pub cycle: Option<CycleClause>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchClause {
    pub kind: SearchKind,
    pub items: Vec<(String, bool, Option<NullPrecedence>)>,
    pub set_column: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CycleClause {
    pub columns: Vec<String>,
    pub mark_column: String,

    /// `to <cycle> default <no cycle>`; `true` / `false` when omitted
    pub values: Option<(Literal, Literal)>,

    pub path_column: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub entity: String,
    pub alias: Option<String>,
    pub assignments: Vec<(Vec<String>, Expr)>,
    pub where_: Option<Predicate>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Delete {
    pub entity: String,
    pub alias: Option<String>,
    pub where_: Option<Predicate>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Insert {
    pub entity: String,
    pub paths: Vec<Vec<String>>,
    pub source: InsertSource,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InsertSource {
    Values(Vec<Vec<Expr>>),
    Query(Query),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Path(Vec<String>),
    Literal(Literal),
    NamedParam(String),
    PositionalParam(usize),
    Function {
        name: String,
        args: Vec<Expr>,
        distinct: bool,
    },
    CountStar,
    Arithmetic {
        lhs: Box<Expr>,
        op: ArithmeticOp,
        rhs: Box<Expr>,
    },
    /// `a || b`
    Concat(Box<Expr>, Box<Expr>),
    Negate(Box<Expr>),
    Case {
        whens: Vec<(Predicate, Expr)>,
        otherwise: Option<Box<Expr>>,
    },
    Tuple(Vec<Expr>),
    Subquery(Box<Query>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Integer(i64),
    Decimal(f64),
    String(String),
    Bool(bool),
    Null,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Comparison {
        lhs: Expr,
        op: ComparisonOp,
        rhs: Expr,
    },
    Between {
        expr: Expr,
        low: Expr,
        high: Expr,
        negated: bool,
    },
    InList {
        expr: Expr,
        list: Vec<Expr>,
        negated: bool,
    },
    InSubquery {
        expr: Expr,
        query: Box<Query>,
        negated: bool,
    },
    Like {
        expr: Expr,
        pattern: Expr,
        escape: Option<char>,
        negated: bool,
    },
    IsNull {
        expr: Expr,
        negated: bool,
    },
    IsEmpty {
        path: Vec<String>,
        negated: bool,
    },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
    Exists(Box<Query>),
    Expr(Expr),
}

impl Query {
    /// True if any from clause of the query, outside nested subqueries,
    /// names `name`.
    pub fn references(&self, name: &str) -> bool {
        self.body.references(name)
    }
}

impl QueryBody {
    pub fn references(&self, name: &str) -> bool {
        match self {
            QueryBody::Spec(spec) => spec.from.iter().any(|root| {
                root.path == [name] || root.joins.iter().any(|join| join.path == [name])
            }),
            QueryBody::Nested(query) => query.references(name),
            QueryBody::Set { lhs, rhs, .. } => lhs.references(name) || rhs.references(name),
        }
    }
}
