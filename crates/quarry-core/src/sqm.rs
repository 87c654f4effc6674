//! The Semantic Query Model: a typed query tree bound to the metamodel.
//!
//! HQL text ([`crate::hql`]) and criteria calls ([`criteria`]) both produce
//! these types. Every expression carries its resolved [`Type`] and every path
//! has been resolved against the [`Schema`] when the tree is built, so the
//! translator never re-checks semantics.
//!
//! From elements, CTEs, and parameters are addressed by id ([`FromId`],
//! [`CteId`], [`ParamId`]) rather than by reference. A recursive CTE refers
//! to itself by id, which keeps the tree acyclic and cheap to copy.
//!
//! [`Type`]: crate::stmt::Type
//! [`Schema`]: crate::Schema

mod copy;
pub use copy::{SqmCopy, SqmCopyContext};

mod cte;
pub use cte::{
    CteAttribute, CteColumn, CteCycle, CteId, CteSearch, CteSearchItem, Materialization,
    SearchKind, SqmCteStatement,
};

pub mod criteria;

mod expr;
pub use expr::{ArithmeticOp, SqmArithmetic, SqmCase, SqmExpr, SqmFunction, SqmParamRef};

mod from;
pub use from::{FromId, FromSource, FromTy, JoinKind, SqmFrom, SqmFromClause, SqmJoin, SqmRoot};

pub mod function;
pub use function::FunctionRegistry;

mod param;
pub use param::{ParamId, ParamKind, ParamName, SqmParameter, SqmParameters};

mod path;
pub use path::{CteColumns, PathSegment, SqmPath};

mod predicate;
pub use predicate::{ComparisonOp, JunctionKind, SqmPredicate};

mod query;
pub use query::{
    NullPrecedence, SetOperator, SqmQuery, SqmQueryGroup, SqmQueryPart, SqmQuerySpec,
    SqmSelection, SqmSortSpec,
};

mod statement;
pub use statement::{
    SqmAssignment, SqmDeleteStatement, SqmInsertSource, SqmInsertStatement,
    SqmSelectStatement, SqmStatement, SqmUpdateStatement,
};
