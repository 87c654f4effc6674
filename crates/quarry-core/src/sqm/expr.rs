use super::{ParamId, SqmPath, SqmPredicate, SqmQuery};
use crate::stmt::{Type, Value};

/// A typed scalar expression.
#[derive(Debug, Clone, PartialEq)]
pub enum SqmExpr {
    Literal(Value),
    Path(SqmPath),
    Param(SqmParamRef),
    Function(SqmFunction),

    /// `count(*)`
    CountStar,

    Arithmetic(SqmArithmetic),
    Negate(Box<SqmExpr>),

    /// Searched `case when … then … else … end`
    Case(SqmCase),

    Tuple(Vec<SqmExpr>),

    /// A scalar subquery
    Subquery { query: Box<SqmQuery>, ty: Type },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SqmParamRef {
    pub id: ParamId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SqmFunction {
    /// Registry name, lower case
    pub name: String,
    pub args: Vec<SqmExpr>,

    /// `count(distinct x)`
    pub distinct: bool,

    pub ty: Type,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SqmArithmetic {
    pub lhs: Box<SqmExpr>,
    pub op: ArithmeticOp,
    pub rhs: Box<SqmExpr>,
    pub ty: Type,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithmeticOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SqmCase {
    pub whens: Vec<(SqmPredicate, SqmExpr)>,
    pub otherwise: Option<Box<SqmExpr>>,
    pub ty: Type,
}

impl SqmExpr {
    /// The resolved type. Parameters report `Unknown` here; their inferred
    /// type lives in the statement's parameter table.
    pub fn ty(&self) -> Type {
        match self {
            SqmExpr::Literal(value) => value.ty(),
            SqmExpr::Path(path) => path.ty.clone(),
            SqmExpr::Param(_) => Type::Unknown,
            SqmExpr::Function(function) => function.ty.clone(),
            SqmExpr::CountStar => Type::I64,
            SqmExpr::Arithmetic(arithmetic) => arithmetic.ty.clone(),
            SqmExpr::Negate(expr) => expr.ty(),
            SqmExpr::Case(case) => case.ty.clone(),
            SqmExpr::Tuple(items) => Type::Record(items.iter().map(SqmExpr::ty).collect()),
            SqmExpr::Subquery { ty, .. } => ty.clone(),
        }
    }

    pub fn as_path(&self) -> Option<&SqmPath> {
        match self {
            SqmExpr::Path(path) => Some(path),
            _ => None,
        }
    }

    pub fn as_param(&self) -> Option<ParamId> {
        match self {
            SqmExpr::Param(param) => Some(param.id),
            _ => None,
        }
    }

    /// True for aggregate function calls at the top of the expression.
    pub fn is_aggregate(&self) -> bool {
        match self {
            SqmExpr::CountStar => true,
            SqmExpr::Function(function) => {
                matches!(function.name.as_str(), "count" | "sum" | "avg" | "min" | "max")
            }
            _ => false,
        }
    }
}

impl ArithmeticOp {
    /// Integer division stays integral, matching SQL.
    pub fn result_ty(self, lhs: &Type, rhs: &Type) -> Type {
        lhs.unify(rhs)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ArithmeticOp::Add => "+",
            ArithmeticOp::Sub => "-",
            ArithmeticOp::Mul => "*",
            ArithmeticOp::Div => "/",
            ArithmeticOp::Mod => "%",
        }
    }
}

impl SqmArithmetic {
    pub fn new(lhs: SqmExpr, op: ArithmeticOp, rhs: SqmExpr) -> SqmArithmetic {
        let ty = op.result_ty(&lhs.ty(), &rhs.ty());
        SqmArithmetic {
            lhs: Box::new(lhs),
            op,
            rhs: Box::new(rhs),
            ty,
        }
    }
}

impl From<Value> for SqmExpr {
    fn from(value: Value) -> Self {
        SqmExpr::Literal(value)
    }
}

impl From<SqmPath> for SqmExpr {
    fn from(value: SqmPath) -> Self {
        SqmExpr::Path(value)
    }
}

impl From<SqmFunction> for SqmExpr {
    fn from(value: SqmFunction) -> Self {
        SqmExpr::Function(value)
    }
}
