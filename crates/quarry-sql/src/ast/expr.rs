use super::{ArithmeticOp, JdbcParameter, Predicate, SelectStatement};
use quarry_core::{sqm::function::FunctionRender, stmt::Value};

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Column(ColumnRef),

    /// Rendered inline
    Literal(Value),

    Param(JdbcParameter),
    Function(FunctionCall),

    /// `count(*)`
    CountStar,

    Arithmetic {
        lhs: Box<Expr>,
        op: ArithmeticOp,
        rhs: Box<Expr>,
    },

    Negate(Box<Expr>),

    /// Searched case
    Case {
        whens: Vec<(Predicate, Expr)>,
        otherwise: Option<Box<Expr>>,
    },

    Tuple(Vec<Expr>),

    /// Scalar subquery
    Subquery(Box<SelectStatement>),

    /// A mapped SQL fragment, already qualified with its table alias
    Fragment(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnRef {
    /// Table alias. DML against a single table leaves it unset.
    pub qualifier: Option<String>,
    pub column: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCall {
    pub render: FunctionRender,
    pub args: Vec<Expr>,
    pub distinct: bool,
}

impl Expr {
    pub fn column(qualifier: impl Into<String>, column: impl Into<String>) -> Expr {
        Expr::Column(ColumnRef {
            qualifier: Some(qualifier.into()),
            column: column.into(),
        })
    }

    pub fn unqualified(column: impl Into<String>) -> Expr {
        Expr::Column(ColumnRef {
            qualifier: None,
            column: column.into(),
        })
    }

    pub fn literal(value: impl Into<Value>) -> Expr {
        Expr::Literal(value.into())
    }

    pub fn value_param(value: impl Into<Value>) -> Expr {
        Expr::Param(JdbcParameter::Value(value.into()))
    }

    pub fn call(name: &str, args: Vec<Expr>) -> Expr {
        Expr::Function(FunctionCall {
            render: FunctionRender::Call(name.to_string()),
            args,
            distinct: false,
        })
    }

    pub fn concat(args: Vec<Expr>) -> Expr {
        Expr::Function(FunctionCall {
            render: FunctionRender::Concat,
            args,
            distinct: false,
        })
    }

    pub fn arithmetic(lhs: Expr, op: ArithmeticOp, rhs: Expr) -> Expr {
        Expr::Arithmetic {
            lhs: Box::new(lhs),
            op,
            rhs: Box::new(rhs),
        }
    }

    pub fn as_column(&self) -> Option<&ColumnRef> {
        match self {
            Expr::Column(column) => Some(column),
            _ => None,
        }
    }

    pub fn is_arithmetic(&self) -> bool {
        matches!(self, Expr::Arithmetic { .. })
    }
}

impl From<ColumnRef> for Expr {
    fn from(value: ColumnRef) -> Self {
        Expr::Column(value)
    }
}

impl From<JdbcParameter> for Expr {
    fn from(value: JdbcParameter) -> Self {
        Expr::Param(value)
    }
}
