//! The function registry.
//!
//! A registry is built per session factory from the dialect, so two
//! factories targeting different databases never share descriptors.

use super::{SqmExpr, SqmFunction};
use crate::{driver::Dialect, stmt::Type, Error, Result};

use indexmap::IndexMap;

#[derive(Debug, Clone)]
pub struct FunctionRegistry {
    dialect: Dialect,
    functions: IndexMap<String, FunctionDescriptor>,
}

#[derive(Debug, Clone)]
pub struct FunctionDescriptor {
    pub name: String,
    pub kind: FunctionKind,
    pub min_args: usize,

    /// `None` for variadic functions
    pub max_args: Option<usize>,

    pub arg_kind: ArgKind,
    pub ret: ReturnTy,
    pub render: FunctionRender,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    Scalar,
    Aggregate,

    /// `size(collection)`, lowered to a correlated count
    Size,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    Any,
    Numeric,
    String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReturnTy {
    Fixed(Type),

    /// Type of the first argument
    FirstArg,

    /// Type of the first argument, with `I32` widened to `I64`
    Widened,

    /// Common type of all arguments
    Unified,
}

/// How a call is rendered as SQL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FunctionRender {
    /// `name(arg, …)`
    Call(String),

    /// A template where `?1`, `?2`, … are replaced by the rendered
    /// arguments
    Pattern(String),

    /// A bare keyword without parentheses, e.g. `current_date`
    Keyword(String),

    /// String concatenation in the dialect's operator or function
    Concat,
}

impl FunctionRegistry {
    /// Registry pre-populated with the built-in functions of `dialect`.
    pub fn new(dialect: Dialect) -> FunctionRegistry {
        use ArgKind::*;
        use FunctionKind::*;

        let mut registry = FunctionRegistry {
            dialect,
            functions: IndexMap::new(),
        };

        registry.builtin("count", Aggregate, 1, Some(1), Any, ReturnTy::Fixed(Type::I64));
        registry.builtin("sum", Aggregate, 1, Some(1), Numeric, ReturnTy::Widened);
        registry.builtin("avg", Aggregate, 1, Some(1), Numeric, ReturnTy::Fixed(Type::F64));
        registry.builtin("min", Aggregate, 1, Some(1), Any, ReturnTy::FirstArg);
        registry.builtin("max", Aggregate, 1, Some(1), Any, ReturnTy::FirstArg);
        registry.builtin("upper", Scalar, 1, Some(1), String, ReturnTy::Fixed(Type::String));
        registry.builtin("lower", Scalar, 1, Some(1), String, ReturnTy::Fixed(Type::String));
        registry.builtin("length", Scalar, 1, Some(1), String, ReturnTy::Fixed(Type::I32));
        registry.builtin("concat", Scalar, 2, None, Any, ReturnTy::Fixed(Type::String));
        registry.builtin("substring", Scalar, 2, Some(3), Any, ReturnTy::Fixed(Type::String));
        registry.builtin("trim", Scalar, 1, Some(1), String, ReturnTy::Fixed(Type::String));
        registry.builtin("abs", Scalar, 1, Some(1), Numeric, ReturnTy::FirstArg);
        registry.builtin("mod", Scalar, 2, Some(2), Numeric, ReturnTy::Unified);
        registry.builtin("coalesce", Scalar, 1, None, Any, ReturnTy::Unified);
        registry.builtin("locate", Scalar, 2, Some(2), String, ReturnTy::Fixed(Type::I32));
        registry.builtin("current_date", Scalar, 0, Some(0), Any, ReturnTy::Fixed(Type::String));
        registry.builtin(
            "current_timestamp",
            Scalar,
            0,
            Some(0),
            Any,
            ReturnTy::Fixed(Type::String),
        );
        registry.builtin("size", Size, 1, Some(1), Any, ReturnTy::Fixed(Type::I32));

        registry
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn get(&self, name: &str) -> Option<&FunctionDescriptor> {
        self.functions.get(&name.to_ascii_lowercase())
    }

    /// Registers a function rendered from a `?N` template, replacing any
    /// function of the same name.
    pub fn register_pattern(&mut self, name: &str, pattern: &str, arity: usize, ret: Type) {
        self.register(FunctionDescriptor {
            name: name.to_ascii_lowercase(),
            kind: FunctionKind::Scalar,
            min_args: arity,
            max_args: Some(arity),
            arg_kind: ArgKind::Any,
            ret: ReturnTy::Fixed(ret),
            render: FunctionRender::Pattern(pattern.to_string()),
        });
    }

    pub fn register(&mut self, descriptor: FunctionDescriptor) {
        self.functions.insert(descriptor.name.clone(), descriptor);
    }

    /// Binds a call, checking arity and argument kinds.
    pub fn resolve(&self, name: &str, args: Vec<SqmExpr>, distinct: bool) -> Result<SqmFunction> {
        let Some(descriptor) = self.get(name) else {
            return Err(Error::semantic(format!("function not found: `{name}`")));
        };
        descriptor.bind(args, distinct)
    }

    fn builtin(
        &mut self,
        name: &str,
        kind: FunctionKind,
        min_args: usize,
        max_args: Option<usize>,
        arg_kind: ArgKind,
        ret: ReturnTy,
    ) {
        let render = self.dialect_render(name);
        self.register(FunctionDescriptor {
            name: name.to_string(),
            kind,
            min_args,
            max_args,
            arg_kind,
            ret,
            render,
        });
    }

    fn dialect_render(&self, name: &str) -> FunctionRender {
        use Dialect::*;

        let pattern = |p: &str| FunctionRender::Pattern(p.to_string());
        let call = |c: &str| FunctionRender::Call(c.to_string());

        match (name, self.dialect) {
            ("concat", _) => FunctionRender::Concat,
            ("current_date" | "current_timestamp", _) => FunctionRender::Keyword(name.to_string()),
            ("locate", Sqlite) => pattern("instr(?2, ?1)"),
            ("locate", Postgresql) => pattern("position(?1 in ?2)"),
            ("locate", SqlServer) => pattern("charindex(?1, ?2)"),
            ("length", SqlServer) => call("len"),
            ("substring", Sqlite) => call("substr"),
            ("mod", Sqlite | SqlServer) => pattern("(?1 % ?2)"),
            (name, _) => call(name),
        }
    }
}

impl FunctionDescriptor {
    pub fn is_aggregate(&self) -> bool {
        self.kind == FunctionKind::Aggregate
    }

    fn bind(&self, args: Vec<SqmExpr>, distinct: bool) -> Result<SqmFunction> {
        let n = args.len();
        if n < self.min_args || self.max_args.is_some_and(|max| n > max) {
            let expected = match self.max_args {
                Some(max) if max == self.min_args => format!("{max}"),
                Some(max) => format!("{} to {max}", self.min_args),
                None => format!("at least {}", self.min_args),
            };
            return Err(Error::semantic(format!(
                "function `{}` expects {expected} arguments, got {n}",
                self.name
            )));
        }

        if distinct && !self.is_aggregate() {
            return Err(Error::semantic(format!(
                "`distinct` is only allowed in aggregate functions, not `{}`",
                self.name
            )));
        }

        for (i, arg) in args.iter().enumerate() {
            let ty = arg.ty();
            let ok = match self.arg_kind {
                _ if ty.is_unknown() => true,
                ArgKind::Any => true,
                ArgKind::Numeric => ty.is_numeric(),
                ArgKind::String => ty.is_string() || ty == Type::Uuid,
            };
            if !ok {
                return Err(Error::semantic(format!(
                    "argument {} of `{}` has type {ty:?}, expected {:?}",
                    i + 1,
                    self.name,
                    self.arg_kind
                )));
            }
        }

        if self.kind == FunctionKind::Size
            && !args
                .first()
                .and_then(SqmExpr::as_path)
                .is_some_and(|path| path.is_plural())
        {
            return Err(Error::semantic(
                "`size` requires a collection-valued path argument",
            ));
        }

        let ty = match &self.ret {
            ReturnTy::Fixed(ty) => ty.clone(),
            ReturnTy::FirstArg => args.first().map(SqmExpr::ty).unwrap_or(Type::Unknown),
            ReturnTy::Widened => match args.first().map(SqmExpr::ty) {
                Some(Type::I32) => Type::I64,
                Some(ty) => ty,
                None => Type::Unknown,
            },
            ReturnTy::Unified => args
                .iter()
                .fold(Type::Unknown, |ty, arg| ty.unify(&arg.ty())),
        };

        Ok(SqmFunction {
            name: self.name.clone(),
            args,
            distinct,
            ty,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stmt::Value;

    fn lit(value: impl Into<Value>) -> SqmExpr {
        SqmExpr::Literal(value.into())
    }

    #[test]
    fn unknown_function_is_not_found() {
        let registry = FunctionRegistry::new(Dialect::Sqlite);
        let err = registry.resolve("soundex", vec![lit("a")], false).unwrap_err();
        assert!(err.is_semantic());
        assert_eq!(err.to_string(), "semantic error: function not found: `soundex`");
    }

    #[test]
    fn arity_is_checked() {
        let registry = FunctionRegistry::new(Dialect::Sqlite);
        let err = registry.resolve("upper", vec![], false).unwrap_err();
        assert!(err.is_semantic());
    }

    #[test]
    fn numeric_argument_kind_is_checked() {
        let registry = FunctionRegistry::new(Dialect::Postgresql);
        assert!(registry.resolve("abs", vec![lit("x")], false).is_err());
        let sum = registry.resolve("SUM", vec![lit(1i32)], false).unwrap();
        assert_eq!(sum.ty, Type::I64);
    }

    #[test]
    fn rendering_is_dialect_specific() {
        let sqlite = FunctionRegistry::new(Dialect::Sqlite);
        let sqlserver = FunctionRegistry::new(Dialect::SqlServer);

        assert_eq!(
            sqlite.get("locate").unwrap().render,
            FunctionRender::Pattern("instr(?2, ?1)".into())
        );
        assert_eq!(
            sqlserver.get("length").unwrap().render,
            FunctionRender::Call("len".into())
        );
    }

    #[test]
    fn custom_pattern_function() {
        let mut registry = FunctionRegistry::new(Dialect::Sqlite);
        registry.register_pattern("add_one", "(?1 + 1)", 1, Type::I64);
        let f = registry.resolve("add_one", vec![lit(1i64)], false).unwrap();
        assert_eq!(f.ty, Type::I64);
    }
}
