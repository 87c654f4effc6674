mod adhoc;
mod driver;
mod entity_not_found;
mod illegal_argument;
mod jdbc_execution;
mod lazy_initialization;
mod mapping;
mod non_unique_result;
mod not_yet_implemented;
mod query_syntax;
mod resource_leak;
mod semantic;
mod sql_ast_syntax;
mod stale_state;
mod transaction;
mod transient_object;
mod type_conversion;
mod unsupported;

use adhoc::AdhocError;
use driver::DriverError;
use entity_not_found::EntityNotFoundError;
use illegal_argument::IllegalArgumentError;
use jdbc_execution::JdbcExecutionError;
use lazy_initialization::LazyInitializationError;
use mapping::MappingError;
use non_unique_result::NonUniqueResultError;
use not_yet_implemented::NotYetImplementedError;
use query_syntax::QuerySyntaxError;
use resource_leak::ResourceLeakError;
use semantic::SemanticError;
use sql_ast_syntax::SqlAstSyntaxError;
use stale_state::StaleStateError;
use std::sync::Arc;
use transaction::TransactionError;
use transient_object::TransientObjectError;
use type_conversion::TypeConversionError;
use unsupported::UnsupportedError;

/// Returns early with an ad-hoc error built from a format string.
#[macro_export]
macro_rules! bail {
    ($($arg:tt)*) => {
        return Err($crate::Error::from_args(format_args!($($arg)*)))
    };
}

/// Builds an ad-hoc error from a format string.
#[macro_export]
macro_rules! err {
    ($($arg:tt)*) => {
        $crate::Error::from_args(format_args!($($arg)*))
    };
}

/// An error that can occur anywhere in the query pipeline or the session.
///
/// The error is a single pointer wide. Each kind of failure has a dedicated
/// constructor (`Error::semantic`, `Error::not_yet_implemented`, ...) and a
/// matching predicate (`is_semantic`, ...) so callers can tell "the query is
/// wrong" apart from "the engine cannot do that yet".
#[derive(Clone)]
pub struct Error {
    inner: Option<Arc<ErrorInner>>,
}

#[derive(Debug)]
struct ErrorInner {
    kind: ErrorKind,
    cause: Option<Error>,
}

impl Error {
    /// Adds context to this error.
    ///
    /// Context is displayed in reverse order: the most recently added context is shown first,
    /// followed by earlier context, ending with the root cause.
    #[inline(always)]
    pub fn context(self, consequent: impl IntoError) -> Error {
        self.context_impl(consequent.into_error())
    }

    #[inline(never)]
    #[cold]
    fn context_impl(self, consequent: Error) -> Error {
        let mut err = consequent;
        if err.inner.is_none() {
            err = Error::from(ErrorKind::Unknown);
        }
        let inner = err.inner.as_mut().unwrap();
        assert!(
            inner.cause.is_none(),
            "consequent error must not already have a cause"
        );
        Arc::get_mut(inner).unwrap().cause = Some(self);
        err
    }

    /// Returns the innermost error of the context chain.
    pub fn root(&self) -> &Error {
        self.chain().last().unwrap()
    }

    fn chain(&self) -> impl Iterator<Item = &Error> {
        let mut err = self;
        core::iter::once(err).chain(core::iter::from_fn(move || {
            err = err.inner.as_ref().and_then(|inner| inner.cause.as_ref())?;
            Some(err)
        }))
    }

    fn kind(&self) -> &ErrorKind {
        self.inner
            .as_ref()
            .map(|inner| &inner.kind)
            .unwrap_or(&ErrorKind::Unknown)
    }

    /// Returns `true` if any error in the context chain matches `f`.
    fn any_kind(&self, f: impl Fn(&ErrorKind) -> bool) -> bool {
        self.chain().any(|err| f(err.kind()))
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self.kind() {
            ErrorKind::Driver(err) => Some(err),
            ErrorKind::JdbcExecution(err) => Some(err),
            ErrorKind::Anyhow(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        let mut it = self.chain().peekable();
        while let Some(err) = it.next() {
            core::fmt::Display::fmt(err.kind(), f)?;
            if it.peek().is_some() {
                f.write_str(": ")?;
            }
        }
        Ok(())
    }
}

impl core::fmt::Debug for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        if !f.alternate() {
            core::fmt::Display::fmt(self, f)
        } else {
            let Some(ref inner) = self.inner else {
                return f.debug_struct("Error").field("kind", &"None").finish();
            };
            f.debug_struct("Error")
                .field("kind", &inner.kind)
                .field("cause", &inner.cause)
                .finish()
        }
    }
}

#[derive(Debug)]
enum ErrorKind {
    Anyhow(anyhow::Error),
    Adhoc(AdhocError),
    QuerySyntax(QuerySyntaxError),
    Semantic(SemanticError),
    IllegalArgument(IllegalArgumentError),
    NotYetImplemented(NotYetImplementedError),
    SqlAstSyntax(SqlAstSyntaxError),
    Mapping(MappingError),
    Driver(DriverError),
    JdbcExecution(JdbcExecutionError),
    ResourceLeak(ResourceLeakError),
    EntityNotFound(EntityNotFoundError),
    NonUniqueResult(NonUniqueResultError),
    StaleState(StaleStateError),
    TransientObject(TransientObjectError),
    LazyInitialization(LazyInitializationError),
    TypeConversion(TypeConversionError),
    Unsupported(UnsupportedError),
    Transaction(TransactionError),
    Unknown,
}

impl core::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        use self::ErrorKind::*;

        match self {
            Anyhow(err) => core::fmt::Display::fmt(err, f),
            Adhoc(err) => core::fmt::Display::fmt(err, f),
            QuerySyntax(err) => core::fmt::Display::fmt(err, f),
            Semantic(err) => core::fmt::Display::fmt(err, f),
            IllegalArgument(err) => core::fmt::Display::fmt(err, f),
            NotYetImplemented(err) => core::fmt::Display::fmt(err, f),
            SqlAstSyntax(err) => core::fmt::Display::fmt(err, f),
            Mapping(err) => core::fmt::Display::fmt(err, f),
            Driver(err) => core::fmt::Display::fmt(err, f),
            JdbcExecution(err) => core::fmt::Display::fmt(err, f),
            ResourceLeak(err) => core::fmt::Display::fmt(err, f),
            EntityNotFound(err) => core::fmt::Display::fmt(err, f),
            NonUniqueResult(err) => core::fmt::Display::fmt(err, f),
            StaleState(err) => core::fmt::Display::fmt(err, f),
            TransientObject(err) => core::fmt::Display::fmt(err, f),
            LazyInitialization(err) => core::fmt::Display::fmt(err, f),
            TypeConversion(err) => core::fmt::Display::fmt(err, f),
            Unsupported(err) => core::fmt::Display::fmt(err, f),
            Transaction(err) => core::fmt::Display::fmt(err, f),
            Unknown => f.write_str("unknown quarry error"),
        }
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Error {
        Error {
            inner: Some(Arc::new(ErrorInner { kind, cause: None })),
        }
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Error {
        Error::from(ErrorKind::Anyhow(err))
    }
}

impl From<std::num::ParseIntError> for Error {
    fn from(err: std::num::ParseIntError) -> Error {
        Error::from(anyhow::Error::from(err))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::from(anyhow::Error::from(err))
    }
}

impl From<uuid::Error> for Error {
    fn from(err: uuid::Error) -> Error {
        Error::from(anyhow::Error::from(err))
    }
}

/// Trait for types that can be converted into an Error.
pub trait IntoError {
    /// Converts this type into an Error.
    fn into_error(self) -> Error;
}

impl IntoError for Error {
    #[inline(always)]
    fn into_error(self) -> Error {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_size() {
        let expected_size = core::mem::size_of::<usize>();
        assert_eq!(expected_size, core::mem::size_of::<Error>());
    }

    #[test]
    fn error_from_args() {
        let err = Error::from_args(format_args!("test error: {}", 42));
        assert_eq!(err.to_string(), "test error: 42");
    }

    #[test]
    fn error_chain_display() {
        let root = Error::from_args(format_args!("root cause"));
        let mid = Error::from_args(format_args!("middle context"));
        let top = Error::from_args(format_args!("top context"));

        let chained = root.context(mid).context(top);
        assert_eq!(
            chained.to_string(),
            "top context: middle context: root cause"
        );
    }

    #[test]
    fn anyhow_bridge() {
        let anyhow_err = anyhow::anyhow!("something failed");
        let our_err: Error = anyhow_err.into();
        assert_eq!(our_err.to_string(), "something failed");
    }

    #[test]
    fn query_syntax_carries_position() {
        let err = Error::query_syntax("unexpected token `from`", 7);
        assert_eq!(
            err.to_string(),
            "query syntax error at offset 7: unexpected token `from`"
        );
        assert!(err.is_query_syntax());
        assert!(!err.is_semantic());
    }

    #[test]
    fn semantic_and_not_yet_implemented_are_distinct() {
        let semantic = Error::semantic("could not resolve attribute `nme` of `Person`");
        let nyi = Error::not_yet_implemented("search clause on MySQL");

        assert!(semantic.is_semantic());
        assert!(!semantic.is_not_yet_implemented());
        assert!(nyi.is_not_yet_implemented());
        assert!(!nyi.is_semantic());
        assert_eq!(
            nyi.to_string(),
            "not yet implemented: search clause on MySQL"
        );
    }

    #[test]
    fn predicates_look_through_context() {
        let err = Error::illegal_argument("cycle value type mismatch")
            .context(err!("building CTE `alternativeContacts`"));

        assert!(err.is_illegal_argument());
        assert_eq!(
            err.to_string(),
            "building CTE `alternativeContacts`: illegal argument: cycle value type mismatch"
        );
    }

    #[test]
    fn jdbc_execution_keeps_statement_and_params() {
        let cause = Error::from_args(format_args!("no such table: person"));
        let err = Error::jdbc_execution(
            "select p1_0.id from person p1_0 where p1_0.id = ?1",
            vec![crate::stmt::Value::I64(1)],
            cause,
        );

        assert!(err.is_jdbc_execution());
        assert_eq!(
            err.to_string(),
            "could not execute statement [no such table: person] \
             [select p1_0.id from person p1_0 where p1_0.id = ?1] [1]"
        );
    }

    #[test]
    fn entity_not_found_with_context_chain() {
        let err = Error::entity_not_found("Person", "1").context(err!("refresh"));

        assert_eq!(
            err.to_string(),
            "refresh: entity not found: Person with id 1"
        );
    }

    #[test]
    fn stale_state_message() {
        let err = Error::stale_state("Person", "7");
        assert_eq!(
            err.to_string(),
            "row was updated or deleted by another transaction: Person#7"
        );
        assert!(err.is_stale_state());
    }
}
