use super::Error;

/// Error when a SQL AST is malformed, e.g. a query specification without a
/// select list.
#[derive(Debug)]
pub(super) struct SqlAstSyntaxError {
    message: Box<str>,
}

impl std::error::Error for SqlAstSyntaxError {}

impl core::fmt::Display for SqlAstSyntaxError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "malformed SQL AST: {}", self.message)
    }
}

impl Error {
    /// Creates a SQL AST syntax error.
    pub fn sql_ast_syntax(message: impl Into<String>) -> Error {
        Error::from(super::ErrorKind::SqlAstSyntax(SqlAstSyntaxError {
            message: message.into().into(),
        }))
    }

    /// Returns `true` if this error is a SQL AST syntax error.
    pub fn is_sql_ast_syntax(&self) -> bool {
        self.any_kind(|kind| matches!(kind, super::ErrorKind::SqlAstSyntax(_)))
    }
}
