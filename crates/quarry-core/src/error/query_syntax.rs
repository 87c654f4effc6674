use super::Error;

/// Error raised by the query-language lexer or parser.
#[derive(Debug)]
pub(super) struct QuerySyntaxError {
    message: Box<str>,
    position: usize,
}

impl std::error::Error for QuerySyntaxError {}

impl core::fmt::Display for QuerySyntaxError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(
            f,
            "query syntax error at offset {}: {}",
            self.position, self.message
        )
    }
}

impl Error {
    /// Creates a syntax error for query text. `position` is a byte offset.
    pub fn query_syntax(message: impl Into<String>, position: usize) -> Error {
        Error::from(super::ErrorKind::QuerySyntax(QuerySyntaxError {
            message: message.into().into(),
            position,
        }))
    }

    /// Returns `true` if this error is a query syntax error.
    pub fn is_query_syntax(&self) -> bool {
        self.any_kind(|kind| matches!(kind, super::ErrorKind::QuerySyntax(_)))
    }
}
