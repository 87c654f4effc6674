use super::Error;

/// Error raised while binding a query against the metamodel.
///
/// This occurs when:
/// - A path or alias cannot be resolved
/// - Operand types are incompatible
/// - A function is not registered
/// - A construct is not allowed in its position
///
/// No SQL has been generated when this error is returned.
#[derive(Debug)]
pub(super) struct SemanticError {
    message: Box<str>,
}

impl std::error::Error for SemanticError {}

impl core::fmt::Display for SemanticError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "semantic error: {}", self.message)
    }
}

impl Error {
    /// Creates a semantic error.
    pub fn semantic(message: impl Into<String>) -> Error {
        Error::from(super::ErrorKind::Semantic(SemanticError {
            message: message.into().into(),
        }))
    }

    /// Returns `true` if this error is a semantic error.
    pub fn is_semantic(&self) -> bool {
        self.any_kind(|kind| matches!(kind, super::ErrorKind::Semantic(_)))
    }
}
