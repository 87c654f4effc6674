use super::Error;

/// Error when an API receives an argument it cannot accept, such as a
/// cycle clause whose sentinel values differ in type.
#[derive(Debug)]
pub(super) struct IllegalArgumentError {
    message: Box<str>,
}

impl std::error::Error for IllegalArgumentError {}

impl core::fmt::Display for IllegalArgumentError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "illegal argument: {}", self.message)
    }
}

impl Error {
    /// Creates an illegal argument error.
    pub fn illegal_argument(message: impl Into<String>) -> Error {
        Error::from(super::ErrorKind::IllegalArgument(IllegalArgumentError {
            message: message.into().into(),
        }))
    }

    /// Returns `true` if this error is an illegal argument error.
    pub fn is_illegal_argument(&self) -> bool {
        self.any_kind(|kind| matches!(kind, super::ErrorKind::IllegalArgument(_)))
    }
}
