use super::Error;

/// Error when an operation is not permitted by the mapping, e.g. updating
/// an immutable entity or a read-only cached entity.
#[derive(Debug)]
pub(super) struct UnsupportedError {
    message: Box<str>,
}

impl std::error::Error for UnsupportedError {}

impl core::fmt::Display for UnsupportedError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "unsupported operation: {}", self.message)
    }
}

impl Error {
    /// Creates an unsupported operation error.
    pub fn unsupported(message: impl Into<String>) -> Error {
        Error::from(super::ErrorKind::Unsupported(UnsupportedError {
            message: message.into().into(),
        }))
    }

    /// Returns `true` if this error is an unsupported operation error.
    pub fn is_unsupported(&self) -> bool {
        self.any_kind(|kind| matches!(kind, super::ErrorKind::Unsupported(_)))
    }
}
