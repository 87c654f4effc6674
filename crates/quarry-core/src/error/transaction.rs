use super::Error;

/// Error when a transaction operation is invalid in the current state.
#[derive(Debug)]
pub(super) struct TransactionError {
    message: Box<str>,
}

impl std::error::Error for TransactionError {}

impl core::fmt::Display for TransactionError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "transaction error: {}", self.message)
    }
}

impl Error {
    /// Creates a transaction error.
    pub fn transaction(message: impl Into<String>) -> Error {
        Error::from(super::ErrorKind::Transaction(TransactionError {
            message: message.into().into(),
        }))
    }

    /// Returns `true` if this error is a transaction error.
    pub fn is_transaction(&self) -> bool {
        self.any_kind(|kind| matches!(kind, super::ErrorKind::Transaction(_)))
    }
}
