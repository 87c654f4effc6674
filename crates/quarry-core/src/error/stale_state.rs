use super::Error;

/// Optimistic lock failure: a versioned update or delete matched no row.
#[derive(Debug)]
pub(super) struct StaleStateError {
    entity: Box<str>,
    id: Box<str>,
}

impl std::error::Error for StaleStateError {}

impl core::fmt::Display for StaleStateError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(
            f,
            "row was updated or deleted by another transaction: {}#{}",
            self.entity, self.id
        )
    }
}

impl Error {
    /// Creates a stale state error.
    pub fn stale_state(entity: impl Into<String>, id: impl Into<String>) -> Error {
        Error::from(super::ErrorKind::StaleState(StaleStateError {
            entity: entity.into().into(),
            id: id.into().into(),
        }))
    }

    /// Returns `true` if this error is an optimistic lock failure.
    pub fn is_stale_state(&self) -> bool {
        self.any_kind(|kind| matches!(kind, super::ErrorKind::StaleState(_)))
    }
}
