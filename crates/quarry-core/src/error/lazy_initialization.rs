use super::Error;

/// Error when a lazy attribute is read outside of a session that can load it.
#[derive(Debug)]
pub(super) struct LazyInitializationError {
    role: Box<str>,
}

impl std::error::Error for LazyInitializationError {}

impl core::fmt::Display for LazyInitializationError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "failed to lazily initialize {}", self.role)
    }
}

impl Error {
    /// Creates a lazy initialization error for the given role (`Entity.attribute`).
    pub fn lazy_initialization(role: impl Into<String>) -> Error {
        Error::from(super::ErrorKind::LazyInitialization(
            LazyInitializationError {
                role: role.into().into(),
            },
        ))
    }

    /// Returns `true` if this error is a lazy initialization error.
    pub fn is_lazy_initialization(&self) -> bool {
        self.any_kind(|kind| matches!(kind, super::ErrorKind::LazyInitialization(_)))
    }
}
