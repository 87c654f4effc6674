use super::Error;

/// Error when the translator or renderer has no support for a construct on
/// the current statement shape or dialect.
#[derive(Debug)]
pub(super) struct NotYetImplementedError {
    what: Box<str>,
}

impl std::error::Error for NotYetImplementedError {}

impl core::fmt::Display for NotYetImplementedError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "not yet implemented: {}", self.what)
    }
}

impl Error {
    /// Creates a not-yet-implemented error naming the unsupported construct.
    pub fn not_yet_implemented(what: impl Into<String>) -> Error {
        Error::from(super::ErrorKind::NotYetImplemented(NotYetImplementedError {
            what: what.into().into(),
        }))
    }

    /// Returns `true` if this error is a not-yet-implemented error.
    pub fn is_not_yet_implemented(&self) -> bool {
        self.any_kind(|kind| matches!(kind, super::ErrorKind::NotYetImplemented(_)))
    }
}
