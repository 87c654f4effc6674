use super::Error;

/// Error when flushing an association that points at an unsaved instance
/// without cascading persist to it.
#[derive(Debug)]
pub(super) struct TransientObjectError {
    entity: Box<str>,
    attribute: Box<str>,
}

impl std::error::Error for TransientObjectError {}

impl core::fmt::Display for TransientObjectError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(
            f,
            "{}.{} references an unsaved transient instance",
            self.entity, self.attribute
        )
    }
}

impl Error {
    /// Creates a transient object error.
    pub fn transient_object(entity: impl Into<String>, attribute: impl Into<String>) -> Error {
        Error::from(super::ErrorKind::TransientObject(TransientObjectError {
            entity: entity.into().into(),
            attribute: attribute.into().into(),
        }))
    }

    /// Returns `true` if this error is a transient object error.
    pub fn is_transient_object(&self) -> bool {
        self.any_kind(|kind| matches!(kind, super::ErrorKind::TransientObject(_)))
    }
}
