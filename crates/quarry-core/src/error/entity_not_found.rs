use super::Error;

/// Error when an entity expected to exist is missing, e.g. on refresh or
/// when initializing a reference.
#[derive(Debug)]
pub(super) struct EntityNotFoundError {
    entity: Box<str>,
    id: Box<str>,
}

impl std::error::Error for EntityNotFoundError {}

impl core::fmt::Display for EntityNotFoundError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "entity not found: {} with id {}", self.entity, self.id)
    }
}

impl Error {
    /// Creates an entity not found error.
    pub fn entity_not_found(entity: impl Into<String>, id: impl Into<String>) -> Error {
        Error::from(super::ErrorKind::EntityNotFound(EntityNotFoundError {
            entity: entity.into().into(),
            id: id.into().into(),
        }))
    }

    /// Returns `true` if this error is an entity not found error.
    pub fn is_entity_not_found(&self) -> bool {
        self.any_kind(|kind| matches!(kind, super::ErrorKind::EntityNotFound(_)))
    }
}
