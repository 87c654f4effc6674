use super::Error;

/// Error when cursors or statements are still registered at transaction end
/// or session close.
#[derive(Debug)]
pub(super) struct ResourceLeakError {
    open: usize,
}

impl std::error::Error for ResourceLeakError {}

impl core::fmt::Display for ResourceLeakError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "{} JDBC resource(s) still open", self.open)
    }
}

impl Error {
    /// Creates a resource leak error for `open` unreleased resources.
    pub fn resource_leak(open: usize) -> Error {
        Error::from(super::ErrorKind::ResourceLeak(ResourceLeakError { open }))
    }

    /// Returns `true` if this error reports leaked resources.
    pub fn is_resource_leak(&self) -> bool {
        self.any_kind(|kind| matches!(kind, super::ErrorKind::ResourceLeak(_)))
    }
}
