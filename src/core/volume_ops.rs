use async_trait::async_trait;

use super::ServiceError;

/// Call boundary to the privileged volume-management service.
///
/// Implementations perform no retries and keep no state about the volumes;
/// every call either succeeds or returns a classified [`ServiceError`].
#[async_trait]
pub trait VolumeService: Send + Sync {
    /// Mounts the volume at `path`
    async fn mount(&self, path: &str) -> Result<(), ServiceError>;

    /// Unmounts the volume at `path`, detaching it even if busy when `force` is set
    async fn unmount(&self, path: &str, force: bool) -> Result<(), ServiceError>;

    /// Formats the volume at `path`. May take a long time.
    async fn format(&self, path: &str) -> Result<(), ServiceError>;

    /// Checks if running with elevated privileges (root)
    fn has_privileges(&self) -> bool;
}
