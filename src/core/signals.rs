/// Platform-wide request for a full device factory reset.
///
/// Fire-and-forget: the caller never waits for the reset to happen.
pub trait WipeSignal: Send + Sync {
    fn request_factory_reset(&self);
}

/// Keeps the device awake (or otherwise alive) while a run is in progress
pub trait KeepAlive: Send + Sync {
    fn acquire(&self, reason: &str) -> KeepAliveGuard;
}

/// Lease returned by [`KeepAlive::acquire`], released exactly once on drop
pub struct KeepAliveGuard {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl KeepAliveGuard {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// A lease that holds nothing
    pub fn noop() -> Self {
        Self { release: None }
    }
}

impl Drop for KeepAliveGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl std::fmt::Debug for KeepAliveGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeepAliveGuard")
            .field("held", &self.release.is_some())
            .finish()
    }
}

/// Keep-alive for platforms (and tests) where nothing needs holding
pub struct NoKeepAlive;

impl KeepAlive for NoKeepAlive {
    fn acquire(&self, _reason: &str) -> KeepAliveGuard {
        KeepAliveGuard::noop()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn guard_releases_once_on_drop() {
        let released = Arc::new(AtomicUsize::new(0));
        let counter = released.clone();
        let guard = KeepAliveGuard::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(released.load(Ordering::SeqCst), 0);
        drop(guard);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }
}
