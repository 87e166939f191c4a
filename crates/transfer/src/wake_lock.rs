//! Keeps the device awake while a transfer is running.

use std::sync::Arc;

/// A platform mechanism that prevents sleep during long operations.
pub trait WakeLock: Send + Sync {
    /// Requests the lock. Returns `false` if the platform refused or has none.
    fn acquire(&self) -> bool;

    fn release(&self);
}

/// Wake lock for platforms without one.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopWakeLock;

impl WakeLock for NoopWakeLock {
    fn acquire(&self) -> bool {
        tracing::debug!("wake lock not available on this platform");
        false
    }

    fn release(&self) {}
}

/// Holds a wake lock for as long as it lives.
///
/// Dropping the guard releases the lock, so early returns and errors in the
/// transfer paths let go of it too.
pub struct WakeLockGuard {
    lock: Arc<dyn WakeLock>,
    held: bool,
}

impl WakeLockGuard {
    pub fn acquire(lock: Arc<dyn WakeLock>) -> Self {
        let held = lock.acquire();
        if held {
            tracing::debug!("wake lock acquired");
        }
        Self { lock, held }
    }

    pub fn is_held(&self) -> bool {
        self.held
    }
}

impl Drop for WakeLockGuard {
    fn drop(&mut self) {
        if self.held {
            self.lock.release();
            tracing::debug!("wake lock released");
        }
    }
}
