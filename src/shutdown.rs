//! Process-wide cancellation signal shared by every load worker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Cloneable shutdown flag with interruptible sleeps.
///
/// Workers are plain OS threads, so waiting is done on a condition variable
/// instead of a tokio primitive; [`Shutdown::sleep`] returns as soon as
/// [`Shutdown::cancel`] is called from any thread.
#[derive(Clone, Default)]
pub struct Shutdown {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    // Lock-free mirror of `cancelled` for hot loops.
    flag: AtomicBool,
    cancelled: Mutex<bool>,
    wake: Condvar,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal every holder to stop.  Idempotent.
    pub fn cancel(&self) {
        let mut cancelled = self
            .inner
            .cancelled
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *cancelled = true;
        self.inner.flag.store(true, Ordering::Release);
        self.inner.wake.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.flag.load(Ordering::Acquire)
    }

    /// Sleep for `duration` unless cancelled first.
    ///
    /// Returns `true` if the shutdown signal fired (before or during the wait).
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now().checked_add(duration);
        let mut cancelled = self
            .inner
            .cancelled
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        while !*cancelled {
            cancelled = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    match self.inner.wake.wait_timeout(cancelled, deadline - now) {
                        Ok((guard, _)) => guard,
                        Err(poisoned) => poisoned.into_inner().0,
                    }
                }
                // Unrepresentable deadline: only cancellation ends the wait.
                None => self
                    .inner
                    .wake
                    .wait(cancelled)
                    .unwrap_or_else(|poisoned| poisoned.into_inner()),
            };
        }
        true
    }
}

impl std::fmt::Debug for Shutdown {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shutdown")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
