//! One-way cancellation latch shared between a caller and a running plan

use parking_lot::Mutex;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

type AbortHook = Box<dyn FnOnce() + Send>;

struct Inner {
    aborted: AtomicBool,
    hook: Mutex<Option<AbortHook>>,
    waiters: Notify,
}

/// Monotonic abort flag with an optional once-only hook
///
/// Clones share the same state. Reading the flag never takes a lock.
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                aborted: AtomicBool::new(false),
                hook: Mutex::new(None),
                waiters: Notify::new(),
            }),
        }
    }

    /// Token that starts out set
    pub fn aborted() -> Self {
        let token = Self::new();
        token.set_true();
        token
    }

    pub fn is_set(&self) -> bool {
        self.inner.aborted.load(Ordering::Acquire)
    }

    /// Set the flag. Only the first call has an effect: it runs the
    /// registered hook, if any.
    pub fn set_true(&self) {
        if self.inner.aborted.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.waiters.notify_waiters();
        let hook = self.inner.hook.lock().take();
        if let Some(hook) = hook {
            run_hook(hook);
        }
    }

    /// Resolve once the token is set
    ///
    /// Read implementations should wait on this rather than registering a
    /// hook, which belongs to the token's owner.
    pub async fn cancelled(&self) {
        let notified = self.inner.waiters.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_set() {
            return;
        }
        notified.await;
    }

    /// Register the hook run on abort, replacing any earlier one
    ///
    /// If the token is already set the hook runs immediately. Either way it
    /// runs at most once.
    pub fn on_aborted<F>(&self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut slot = self.inner.hook.lock();
        if !self.is_set() {
            *slot = Some(Box::new(hook));
            return;
        }
        drop(slot);
        run_hook(Box::new(hook));
    }

    /// Remove the registered hook without running it
    pub fn clear_hook(&self) {
        self.inner.hook.lock().take();
    }

    /// True if both handles share the same flag
    pub fn same_as(&self, other: &CancellationToken) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

fn run_hook(hook: AbortHook) {
    if catch_unwind(AssertUnwindSafe(hook)).is_err() {
        tracing::warn!("abort hook panicked");
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("aborted", &self.is_set())
            .finish()
    }
}
