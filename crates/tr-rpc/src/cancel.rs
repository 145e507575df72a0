//! Cancellation handle governing a call.
//!
//! A [`CancelToken`] is the Rust rendering of the "governing context": the
//! caller keeps one handle, passes a clone down the call path, and firing
//! it interrupts any in-progress wait immediately. Checking is a relaxed
//! atomic load; awaiting rides a `tokio::sync::Notify`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    canceled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the token. Idempotent; wakes every current and future waiter.
    pub fn cancel(&self) {
        self.inner.canceled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    #[inline]
    pub fn is_canceled(&self) -> bool {
        self.inner.canceled.load(Ordering::SeqCst)
    }

    /// Resolves once the token has been fired. Resolves immediately if it
    /// already was.
    pub async fn canceled(&self) {
        loop {
            if self.is_canceled() {
                return;
            }
            let notified = self.inner.notify.notified();
            // Re-check after registering: cancel() may have fired between
            // the load above and the waiter registration.
            if self.is_canceled() {
                return;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CancelToken(canceled={})", self.is_canceled())
    }
}
