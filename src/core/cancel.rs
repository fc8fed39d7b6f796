//! Shareable cancellation token.
//!
//! One token is created per session and handed to the engine when the source
//! is opened. Triggering it is the *hard* stop: engine I/O watching the token
//! unblocks and aborts. The registry's *soft* stop never touches the token so
//! the engine keeps reading for whoever claims the source.
//!
//! Clones share state; triggering any clone triggers all of them.

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct TokenState {
    cancelled: Mutex<bool>,
    cond: Condvar,
}

/// Cloneable hard-cancel signal shared between a session and its engine.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<TokenState>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trigger cancellation and wake every waiter. Idempotent.
    pub fn cancel(&self) {
        let mut cancelled = self.inner.cancelled.lock().unwrap_or_else(|e| e.into_inner());
        if !*cancelled {
            *cancelled = true;
            self.inner.cond.notify_all();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.cancelled.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Block for up to `timeout` or until cancelled.
    ///
    /// Returns `true` if the token is cancelled when the wait ends.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut cancelled = self.inner.cancelled.lock().unwrap_or_else(|e| e.into_inner());
        while !*cancelled {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let (guard, _) = self
                .inner
                .cond
                .wait_timeout(cancelled, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            cancelled = guard;
        }
        *cancelled
    }

    /// True if both handles refer to the same underlying token.
    pub fn same_as(&self, other: &CancelToken) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}
