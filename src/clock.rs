//! Time source and cancellation.
//!
//! Polling loops never call `std::thread::sleep` directly: they go through
//! a [`Clock`] so tests can run thirty polling rounds instantly, and every
//! sleep observes a [`CancellationToken`].
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use time::OffsetDateTime;

use crate::error::{Error, Result};

/// Wall clock plus cancellable sleeping.
pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;

    /// Block for `duration`, returning [`Error::Cancelled`] as soon as
    /// `cancel` fires.
    fn sleep(&self, duration: Duration, cancel: &CancellationToken) -> Result<()>;
}

/// The real clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }

    fn sleep(&self, duration: Duration, cancel: &CancellationToken) -> Result<()> {
        if cancel.wait_timeout(duration) {
            return Err(Error::Cancelled);
        }
        Ok(())
    }
}

/// Externally supplied cancellation signal.
///
/// Clones share state: cancelling any clone cancels all of them and wakes
/// every thread blocked in [`CancellationToken::wait_timeout`].
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let (lock, condvar) = &*self.inner;
        *lock.lock().unwrap_or_else(PoisonError::into_inner) = true;
        condvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// `Err(Cancelled)` once the token has fired.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    /// Wait up to `timeout`; returns `true` if cancelled before it elapsed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (lock, condvar) = &*self.inner;
        let deadline = Instant::now() + timeout;
        let mut cancelled = lock.lock().unwrap_or_else(PoisonError::into_inner);
        while !*cancelled {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            cancelled = condvar
                .wait_timeout(cancelled, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }
}
