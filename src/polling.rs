//! Bounded fixed-interval polling shared by authorization and session
//! status checks.
//!
//! Each check reports one of three outcomes: still pending (sleep and try
//! again), done, or an error that ends the loop immediately. The loop
//! makes at most `max_attempts` checks.
use serde::{Deserialize, Serialize};

use crate::clock::{CancellationToken, Clock};
use crate::config::PollingPolicy;
use crate::error::{Error, Result};

/// Status block carried by authorization and session status responses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperationStatus {
    pub code: i32,
    pub description: String,
    pub details: Vec<String>,
}

/// Outcome of a single check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStatus<T> {
    Pending,
    Done(T),
}

/// Run `check` until it reports [`PollStatus::Done`] or errors.
///
/// `check` receives the 1-based attempt number. No sleep follows the last
/// attempt.
pub fn poll_until<T, F>(
    operation: &'static str,
    policy: &PollingPolicy,
    clock: &dyn Clock,
    cancel: &CancellationToken,
    mut check: F,
) -> Result<T>
where
    F: FnMut(u32) -> Result<PollStatus<T>>,
{
    for attempt in 1..=policy.max_attempts {
        cancel.check()?;
        match check(attempt)? {
            PollStatus::Done(value) => return Ok(value),
            PollStatus::Pending => {
                tracing::debug!(operation, attempt, "still processing");
                if attempt < policy.max_attempts {
                    clock.sleep(policy.interval, cancel)?;
                }
            }
        }
    }
    Err(Error::PollingExceeded {
        operation,
        attempts: policy.max_attempts,
    })
}
