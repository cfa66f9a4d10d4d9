//! Bounded, cancellable waits
//!
//! Every wait in the engine has a deadline. Polling loops use
//! [`BoundedWait`] and sleep between probes; cancellation wins any race.

use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Sleep for `duration` unless `cancel` fires first.
pub async fn pause(duration: Duration, cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    tokio::select! {
        _ = cancel.cancelled() => Err(Error::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

/// Deadline plus polling interval for a probe loop
///
/// ```ignore
/// let wait = BoundedWait::new(timeout, interval);
/// loop {
///     if probe().await? {
///         break;
///     }
///     if !wait.tick(&cancel).await? {
///         return Err(timed_out());
///     }
/// }
/// ```
#[derive(Debug, Clone, Copy)]
pub struct BoundedWait {
    started: Instant,
    deadline: Instant,
    interval: Duration,
}

impl BoundedWait {
    /// Start a wait that expires after `timeout`
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        let started = Instant::now();
        Self {
            started,
            deadline: started + timeout,
            interval,
        }
    }

    /// Whether the deadline has passed
    pub fn expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Time left before the deadline
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Time since the wait started
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Sleep one interval (clipped to the deadline).
    ///
    /// Returns `Ok(false)` once the deadline has passed and `Err(Cancelled)`
    /// when the token fires.
    pub async fn tick(&self, cancel: &CancellationToken) -> Result<bool> {
        let remaining = self.remaining();
        if remaining.is_zero() {
            return Ok(false);
        }
        pause(self.interval.min(remaining), cancel).await?;
        Ok(true)
    }
}
