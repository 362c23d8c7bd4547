//! Reconnection scheduling.
//!
//! `ReconnectPolicy` is the pure backoff calculation; `ReconnectTimer` is the
//! single cancellable one-shot timer that represents "waiting to retry".

use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Backoff policy for automatic reconnection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Retries allowed between two successful opens.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(3000),
            max_delay: Duration::from_millis(30000),
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (1-based).
    ///
    /// `min(base * 2^(attempt-1), max)`:
    /// attempt=1 -> base, attempt=2 -> 2*base, attempt=3 -> 4*base, ...
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_millis() as u64;
        let max = self.max_delay.as_millis() as u64;

        let exponent = attempt.saturating_sub(1).min(32);
        let delay = base.saturating_mul(1u64 << exponent).min(max);
        Duration::from_millis(delay)
    }

    /// Whether retry number `attempt` is still within the cap.
    pub fn allows(&self, attempt: u32) -> bool {
        attempt <= self.max_attempts
    }
}

/// A pending one-shot reconnection timer.
///
/// Dropping or cancelling the timer guarantees the callback never runs
/// afterwards (the callback itself re-checks ownership under the manager lock).
#[derive(Debug)]
pub struct ReconnectTimer {
    id: u64,
    delay: Duration,
    cancel: CancellationToken,
    _handle: JoinHandle<()>,
}

impl ReconnectTimer {
    /// Start a timer that calls `on_fire` after `delay` unless cancelled first.
    pub fn schedule<F>(id: u64, delay: Duration, on_fire: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            tokio::select! {
                biased;
                () = token.cancelled() => {
                    debug!(timer_id = id, "Reconnect timer cancelled");
                }
                () = tokio::time::sleep(delay) => {
                    if !token.is_cancelled() {
                        on_fire();
                    }
                }
            }
        });

        Self {
            id,
            delay,
            cancel,
            _handle: handle,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Cancel the timer. Idempotent.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for ReconnectTimer {
    fn drop(&mut self) {
        // Only signal; never abort, the timer may be dropped from its own callback.
        self.cancel.cancel();
    }
}
