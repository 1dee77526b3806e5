use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tracing::warn;

/// Point-in-time view of the server-communicated cool-down.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RateLimitSnapshot {
    pub hard_limit_active: bool,
    pub ms_until_reset: u64,
}

/// Read-only source of rate-limit state. Whoever parses response headers owns
/// the writes; the queue only asks.
pub trait RateLimitTracker: Send + Sync {
    fn snapshot(&self) -> RateLimitSnapshot;

    fn is_hard_limit_active(&self) -> bool {
        self.snapshot().hard_limit_active
    }

    fn ms_until_reset(&self) -> u64 {
        self.snapshot().ms_until_reset
    }
}

/// In-process tracker holding a single global reset deadline.
#[derive(Debug, Default)]
pub struct CooldownTracker {
    reset_at: Mutex<Option<Instant>>,
}

impl CooldownTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a hard limit that lifts after `reset_in`.
    pub fn record_hard_limit(&self, reset_in: Duration) {
        warn!(?reset_in, "hard rate limit recorded");
        *self.lock() = Some(Instant::now() + reset_in);
    }

    pub fn clear(&self) {
        *self.lock() = None;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Instant>> {
        // The guarded value is a plain deadline, still valid after a panic.
        self.reset_at.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl RateLimitTracker for CooldownTracker {
    fn snapshot(&self) -> RateLimitSnapshot {
        let mut reset_at = self.lock();
        match *reset_at {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    *reset_at = None;
                    RateLimitSnapshot::default()
                } else {
                    RateLimitSnapshot {
                        hard_limit_active: true,
                        ms_until_reset: ceil_millis(deadline - now),
                    }
                }
            }
            None => RateLimitSnapshot::default(),
        }
    }
}

// Rounded up: an active limit never reports a zero wait.
fn ceil_millis(d: Duration) -> u64 {
    let ms = d.as_nanos().div_ceil(1_000_000);
    u64::try_from(ms).unwrap_or(u64::MAX)
}
