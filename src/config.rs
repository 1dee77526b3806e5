use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::action::ActionKind;
use crate::error::QueueError;

/// What to do with I/O failures that are not a lost connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransientErrorPolicy {
    /// Treat like a lost connection: pause the queue until reconnect, retry
    /// without limit.
    PauseQueue,
    /// Back off like a soft rate limit, sharing its retry budget.
    CountTowardRetryCap,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionQueueConfig {
    pub max_soft_retries: u32,
    pub soft_retry_base_ms: u64,
    pub transient_errors: TransientErrorPolicy,
    pub rate_limited_kinds: Vec<ActionKind>,
    pub unclaimed_result_capacity: usize,
}

impl Default for ActionQueueConfig {
    fn default() -> Self {
        Self {
            max_soft_retries: 3,
            soft_retry_base_ms: 2_000,
            transient_errors: TransientErrorPolicy::PauseQueue,
            rate_limited_kinds: ActionKind::ALL.to_vec(),
            unclaimed_result_capacity: 1_024,
        }
    }
}

impl ActionQueueConfig {
    pub fn from_json(json: &str) -> Result<Self, QueueError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| QueueError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), QueueError> {
        if self.soft_retry_base_ms == 0 {
            return Err(QueueError::InvalidConfig(
                "soft_retry_base_ms must be > 0".into(),
            ));
        }
        if self.unclaimed_result_capacity == 0 {
            return Err(QueueError::InvalidConfig(
                "unclaimed_result_capacity must be > 0".into(),
            ));
        }
        Ok(())
    }

    pub fn is_rate_limited(&self, kind: ActionKind) -> bool {
        self.rate_limited_kinds.contains(&kind)
    }

    /// Wait before the `retry`-th soft retry (1-based): base, 2x base, 4x base...
    pub fn soft_retry_delay(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(16);
        Duration::from_millis(self.soft_retry_base_ms.saturating_mul(1u64 << exponent))
    }
}
