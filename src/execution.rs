//! Classification of a single network attempt.

use std::time::Duration;

use crate::config::{ActionQueueConfig, TransientErrorPolicy};
use crate::error::NetworkError;
use crate::network::MutationResponse;
use crate::rate_limit::RateLimitTracker;

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Outcome {
    Success(MutationResponse),
    /// 429 while the tracker confirms a hard limit. Wait is authoritative.
    HardRateLimited { delay: Duration },
    /// 429 without a confirmed hard limit; `status` is what the server said.
    SoftRateLimited { status: u16 },
    /// Transient I/O counted against the soft-retry budget.
    TransientFailure { message: String },
    PermanentError { status: u16 },
    ConnectionLost { message: String },
}

pub(crate) fn classify(
    result: Result<MutationResponse, NetworkError>,
    rate_limits: &dyn RateLimitTracker,
    config: &ActionQueueConfig,
) -> Outcome {
    match result {
        Ok(response) if response.is_success() => Outcome::Success(response),
        Ok(response) if response.is_rate_limited() => {
            let snapshot = rate_limits.snapshot();
            if snapshot.hard_limit_active {
                Outcome::HardRateLimited {
                    delay: Duration::from_millis(snapshot.ms_until_reset),
                }
            } else {
                Outcome::SoftRateLimited {
                    status: response.status,
                }
            }
        }
        Ok(response) => Outcome::PermanentError {
            status: response.status,
        },
        Err(NetworkError::Unreachable(message)) => Outcome::ConnectionLost { message },
        Err(NetworkError::Transient(message)) => match config.transient_errors {
            TransientErrorPolicy::PauseQueue => Outcome::ConnectionLost { message },
            TransientErrorPolicy::CountTowardRetryCap => Outcome::TransientFailure { message },
        },
    }
}
