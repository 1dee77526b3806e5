use serde::{Deserialize, Serialize};

use crate::action::ActionPayload;
use crate::error::NetworkError;

pub const HTTP_TOO_MANY_REQUESTS: u16 = 429;

/// Raw server answer to a mutation call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationResponse {
    pub status: u16,
    pub body: String,
}

impl MutationResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_rate_limited(&self) -> bool {
        self.status == HTTP_TOO_MANY_REQUESTS
    }
}

/// Performs the actual HTTP call for a payload. The wire format is the
/// implementor's business; the queue only looks at the status code and at
/// whether the failure was a lost connection.
#[async_trait::async_trait]
pub trait MutationExecutor: Send + Sync {
    async fn perform_mutation_call(
        &self,
        payload: &ActionPayload,
    ) -> Result<MutationResponse, NetworkError>;
}
