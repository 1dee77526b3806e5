// lib.rs - pending action queue

#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]

pub mod action;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod metrics;
pub mod network;
pub mod notifier;
pub mod queue;
pub mod rate_limit;
pub mod scheduler;
pub mod store;

mod conflict;
mod execution;

pub use action::{ActionId, ActionKind, ActionPayload, PendingAction, UnixTimeMs, VoteDirection};
pub use config::{ActionQueueConfig, TransientErrorPolicy};
pub use connectivity::{ManualReconnectNotifier, ReconnectNotifier, WakeCallback};
pub use error::{ActionFailure, NetworkError, QueueError};
pub use metrics::{MetricsSnapshot, QueueDepthSnapshot};
pub use network::{MutationExecutor, MutationResponse, HTTP_TOO_MANY_REQUESTS};
pub use notifier::{ActionEvent, ActionListener, ActionResponse, ListenerId, ResultChannel};
pub use queue::{ActionQueue, Collaborators};
pub use rate_limit::{CooldownTracker, RateLimitSnapshot, RateLimitTracker};
pub use scheduler::SchedulerState;
pub use store::ActionStore;
#[cfg(not(target_arch = "wasm32"))]
pub use store::SqliteActionStore;
