//! Single-flight drain loop and the per-attempt execution protocol.
//!
//! At most one drain task runs at a time. It pops the head of the queue, runs
//! it against the network and applies the classified outcome before looking
//! at the next action. A hard rate limit parks the action behind a timer, a
//! soft one waits out an exponential backoff inside the loop, and a lost
//! connection stops the loop until the platform reports connectivity again.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, instrument, warn};

use crate::action::{ActionId, PendingAction, UnixTimeMs};
use crate::conflict::newer_conflict;
use crate::error::ActionFailure;
use crate::execution::{classify, Outcome};
use crate::metrics::QueueMetrics;
use crate::network::MutationResponse;
use crate::notifier::{ActionEvent, ActionResponse};
use crate::queue::Inner;

/// Shortest hard-limit deferral. A tracker that reports an active limit with
/// nothing left to wait would otherwise park and unpark in a tight loop.
const MIN_HARD_DEFERRAL: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    /// Stopped on a connection error; only a reconnect callback restarts it.
    WaitingForConnectivity,
}

impl SchedulerState {
    /// Claim the drain loop. Only an idle scheduler can be started.
    pub(crate) fn try_start(&mut self) -> bool {
        if *self == SchedulerState::Idle {
            *self = SchedulerState::Running;
            true
        } else {
            false
        }
    }
}

enum Step {
    Continue,
    Pause,
}

impl Inner {
    pub(crate) fn spawn_drain(self: &Arc<Self>) {
        let inner = Arc::clone(self);
        self.runtime.spawn(async move { inner.drain().await });
    }

    async fn drain(self: Arc<Self>) {
        debug!("drain started");
        loop {
            let action = {
                let mut state = self.state.lock().await;
                match state.queue.pop_front() {
                    Some(action) => {
                        state.in_flight = Some(action.id);
                        action
                    }
                    None => {
                        state.in_flight = None;
                        state.scheduler = SchedulerState::Idle;
                        debug!("queue drained");
                        return;
                    }
                }
            };

            if self.config.is_rate_limited(action.kind()) {
                let snapshot = self.rate_limits.snapshot();
                if snapshot.hard_limit_active {
                    self.reschedule(action, Duration::from_millis(snapshot.ms_until_reset))
                        .await;
                    continue;
                }
            }

            if let Step::Pause = self.execute(action).await {
                return;
            }
        }
    }

    #[instrument(skip(self, action), fields(action_id = %action.id, kind = %action.kind()))]
    async fn execute(self: &Arc<Self>, action: PendingAction) -> Step {
        {
            let mut state = self.state.lock().await;
            if let Some(slot) = state.slots.get_mut(&action.id) {
                slot.loading();
            }
        }

        let result = self.network.perform_mutation_call(&action.payload).await;

        match classify(result, self.rate_limits.as_ref(), &self.config) {
            Outcome::Success(response) => self.complete(action, response).await,
            Outcome::HardRateLimited { delay } => self.reschedule(action, delay).await,
            Outcome::SoftRateLimited { status } => {
                self.retry_or_fail(action, ActionFailure::Rejected { status })
                    .await;
            }
            Outcome::TransientFailure { message } => {
                self.retry_or_fail(action, ActionFailure::Network { message })
                    .await;
            }
            Outcome::PermanentError { status } => {
                self.fail(action, ActionFailure::Rejected { status }).await;
            }
            Outcome::ConnectionLost { message } => {
                self.pause(action, &message).await;
                return Step::Pause;
            }
        }
        Step::Continue
    }

    async fn complete(&self, action: PendingAction, response: MutationResponse) {
        self.delete_row(action.id).await;

        let mut state = self.state.lock().await;
        state.in_flight = None;
        state.finish(
            action.id,
            ActionEvent::Success(ActionResponse {
                payload: action.payload.clone(),
                response: response.clone(),
            }),
        );
        self.listeners.completed(&action, &response).await;
        QueueMetrics::bump(&self.metrics.completed);
        info!(status = response.status, "Action completed");
    }

    async fn fail(&self, action: PendingAction, failure: ActionFailure) {
        self.delete_row(action.id).await;

        let mut state = self.state.lock().await;
        state.in_flight = None;
        state.finish(action.id, ActionEvent::Failure(failure.clone()));
        self.listeners.failed(&action, &failure).await;
        QueueMetrics::bump(&self.metrics.failed);
        warn!("Action failed: {}", failure);
    }

    /// Back off and put the action at the back of the queue, or fail it with
    /// `exhausted` once the retry budget is spent.
    async fn retry_or_fail(&self, mut action: PendingAction, exhausted: ActionFailure) {
        if action.retry_count >= self.config.max_soft_retries {
            warn!(retries = action.retry_count, "Retry budget exhausted");
            self.fail(action, exhausted).await;
            return;
        }

        action.retry_count += 1;
        self.update_row(&action).await;

        let delay = self.config.soft_retry_delay(action.retry_count);
        QueueMetrics::bump(&self.metrics.soft_retries);
        warn!(
            retry = action.retry_count,
            ?delay,
            "Soft failure, backing off"
        );
        tokio::time::sleep(delay).await;

        let mut state = self.state.lock().await;
        state.in_flight = None;
        if let Some(by) = newer_conflict(&state.queue, &state.parked, &action) {
            self.delete_row(action.id).await;
            state.finish(action.id, ActionEvent::Failure(ActionFailure::Superseded { by }));
            QueueMetrics::bump(&self.metrics.superseded);
            warn!(%by, "Retried action superseded while backing off");
            return;
        }
        action.scheduled_at = state.stamp_back(UnixTimeMs::now(), true);
        self.update_row(&action).await;
        state.queue.push_back(action);
    }

    /// Park the action and bring it back after `delay`. The wait comes from
    /// the rate-limit tracker, so it does not touch the retry count.
    #[instrument(skip(self, action), fields(action_id = %action.id))]
    pub(crate) async fn reschedule(self: &Arc<Self>, mut action: PendingAction, delay: Duration) {
        let delay = delay.max(MIN_HARD_DEFERRAL);
        let id = action.id;
        // A restart before the timer fires restores the action where it
        // would have re-entered.
        action.scheduled_at = UnixTimeMs(UnixTimeMs::now().0.saturating_add(millis(delay)));
        self.update_row(&action).await;
        {
            let mut state = self.state.lock().await;
            state.in_flight = None;
            state.parked.insert(id, action);
        }
        QueueMetrics::bump(&self.metrics.hard_deferrals);
        warn!(?delay, "Hard rate limit, deferring");

        let inner = Arc::clone(self);
        self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            inner.unpark(id).await;
        });
    }

    async fn unpark(self: Arc<Self>, id: ActionId) {
        let mut state = self.state.lock().await;
        let Some(mut action) = state.parked.remove(&id) else {
            debug!(action_id = %id, "Parked action already gone");
            return;
        };

        action.scheduled_at = state.stamp_back(UnixTimeMs::now(), true);
        self.update_row(&action).await;
        state.queue.push_back(action);

        let start = state.scheduler.try_start();
        drop(state);
        if start {
            self.spawn_drain();
        }
    }

    /// Put the action back at the head, stop the loop and ask the platform to
    /// wake us when connectivity returns.
    async fn pause(self: &Arc<Self>, action: PendingAction, message: &str) {
        {
            let mut state = self.state.lock().await;
            state.in_flight = None;
            state.queue.push_front(action);
            state.scheduler = SchedulerState::WaitingForConnectivity;
        }
        QueueMetrics::bump(&self.metrics.connectivity_pauses);
        warn!("Connection lost, pausing queue: {}", message);

        let weak = Arc::downgrade(self);
        let runtime = self.runtime.clone();
        self.reconnect.schedule_wake_on_connectivity(Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                runtime.spawn(async move { inner.resume().await });
            }
        }));
    }

    async fn resume(self: Arc<Self>) {
        let start = {
            let mut state = self.state.lock().await;
            if state.scheduler == SchedulerState::WaitingForConnectivity {
                state.scheduler = SchedulerState::Idle;
            }
            state.scheduler.try_start()
        };
        if start {
            info!("Resuming queue after reconnect");
            self.spawn_drain();
        }
    }

    async fn update_row(&self, action: &PendingAction) {
        if let Err(e) = self.store.update(action).await {
            error!("Failed to update row {}: {:?}", action.id, e);
            QueueMetrics::bump(&self.metrics.storage_errors);
        }
    }

    pub(crate) async fn delete_row(&self, id: ActionId) {
        match self.store.delete(id).await {
            Ok(true) => {}
            Ok(false) => debug!(action_id = %id, "Row already removed"),
            Err(e) => {
                error!("Failed to delete row {}: {:?}", id, e);
                QueueMetrics::bump(&self.metrics.storage_errors);
            }
        }
    }
}

fn millis(delay: Duration) -> u64 {
    u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
}
