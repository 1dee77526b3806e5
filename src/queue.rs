//! The durable action queue.
//!
//! Every queued action lives in two places: a row in the [`ActionStore`] that
//! survives restarts, and an entry in the in-memory run queue the scheduler
//! drains. The row is written before the action becomes visible and removed
//! only once the action reaches a terminal outcome.

use std::collections::{HashMap, VecDeque};
use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use tokio::runtime::Handle;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::action::{ActionId, ActionPayload, PendingAction, UnixTimeMs};
use crate::config::ActionQueueConfig;
use crate::conflict::take_superseded;
use crate::connectivity::ReconnectNotifier;
use crate::error::{ActionFailure, QueueError};
use crate::metrics::{MetricsSnapshot, QueueDepthSnapshot, QueueMetrics};
use crate::network::MutationExecutor;
use crate::notifier::{
    ActionEvent, ActionListener, ListenerId, ListenerRegistry, ResultChannel, ResultSlot,
};
use crate::rate_limit::RateLimitTracker;
use crate::scheduler::SchedulerState;
use crate::store::ActionStore;

/// Platform services the queue drives.
pub struct Collaborators {
    pub store: Arc<dyn ActionStore>,
    pub network: Arc<dyn MutationExecutor>,
    pub rate_limits: Arc<dyn RateLimitTracker>,
    pub reconnect: Arc<dyn ReconnectNotifier>,
}

pub(crate) struct QueueState {
    pub(crate) queue: VecDeque<PendingAction>,
    /// Actions waiting out a hard rate limit, keyed for supersession.
    pub(crate) parked: HashMap<ActionId, PendingAction>,
    pub(crate) in_flight: Option<ActionId>,
    pub(crate) scheduler: SchedulerState,
    /// One per non-terminal action.
    pub(crate) slots: HashMap<ActionId, ResultSlot>,
    /// Terminal results nobody subscribed to yet.
    pub(crate) unclaimed: LruCache<ActionId, ResultChannel>,
    pub(crate) quarantined: Vec<(ActionId, String)>,
    /// Latest `scheduled_at` handed to an action joining the back.
    last_stamp: UnixTimeMs,
}

impl QueueState {
    fn new(unclaimed_capacity: NonZeroUsize) -> Self {
        Self {
            queue: VecDeque::new(),
            parked: HashMap::new(),
            in_flight: None,
            scheduler: SchedulerState::Idle,
            slots: HashMap::new(),
            unclaimed: LruCache::new(unclaimed_capacity),
            quarantined: Vec::new(),
            last_stamp: UnixTimeMs(0),
        }
    }

    /// `scheduled_at` for an action joining the back of the queue. Stamps
    /// never go backwards, so storage order `(scheduled_at, id)` matches run
    /// order. A requeued action keeps its older id, so it needs a strictly
    /// later stamp than everything it now follows.
    pub(crate) fn stamp_back(&mut self, now: UnixTimeMs, requeued: bool) -> UnixTimeMs {
        let floor = if requeued {
            UnixTimeMs(self.last_stamp.0.saturating_add(1))
        } else {
            self.last_stamp
        };
        self.last_stamp = now.max(floor);
        self.last_stamp
    }

    /// Deliver the terminal event and drop the slot.
    pub(crate) fn finish(&mut self, id: ActionId, event: ActionEvent) {
        if let Some(slot) = self.slots.remove(&id) {
            if let Some(channel) = slot.finish(event) {
                self.unclaimed.put(id, channel);
            }
        }
    }
}

pub(crate) struct Inner {
    pub(crate) store: Arc<dyn ActionStore>,
    pub(crate) network: Arc<dyn MutationExecutor>,
    pub(crate) rate_limits: Arc<dyn RateLimitTracker>,
    pub(crate) reconnect: Arc<dyn ReconnectNotifier>,
    pub(crate) config: ActionQueueConfig,
    pub(crate) runtime: Handle,
    pub(crate) state: Mutex<QueueState>,
    pub(crate) listeners: ListenerRegistry,
    pub(crate) metrics: QueueMetrics,
}

impl Inner {
    async fn supersede(&self, state: &mut QueueState, old: PendingAction, by: ActionId) {
        self.delete_row(old.id).await;
        state.finish(old.id, ActionEvent::Failure(ActionFailure::Superseded { by }));
        QueueMetrics::bump(&self.metrics.superseded);
        warn!(action_id = %old.id, %by, "Superseded by newer vote");
    }
}

/// Cheap to clone; all clones share one queue.
#[derive(Clone)]
pub struct ActionQueue {
    inner: Arc<Inner>,
}

impl ActionQueue {
    /// Build a queue on the current tokio runtime. Nothing runs until the
    /// first [`enqueue`](Self::enqueue), [`restore`](Self::restore) or
    /// [`trigger`](Self::trigger).
    pub fn new(collaborators: Collaborators, config: ActionQueueConfig) -> Result<Self, QueueError> {
        let runtime = Handle::try_current().map_err(|_| QueueError::NoRuntime)?;
        Self::with_runtime(collaborators, config, runtime)
    }

    pub fn with_runtime(
        collaborators: Collaborators,
        config: ActionQueueConfig,
        runtime: Handle,
    ) -> Result<Self, QueueError> {
        config.validate()?;
        let capacity = NonZeroUsize::new(config.unclaimed_result_capacity).ok_or_else(|| {
            QueueError::InvalidConfig("unclaimed_result_capacity must be positive".into())
        })?;

        Ok(Self {
            inner: Arc::new(Inner {
                store: collaborators.store,
                network: collaborators.network,
                rate_limits: collaborators.rate_limits,
                reconnect: collaborators.reconnect,
                config,
                runtime,
                state: Mutex::new(QueueState::new(capacity)),
                listeners: ListenerRegistry::default(),
                metrics: QueueMetrics::new(),
            }),
        })
    }

    /// Persist and queue a new action, superseding older votes on the same
    /// target. The returned action carries its storage id.
    #[instrument(skip(self, payload), fields(kind = %payload.kind()))]
    pub async fn enqueue(&self, payload: ActionPayload) -> Result<PendingAction, QueueError> {
        payload.validate()?;
        let inner = &self.inner;
        let now = UnixTimeMs::now();
        let mut action = PendingAction::new(payload, now);

        let mut state = inner.state.lock().await;
        action.scheduled_at = state.stamp_back(now, false);
        action.id = match inner.store.insert(&action).await {
            Ok(id) => id,
            Err(e) => {
                warn!("Failed to persist action: {:?}", e);
                QueueMetrics::bump(&inner.metrics.storage_errors);
                return Err(e);
            }
        };

        let superseded = {
            let QueueState { queue, parked, .. } = &mut *state;
            take_superseded(queue, parked, &action.payload)
        };
        for old in superseded {
            inner.supersede(&mut state, old, action.id).await;
        }

        state.queue.push_back(action.clone());
        state.slots.insert(action.id, ResultSlot::new(action.id));
        inner.listeners.added(&action).await;
        QueueMetrics::bump(&inner.metrics.enqueued);
        info!(action_id = %action.id, "Action enqueued");

        let start = state.scheduler.try_start();
        drop(state);
        if start {
            inner.spawn_drain();
        }
        Ok(action)
    }

    /// Reload persisted actions after a restart, oldest first. Rows that no
    /// longer decode are quarantined and left in storage. Returns how many
    /// actions were queued.
    #[instrument(skip(self))]
    pub async fn restore(&self) -> Result<usize, QueueError> {
        let inner = &self.inner;
        // Load under the lock so a row finishing concurrently is either gone
        // or still has its slot.
        let mut state = inner.state.lock().await;
        let rows = inner.store.load_all_pending().await?;

        let mut restored = 0;
        for row in rows {
            match row {
                Ok(action) => {
                    if state.slots.contains_key(&action.id) {
                        debug!(action_id = %action.id, "Already queued, skipping");
                        continue;
                    }
                    state.last_stamp = state.last_stamp.max(action.scheduled_at);
                    state.slots.insert(action.id, ResultSlot::new(action.id));
                    state.queue.push_back(action.clone());
                    inner.listeners.added(&action).await;
                    QueueMetrics::bump(&inner.metrics.restored);
                    restored += 1;
                }
                Err(QueueError::CorruptedRow { id, reason }) => {
                    warn!("Quarantining corrupted row {}: {}", id, reason);
                    if !state.quarantined.iter().any(|(q, _)| *q == id) {
                        state.quarantined.push((id, reason));
                        QueueMetrics::bump(&inner.metrics.quarantined);
                    }
                }
                Err(e) => return Err(e),
            }
        }

        if !state.quarantined.is_empty() {
            warn!("Restored with {} quarantined rows", state.quarantined.len());
        }
        info!(restored, queued = state.queue.len(), "Queue restored");

        let start = state.scheduler.try_start();
        drop(state);
        if start {
            inner.spawn_drain();
        }
        Ok(restored)
    }

    /// Claim the result channel of an action. Each action has exactly one
    /// subscriber; events emitted before subscribing are buffered.
    pub async fn subscribe(&self, id: ActionId) -> Result<ResultChannel, QueueError> {
        let mut state = self.inner.state.lock().await;
        if let Some(slot) = state.slots.get_mut(&id) {
            return slot.take_receiver().ok_or(QueueError::AlreadySubscribed(id));
        }
        state.unclaimed.pop(&id).ok_or(QueueError::UnknownAction(id))
    }

    pub async fn add_listener(&self, listener: Arc<dyn ActionListener>) -> ListenerId {
        self.inner.listeners.add(listener).await
    }

    pub async fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.listeners.remove(id).await
    }

    /// Start draining if the scheduler is idle. A running drain or a queue
    /// waiting for connectivity is left alone.
    pub async fn trigger(&self) {
        let start = self.inner.state.lock().await.scheduler.try_start();
        if start {
            self.inner.spawn_drain();
        }
    }

    pub async fn scheduler_state(&self) -> SchedulerState {
        self.inner.state.lock().await.scheduler
    }

    /// Actions waiting to run, in run order. Parked and in-flight actions are
    /// not included.
    pub async fn queued(&self) -> Vec<PendingAction> {
        self.inner.state.lock().await.queue.iter().cloned().collect()
    }

    pub async fn queued_len(&self) -> usize {
        self.inner.state.lock().await.queue.len()
    }

    pub async fn depth(&self) -> QueueDepthSnapshot {
        let state = self.inner.state.lock().await;
        let mut by_kind = HashMap::new();
        for action in state.queue.iter().chain(state.parked.values()) {
            *by_kind.entry(action.kind()).or_insert(0) += 1;
        }
        QueueDepthSnapshot {
            queued: state.queue.len(),
            parked: state.parked.len(),
            in_flight: state.in_flight.is_some(),
            scheduler: state.scheduler,
            by_kind,
        }
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    pub async fn quarantined(&self) -> Vec<(ActionId, String)> {
        self.inner.state.lock().await.quarantined.clone()
    }

    pub fn config(&self) -> &ActionQueueConfig {
        &self.inner.config
    }
}
