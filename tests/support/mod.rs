#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use pending_actions::{
    ActionFailure, ActionId, ActionListener, ActionPayload, ActionQueue, ActionQueueConfig,
    ActionStore, Collaborators, CooldownTracker, ManualReconnectNotifier, MutationExecutor,
    MutationResponse, NetworkError, PendingAction, QueueError, SchedulerState, SqliteActionStore,
};
use tokio::time::Instant;

pub type Reply = Result<MutationResponse, NetworkError>;

pub fn ok() -> Reply {
    Ok(MutationResponse::new(200, "{}"))
}

pub fn status(code: u16) -> Reply {
    Ok(MutationResponse::new(code, ""))
}

pub fn offline() -> Reply {
    Err(NetworkError::Unreachable("no route to host".into()))
}

/// Answers from a script, then 200 once the script runs out.
#[derive(Default)]
pub struct ScriptedExecutor {
    script: Mutex<VecDeque<Reply>>,
    calls: Mutex<Vec<(ActionPayload, Instant)>>,
    /// Arms this tracker for the given duration whenever a 429 is answered.
    hard_limit_on_429: Mutex<Option<(Arc<CooldownTracker>, Duration)>>,
}

impl ScriptedExecutor {
    pub fn new(script: impl IntoIterator<Item = Reply>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            ..Default::default()
        }
    }

    pub fn push(&self, reply: Reply) {
        self.script.lock().unwrap().push_back(reply);
    }

    pub fn arm_hard_limit_on_429(&self, tracker: Arc<CooldownTracker>, reset_in: Duration) {
        *self.hard_limit_on_429.lock().unwrap() = Some((tracker, reset_in));
    }

    pub fn calls(&self) -> Vec<ActionPayload> {
        self.calls.lock().unwrap().iter().map(|(p, _)| p.clone()).collect()
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().iter().map(|(_, t)| *t).collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl MutationExecutor for ScriptedExecutor {
    async fn perform_mutation_call(&self, payload: &ActionPayload) -> Reply {
        self.calls
            .lock()
            .unwrap()
            .push((payload.clone(), Instant::now()));
        let reply = self.script.lock().unwrap().pop_front().unwrap_or_else(ok);

        if let Ok(response) = &reply {
            if response.is_rate_limited() {
                if let Some((tracker, reset_in)) = &*self.hard_limit_on_429.lock().unwrap() {
                    tracker.record_hard_limit(*reset_in);
                }
            }
        }
        reply
    }
}

/// Store wrapper that can be told to fail inserts.
pub struct FailableStore {
    inner: SqliteActionStore,
    pub fail_inserts: AtomicBool,
}

impl FailableStore {
    pub fn new() -> Self {
        Self {
            inner: SqliteActionStore::open_in_memory().unwrap(),
            fail_inserts: AtomicBool::new(false),
        }
    }

    pub fn row_count(&self) -> usize {
        self.inner.row_count().unwrap()
    }
}

#[async_trait]
impl ActionStore for FailableStore {
    async fn insert(&self, action: &PendingAction) -> Result<ActionId, QueueError> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(QueueError::Storage("disk full".into()));
        }
        self.inner.insert(action).await
    }

    async fn delete(&self, id: ActionId) -> Result<bool, QueueError> {
        self.inner.delete(id).await
    }

    async fn update(&self, action: &PendingAction) -> Result<(), QueueError> {
        self.inner.update(action).await
    }

    async fn load_all_pending(
        &self,
    ) -> Result<Vec<Result<PendingAction, QueueError>>, QueueError> {
        self.inner.load_all_pending().await
    }
}

#[derive(Default)]
pub struct RecordingListener {
    pub events: Mutex<Vec<String>>,
    pub completed: Mutex<Vec<PendingAction>>,
}

impl RecordingListener {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl ActionListener for RecordingListener {
    fn on_added(&self, action: &PendingAction) {
        self.events.lock().unwrap().push(format!("added {}", action.id));
    }

    fn on_completed(&self, action: &PendingAction, response: &MutationResponse) {
        self.events
            .lock()
            .unwrap()
            .push(format!("completed {} {}", action.id, response.status));
        self.completed.lock().unwrap().push(action.clone());
    }

    fn on_failed(&self, action: &PendingAction, failure: &ActionFailure) {
        self.events
            .lock()
            .unwrap()
            .push(format!("failed {} {failure}", action.id));
    }
}

pub struct Harness {
    pub queue: ActionQueue,
    pub executor: Arc<ScriptedExecutor>,
    pub rate_limits: Arc<CooldownTracker>,
    pub reconnect: Arc<ManualReconnectNotifier>,
    pub listener: Arc<RecordingListener>,
}

impl Harness {
    pub async fn new(store: Arc<dyn ActionStore>, executor: ScriptedExecutor) -> Self {
        Self::with_config(store, executor, ActionQueueConfig::default()).await
    }

    pub async fn with_config(
        store: Arc<dyn ActionStore>,
        executor: ScriptedExecutor,
        config: ActionQueueConfig,
    ) -> Self {
        let executor = Arc::new(executor);
        let rate_limits = Arc::new(CooldownTracker::new());
        let reconnect = Arc::new(ManualReconnectNotifier::new());
        let queue = ActionQueue::new(
            Collaborators {
                store,
                network: executor.clone(),
                rate_limits: rate_limits.clone(),
                reconnect: reconnect.clone(),
            },
            config,
        )
        .unwrap();
        let listener = Arc::new(RecordingListener::default());
        queue.add_listener(listener.clone()).await;

        Self {
            queue,
            executor,
            rate_limits,
            reconnect,
            listener,
        }
    }
}

impl Harness {
    pub async fn wait_for_state(&self, want: SchedulerState) {
        for _ in 0..POLLS {
            if self.queue.scheduler_state().await == want {
                return;
            }
            tokio::time::sleep(POLL_STEP).await;
        }
        panic!("scheduler never reached {want:?}");
    }

    pub async fn wait_for_calls(&self, n: usize) {
        for _ in 0..POLLS {
            if self.executor.call_count() >= n {
                return;
            }
            tokio::time::sleep(POLL_STEP).await;
        }
        panic!("executor never saw {n} calls");
    }
}

// Steps of paused time; 100s of virtual time in total.
const POLLS: usize = 10_000;
const POLL_STEP: Duration = Duration::from_millis(10);
