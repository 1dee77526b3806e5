//! Result delivery: one single-subscriber channel per action, plus a global
//! set of listeners that see every action added, completed or failed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};

use crate::action::{ActionId, ActionPayload, PendingAction};
use crate::error::ActionFailure;
use crate::network::MutationResponse;

/// What the server confirmed for a completed action.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActionResponse {
    pub payload: ActionPayload,
    pub response: MutationResponse,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ActionEvent {
    Loading,
    Success(ActionResponse),
    Failure(ActionFailure),
}

impl ActionEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ActionEvent::Loading)
    }
}

/// Receiving half handed to the single subscriber of an action.
#[derive(Debug)]
pub struct ResultChannel {
    id: ActionId,
    rx: mpsc::UnboundedReceiver<ActionEvent>,
}

impl ResultChannel {
    pub fn action_id(&self) -> ActionId {
        self.id
    }

    /// Next event, or `None` once the terminal event has been consumed.
    pub async fn next(&mut self) -> Option<ActionEvent> {
        self.rx.recv().await
    }

    /// Skip `Loading` and wait for the outcome.
    pub async fn outcome(mut self) -> Option<Result<ActionResponse, ActionFailure>> {
        while let Some(event) = self.rx.recv().await {
            match event {
                ActionEvent::Loading => continue,
                ActionEvent::Success(response) => return Some(Ok(response)),
                ActionEvent::Failure(failure) => return Some(Err(failure)),
            }
        }
        None
    }
}

/// Sending side kept by the queue until the action terminates.
pub(crate) struct ResultSlot {
    tx: mpsc::UnboundedSender<ActionEvent>,
    rx: Option<ResultChannel>,
    loading_sent: bool,
}

impl ResultSlot {
    pub(crate) fn new(id: ActionId) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Some(ResultChannel { id, rx }),
            loading_sent: false,
        }
    }

    pub(crate) fn take_receiver(&mut self) -> Option<ResultChannel> {
        self.rx.take()
    }

    /// `Loading` goes out once, however many attempts the action needs.
    pub(crate) fn loading(&mut self) {
        if !self.loading_sent {
            self.loading_sent = true;
            let _ = self.tx.send(ActionEvent::Loading);
        }
    }

    /// Emit the terminal event. Returns the receiver if nobody claimed it yet,
    /// so the caller can keep it around for a late subscriber.
    pub(crate) fn finish(mut self, event: ActionEvent) -> Option<ResultChannel> {
        debug_assert!(event.is_terminal());
        // A dropped receiver just means the subscriber stopped listening.
        let _ = self.tx.send(event);
        self.rx.take()
    }
}

/// Observer of every action's lifecycle, e.g. an optimistic content cache
/// that merges confirmed results or rolls back failed ones.
pub trait ActionListener: Send + Sync {
    fn on_added(&self, _action: &PendingAction) {}

    fn on_completed(&self, _action: &PendingAction, _response: &MutationResponse) {}

    fn on_failed(&self, _action: &PendingAction, _failure: &ActionFailure) {}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
pub(crate) struct ListenerRegistry {
    next_id: AtomicU64,
    listeners: RwLock<Vec<(ListenerId, Arc<dyn ActionListener>)>>,
}

impl ListenerRegistry {
    pub(crate) async fn add(&self, listener: Arc<dyn ActionListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().await.push((id, listener));
        id
    }

    pub(crate) async fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write().await;
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    // Callbacks run on a snapshot so a listener may add or remove listeners.
    async fn snapshot(&self) -> Vec<Arc<dyn ActionListener>> {
        self.listeners
            .read()
            .await
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect()
    }

    pub(crate) async fn added(&self, action: &PendingAction) {
        for listener in self.snapshot().await {
            listener.on_added(action);
        }
    }

    pub(crate) async fn completed(&self, action: &PendingAction, response: &MutationResponse) {
        for listener in self.snapshot().await {
            listener.on_completed(action, response);
        }
    }

    pub(crate) async fn failed(&self, action: &PendingAction, failure: &ActionFailure) {
        for listener in self.snapshot().await {
            listener.on_failed(action, failure);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{UnixTimeMs, VoteDirection};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    impl ActionListener for Recorder {
        fn on_added(&self, action: &PendingAction) {
            self.seen.lock().unwrap().push(format!("added {}", action.id));
        }

        fn on_failed(&self, action: &PendingAction, failure: &ActionFailure) {
            self.seen
                .lock()
                .unwrap()
                .push(format!("failed {} {failure}", action.id));
        }
    }

    fn action(id: i64) -> PendingAction {
        let mut action = PendingAction::new(
            ActionPayload::vote("t3_a", VoteDirection::Up),
            UnixTimeMs(1),
        );
        action.id = ActionId(id);
        action
    }

    #[tokio::test]
    async fn test_slot_sends_loading_once_then_terminal() {
        let mut slot = ResultSlot::new(ActionId(1));
        let mut channel = slot.take_receiver().unwrap();
        assert!(slot.take_receiver().is_none());

        slot.loading();
        slot.loading();
        let unclaimed = slot.finish(ActionEvent::Failure(ActionFailure::Rejected { status: 400 }));
        assert!(unclaimed.is_none());

        assert_eq!(channel.next().await, Some(ActionEvent::Loading));
        assert_eq!(
            channel.next().await,
            Some(ActionEvent::Failure(ActionFailure::Rejected { status: 400 }))
        );
        assert_eq!(channel.next().await, None);
    }

    #[tokio::test]
    async fn test_unclaimed_receiver_is_returned_with_buffered_events() {
        let mut slot = ResultSlot::new(ActionId(9));
        slot.loading();
        let channel = slot
            .finish(ActionEvent::Failure(ActionFailure::Superseded { by: ActionId(10) }))
            .unwrap();

        assert_eq!(channel.action_id(), ActionId(9));
        assert_eq!(
            channel.outcome().await,
            Some(Err(ActionFailure::Superseded { by: ActionId(10) }))
        );
    }

    #[tokio::test]
    async fn test_listener_add_and_remove() {
        let registry = ListenerRegistry::default();
        let recorder = Arc::new(Recorder::default());
        let id = registry.add(recorder.clone()).await;

        registry.added(&action(1)).await;
        registry
            .failed(&action(1), &ActionFailure::Rejected { status: 403 })
            .await;
        registry
            .completed(&action(1), &MutationResponse::new(200, "{}"))
            .await;

        assert!(registry.remove(id).await);
        assert!(!registry.remove(id).await);
        registry.added(&action(2)).await;

        assert_eq!(
            *recorder.seen.lock().unwrap(),
            vec![
                "added 1".to_string(),
                "failed 1 rejected by server with HTTP 403".to_string()
            ]
        );
    }
}
