use std::sync::Mutex;

use tracing::info;

pub type WakeCallback = Box<dyn FnOnce() + Send + 'static>;

/// Platform hook that calls back once when connectivity returns.
pub trait ReconnectNotifier: Send + Sync {
    fn schedule_wake_on_connectivity(&self, wake: WakeCallback);
}

/// Notifier driven by the embedding application, which calls
/// [`connectivity_restored`](Self::connectivity_restored) from its own
/// network monitor.
#[derive(Default)]
pub struct ManualReconnectNotifier {
    armed: Mutex<Vec<WakeCallback>>,
}

impl ManualReconnectNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire and disarm every pending callback. Returns how many fired.
    pub fn connectivity_restored(&self) -> usize {
        let callbacks = std::mem::take(&mut *self.lock());
        let fired = callbacks.len();
        for wake in callbacks {
            wake();
        }
        if fired > 0 {
            info!(fired, "connectivity restored");
        }
        fired
    }

    pub fn armed_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<WakeCallback>> {
        self.armed.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ReconnectNotifier for ManualReconnectNotifier {
    fn schedule_wake_on_connectivity(&self, wake: WakeCallback) {
        self.lock().push(wake);
    }
}
