//! Last-vote-wins conflict resolution.
//!
//! A newer vote on a target makes any older vote on the same target still
//! waiting in the queue pointless; the older one is removed before it ever
//! reaches the network.

use std::collections::{HashMap, VecDeque};

use crate::action::{ActionId, ActionPayload, PendingAction};

/// Remove and return every waiting action that `incoming` supersedes, from
/// both the run queue and the set parked behind deferral timers.
pub(crate) fn take_superseded(
    queue: &mut VecDeque<PendingAction>,
    parked: &mut HashMap<ActionId, PendingAction>,
    incoming: &ActionPayload,
) -> Vec<PendingAction> {
    let mut superseded = Vec::new();

    let mut i = 0;
    while i < queue.len() {
        if queue[i].conflicts_with(incoming) {
            if let Some(old) = queue.remove(i) {
                superseded.push(old);
            }
        } else {
            i += 1;
        }
    }

    let parked_ids: Vec<ActionId> = parked
        .values()
        .filter(|a| a.conflicts_with(incoming))
        .map(|a| a.id)
        .collect();
    for id in parked_ids {
        if let Some(old) = parked.remove(&id) {
            superseded.push(old);
        }
    }

    superseded.sort_by_key(|a| a.id);
    superseded
}

/// Id of a newer waiting action that makes `returning` pointless. Used when
/// an action comes back from a retry wait, during which enqueue could not see
/// it.
pub(crate) fn newer_conflict(
    queue: &VecDeque<PendingAction>,
    parked: &HashMap<ActionId, PendingAction>,
    returning: &PendingAction,
) -> Option<ActionId> {
    queue
        .iter()
        .chain(parked.values())
        .filter(|a| a.id > returning.id && a.conflicts_with(&returning.payload))
        .map(|a| a.id)
        .max()
}
