use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};
use serde_json::Value;

use shared::{ActionId, ActionKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionStatus {
    Pending,
    Completed,
    Expired,
    Cancelled,
}

/// A server-issued timed prompt. Created from an action-created envelope and
/// mutated only by the shared clock tick or explicit lifecycle calls.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingAction {
    pub id: ActionId,
    pub kind: ActionKind,
    pub payload: Value,
    pub expires_at: u64,
    pub timeout_seconds: u32,
    pub remaining_seconds: u32,
    pub status: ActionStatus,
    pub response: Option<Value>,
}

impl PendingAction {
    pub fn is_active(&self) -> bool {
        self.status == ActionStatus::Pending && self.remaining_seconds > 0
    }
}

/// Keeps the shared countdown clock alive while held. The tick runs whenever
/// at least one guard exists and stops once the last one is dropped.
#[derive(Debug)]
pub struct ClockGuard {
    refs: Arc<AtomicUsize>,
}

impl Clone for ClockGuard {
    fn clone(&self) -> Self {
        self.refs.fetch_add(1, Ordering::SeqCst);
        ClockGuard {
            refs: Arc::clone(&self.refs),
        }
    }
}

impl Drop for ClockGuard {
    fn drop(&mut self) {
        self.refs.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Tracks every concurrently pending timed prompt, keyed by its identifier.
/// Entries keep their creation order so "first pending of a kind" is stable.
pub struct ActionTracker {
    actions: Vec<PendingAction>,
    clock_refs: Arc<AtomicUsize>,
}

impl ActionTracker {
    pub fn new() -> Self {
        ActionTracker {
            actions: Vec::new(),
            clock_refs: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Hands out a guard that keeps the shared countdown clock running.
    pub fn clock_handle(&self) -> ClockGuard {
        self.clock_refs.fetch_add(1, Ordering::SeqCst);
        ClockGuard {
            refs: Arc::clone(&self.clock_refs),
        }
    }

    /// Whether any consumer currently holds a clock guard.
    pub fn clock_running(&self) -> bool {
        self.clock_refs.load(Ordering::SeqCst) > 0
    }

    /// Inserts a new pending action. A duplicate identifier replaces the
    /// existing entry, since the server owns action identity.
    pub fn create(
        &mut self,
        id: ActionId,
        kind: ActionKind,
        payload: Value,
        expires_at: u64,
        timeout_seconds: u32,
    ) {
        if let Some(existing) = self.actions.iter().position(|a| a.id == id) {
            warn!("Replacing action {} already being tracked", id);
            self.actions.remove(existing);
        }

        info!("Tracking action {} ({:?}, {}s)", id, kind, timeout_seconds);
        self.actions.push(PendingAction {
            id,
            kind,
            payload,
            expires_at,
            timeout_seconds,
            remaining_seconds: timeout_seconds,
            status: ActionStatus::Pending,
            response: None,
        });
    }

    /// Server-driven expiry. Idempotent: expiring an action that already
    /// expired (or never existed) changes nothing.
    pub fn expire(&mut self, id: &ActionId) -> bool {
        match self.actions.iter_mut().find(|a| &a.id == id) {
            Some(action) if action.status == ActionStatus::Expired => {
                debug!("Action {} already expired", id);
                false
            }
            Some(action) => {
                action.status = ActionStatus::Expired;
                action.remaining_seconds = 0;
                info!("Action {} expired", id);
                true
            }
            None => {
                debug!("Expiry for unknown action {}", id);
                false
            }
        }
    }

    /// Records a response and marks the action completed. Completing an
    /// action that no longer exists or is no longer pending is a no-op,
    /// since a submission can race the timeout.
    pub fn complete(&mut self, id: &ActionId, response: Value) -> bool {
        match self.actions.iter_mut().find(|a| &a.id == id) {
            Some(action) if action.status == ActionStatus::Pending => {
                action.status = ActionStatus::Completed;
                action.response = Some(response);
                info!("Action {} completed", id);
                true
            }
            Some(action) => {
                debug!("Ignoring response for action {} ({:?})", id, action.status);
                false
            }
            None => {
                debug!("Response for unknown action {}", id);
                false
            }
        }
    }

    /// Local dismissal of a prompt without answering it. The entry stays
    /// queryable until cleared.
    pub fn cancel(&mut self, id: &ActionId) -> bool {
        match self.actions.iter_mut().find(|a| &a.id == id) {
            Some(action) if action.status == ActionStatus::Pending => {
                action.status = ActionStatus::Cancelled;
                info!("Action {} cancelled", id);
                true
            }
            _ => false,
        }
    }

    /// Removes one entry outright.
    pub fn clear(&mut self, id: &ActionId) -> bool {
        let before = self.actions.len();
        self.actions.retain(|a| &a.id != id);
        before != self.actions.len()
    }

    /// Removes every entry.
    pub fn clear_all(&mut self) {
        if !self.actions.is_empty() {
            debug!("Clearing {} tracked actions", self.actions.len());
        }
        self.actions.clear();
    }

    /// One shared clock tick: decrements every pending countdown and locally
    /// expires any that reach zero without waiting for the server. Returns
    /// the identifiers that expired on this tick.
    pub fn tick(&mut self) -> Vec<ActionId> {
        let mut expired = Vec::new();

        for action in &mut self.actions {
            if action.status != ActionStatus::Pending || action.remaining_seconds == 0 {
                continue;
            }
            action.remaining_seconds -= 1;
            if action.remaining_seconds == 0 {
                action.status = ActionStatus::Expired;
                info!("Action {} timed out locally", action.id);
                expired.push(action.id.clone());
            }
        }

        expired
    }

    pub fn has_pending(&self) -> bool {
        self.actions
            .iter()
            .any(|a| a.status == ActionStatus::Pending)
    }

    /// Actions that are still pending with time remaining.
    pub fn active(&self) -> Vec<&PendingAction> {
        self.actions.iter().filter(|a| a.is_active()).collect()
    }

    pub fn get(&self, id: &ActionId) -> Option<&PendingAction> {
        self.actions.iter().find(|a| &a.id == id)
    }

    /// The earliest-created pending action of the given kind.
    pub fn first_pending_of_kind(&self, kind: ActionKind) -> Option<&PendingAction> {
        self.actions
            .iter()
            .find(|a| a.kind == kind && a.status == ActionStatus::Pending)
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}
