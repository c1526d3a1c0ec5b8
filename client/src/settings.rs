use std::time::Duration;

use log::{debug, info};
use tokio::time::Instant;

use shared::{RoleCounts, RoleKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// No local divergence from the confirmed baseline.
    Clean,
    /// An uncommitted edit exists; the debounce deadline is (or will be) armed.
    DirtyPending,
    /// The coalesced edit was sent; awaiting the server echo.
    InFlight,
    /// A rejection rolled the visible state back; the notice is still showing.
    Rejected,
}

/// Reconciles local role-count edits against server confirmation. Edits show
/// instantly, bursts coalesce into one send per quiet period, and rejections
/// roll back to the last confirmed mapping.
pub struct SettingsSync {
    confirmed: RoleCounts,
    pending: Option<RoleCounts>,
    phase: SyncPhase,
    flush_at: Option<Instant>,
    window: Duration,
}

impl SettingsSync {
    pub fn new(window: Duration) -> Self {
        SettingsSync {
            confirmed: RoleCounts::new(),
            pending: None,
            phase: SyncPhase::Clean,
            flush_at: None,
            window,
        }
    }

    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    pub fn flush_deadline(&self) -> Option<Instant> {
        self.flush_at
    }

    pub fn confirmed(&self) -> &RoleCounts {
        &self.confirmed
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// The mapping the UI should currently show: the uncommitted edit when
    /// one exists, the confirmed baseline otherwise.
    pub fn visible(&self) -> &RoleCounts {
        self.pending.as_ref().unwrap_or(&self.confirmed)
    }

    /// Adopts an authoritative snapshot's mapping as the baseline. Ignored
    /// while an uncommitted edit exists so local divergence survives.
    pub fn seed(&mut self, counts: RoleCounts) {
        if self.pending.is_none() {
            self.confirmed = counts;
        }
    }

    /// Applies a local edit on top of the outstanding edit (or the confirmed
    /// mapping when none exists), clamping at zero, and re-arms the debounce
    /// deadline. Returns the mapping the UI should now show.
    pub fn update_count(&mut self, role: RoleKind, delta: i64, now: Instant) -> RoleCounts {
        let mut next = self
            .pending
            .clone()
            .unwrap_or_else(|| self.confirmed.clone());

        let current = next.get(&role).copied().unwrap_or(0) as i64;
        let value = (current + delta).max(0) as u32;
        next.insert(role, value);
        debug!("Local settings edit: {} -> {}", role, value);

        self.pending = Some(next.clone());
        self.phase = SyncPhase::DirtyPending;
        self.flush_at = Some(now + self.window);
        next
    }

    /// Debounce deadline fired: hands back the coalesced mapping to send and
    /// moves to in-flight. Returns None when there is nothing to send.
    pub fn take_flush(&mut self) -> Option<RoleCounts> {
        self.flush_at = None;
        if self.phase != SyncPhase::DirtyPending {
            return None;
        }

        match &self.pending {
            Some(counts) => {
                self.phase = SyncPhase::InFlight;
                Some(counts.clone())
            }
            None => None,
        }
    }

    /// The send never left (connection not open). Falls back to dirty so the
    /// edit flushes again once the connection reopens.
    pub fn flush_dropped(&mut self) {
        if self.phase == SyncPhase::InFlight {
            self.phase = SyncPhase::DirtyPending;
        }
    }

    /// Arms an immediate flush for an edit that was stranded offline.
    pub fn rearm_after_reconnect(&mut self, now: Instant) {
        if self.phase == SyncPhase::DirtyPending && self.flush_at.is_none() {
            self.flush_at = Some(now);
        }
    }

    /// Confirmed server echo: the only path that advances the baseline. An
    /// edit made while the send was in flight stays pending; its own flush
    /// supersedes this echo (last write wins).
    pub fn confirm(&mut self, counts: RoleCounts) {
        self.confirmed = counts;

        match self.phase {
            SyncPhase::InFlight => {
                info!("Settings confirmed");
                self.pending = None;
                self.phase = SyncPhase::Clean;
            }
            SyncPhase::DirtyPending => {
                debug!("Settings confirmed while newer edits are pending");
            }
            SyncPhase::Clean | SyncPhase::Rejected => {}
        }
    }

    /// Rejection path: cancels the debounce, discards the uncommitted edit,
    /// and returns the confirmed mapping to restore the visible snapshot.
    pub fn reject(&mut self) -> RoleCounts {
        info!("Settings rejected; rolling back to last confirmed");
        self.pending = None;
        self.flush_at = None;
        self.phase = SyncPhase::Rejected;
        self.confirmed.clone()
    }

    /// The rejection notice ran out; the reconciler reads clean again.
    pub fn settle_rejection(&mut self) {
        if self.phase == SyncPhase::Rejected {
            self.phase = SyncPhase::Clean;
        }
    }
}
