use std::collections::{HashMap, VecDeque};

use log::{debug, warn};
use tokio::time::Instant;

use shared::{
    Faction, GamePhase, GameSnapshot, GameStatus, Player, PlayerId, RoleCounts, RoleKind,
    VoteResult,
};

pub const CHAT_LOG_CAP: usize = 100;

#[derive(Debug, Clone, PartialEq)]
pub struct ChatEntry {
    pub sender_id: PlayerId,
    pub sender_name: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct VoteState {
    pub active: bool,
    pub votes: HashMap<PlayerId, Option<PlayerId>>,
    // Outer None: not voted yet. Inner None: explicit abstain.
    pub my_vote: Option<Option<PlayerId>>,
    pub result: Option<VoteResult>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseTimer {
    pub remaining: u32,
}

#[derive(Debug, Clone)]
struct Notice {
    message: String,
    expires_at: Instant,
}

/// Authoritative mirror of server state plus the independently-tracked
/// sub-states. All mutation goes through the handler methods; everything
/// else is a derived view recomputed on read.
pub struct GameStore {
    me: PlayerId,
    snapshot: Option<GameSnapshot>,
    my_role: Option<RoleKind>,
    win: Option<Faction>,
    vote: VoteState,
    timer: Option<PhaseTimer>,
    night_call: Option<RoleKind>,
    chat: VecDeque<ChatEntry>,
    notice: Option<Notice>,
}

impl GameStore {
    pub fn new(me: PlayerId) -> Self {
        GameStore {
            me,
            snapshot: None,
            my_role: None,
            win: None,
            vote: VoteState::default(),
            timer: None,
            night_call: None,
            chat: VecDeque::new(),
            notice: None,
        }
    }

    pub fn me(&self) -> &PlayerId {
        &self.me
    }

    /// Replaces the snapshot wholesale. A "waiting" status is the
    /// authoritative signal of a fresh game and clears win, revealed role,
    /// and vote state.
    pub fn apply_snapshot(&mut self, snapshot: GameSnapshot) {
        if snapshot.status == GameStatus::Waiting {
            debug!("Waiting snapshot: clearing win, role, and vote state");
            self.win = None;
            self.my_role = None;
            self.vote = VoteState::default();
        }

        if snapshot.phase != GamePhase::Night {
            self.night_call = None;
        }

        if let Some(role) = snapshot.player(&self.me).and_then(|p| p.role) {
            self.my_role = Some(role);
        }

        self.snapshot = Some(snapshot);
    }

    /// Writes the visible role-count mapping without touching the rest of
    /// the snapshot. The reconciler owns what this should show.
    pub fn set_role_counts(&mut self, counts: RoleCounts) {
        if let Some(snapshot) = &mut self.snapshot {
            snapshot.role_counts = counts;
        }
    }

    pub fn set_host(&mut self, host: PlayerId) {
        match &mut self.snapshot {
            Some(snapshot) => snapshot.host = host,
            None => warn!("Host change before any snapshot; dropping"),
        }
    }

    pub fn reveal_role(&mut self, player_id: &PlayerId, role: RoleKind) {
        if player_id == &self.me {
            self.my_role = Some(role);
        }
        if let Some(snapshot) = &mut self.snapshot {
            if let Some(player) = snapshot.player_mut(player_id) {
                player.role = Some(role);
                return;
            }
        }
        warn!("Role reveal for unknown player {}", player_id);
    }

    pub fn set_presence(&mut self, player_id: &PlayerId, connected: bool) {
        if let Some(snapshot) = &mut self.snapshot {
            if let Some(player) = snapshot.player_mut(player_id) {
                player.connected = connected;
                return;
            }
        }
        debug!("Presence update for unknown player {}", player_id);
    }

    /// A new vote round resets the tally completely.
    pub fn vote_started(&mut self) {
        self.vote = VoteState {
            active: true,
            ..VoteState::default()
        };
    }

    pub fn vote_cast(&mut self, voter: PlayerId, target: Option<PlayerId>) {
        if voter == self.me {
            self.vote.my_vote = Some(target.clone());
        }
        self.vote.votes.insert(voter, target);
    }

    pub fn vote_result(&mut self, eliminated: Option<PlayerId>) {
        self.vote.active = false;
        self.vote.result = Some(VoteResult { eliminated });
    }

    pub fn timer_started(&mut self, seconds: u32) {
        self.timer = Some(PhaseTimer { remaining: seconds });
    }

    pub fn timer_cleared(&mut self) {
        self.timer = None;
    }

    /// Counts the displayed phase timer down one second.
    pub fn tick_timer(&mut self) -> bool {
        match &mut self.timer {
            Some(timer) if timer.remaining > 0 => {
                timer.remaining -= 1;
                true
            }
            _ => false,
        }
    }

    pub fn set_night_call(&mut self, role: Option<RoleKind>) {
        self.night_call = role;
    }

    pub fn push_chat(&mut self, entry: ChatEntry) {
        if self.chat.len() == CHAT_LOG_CAP {
            self.chat.pop_front();
        }
        self.chat.push_back(entry);
    }

    pub fn set_win(&mut self, winner: Faction) {
        self.win = Some(winner);
    }

    pub fn raise_notice(&mut self, message: String, expires_at: Instant) {
        self.notice = Some(Notice {
            message,
            expires_at,
        });
    }

    pub fn clear_notice(&mut self) {
        self.notice = None;
    }

    pub fn snapshot(&self) -> Option<&GameSnapshot> {
        self.snapshot.as_ref()
    }

    pub fn my_role(&self) -> Option<RoleKind> {
        self.my_role
    }

    pub fn win(&self) -> Option<Faction> {
        self.win
    }

    pub fn vote(&self) -> &VoteState {
        &self.vote
    }

    pub fn timer(&self) -> Option<PhaseTimer> {
        self.timer
    }

    pub fn night_call(&self) -> Option<RoleKind> {
        self.night_call
    }

    pub fn chat(&self) -> &VecDeque<ChatEntry> {
        &self.chat
    }

    pub fn notice(&self) -> Option<&str> {
        self.notice.as_ref().map(|n| n.message.as_str())
    }

    pub fn notice_deadline(&self) -> Option<Instant> {
        self.notice.as_ref().map(|n| n.expires_at)
    }

    pub fn is_host(&self) -> bool {
        self.snapshot
            .as_ref()
            .map(|s| s.host == self.me)
            .unwrap_or(false)
    }

    pub fn living(&self) -> Vec<&Player> {
        self.snapshot
            .iter()
            .flat_map(|s| s.players.iter())
            .filter(|p| p.alive)
            .collect()
    }

    pub fn dead(&self) -> Vec<&Player> {
        self.snapshot
            .iter()
            .flat_map(|s| s.players.iter())
            .filter(|p| !p.alive)
            .collect()
    }

    /// Tally of non-null vote targets, derived by folding over the votes map.
    pub fn vote_counts(&self) -> HashMap<PlayerId, u32> {
        let mut counts = HashMap::new();
        for target in self.vote.votes.values().flatten() {
            *counts.entry(target.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// Candidates whose count equals the maximum, when that maximum is
    /// greater than zero. Ties share leader status.
    pub fn vote_leaders(&self) -> Vec<PlayerId> {
        let counts = self.vote_counts();
        let max = counts.values().copied().max().unwrap_or(0);
        if max == 0 {
            return Vec::new();
        }

        let mut leaders: Vec<PlayerId> = counts
            .into_iter()
            .filter(|(_, count)| *count == max)
            .map(|(id, _)| id)
            .collect();
        leaders.sort();
        leaders
    }

    /// Whether the pending night-action role matches the viewer's own
    /// revealed role.
    pub fn my_turn(&self) -> bool {
        match (self.night_call, self.my_role) {
            (Some(called), Some(mine)) => called == mine,
            _ => false,
        }
    }

    /// Per-role target filtering. The rules differ per role and live in this
    /// one table.
    pub fn eligible_targets(&self, role: RoleKind) -> Vec<&Player> {
        let players = match &self.snapshot {
            Some(snapshot) => &snapshot.players,
            None => return Vec::new(),
        };

        players
            .iter()
            .filter(|p| match role {
                RoleKind::Seer => p.alive && p.id != self.me && p.role.is_none(),
                RoleKind::Witch => p.alive,
                RoleKind::Werewolf => {
                    p.alive && p.id != self.me && p.role != Some(RoleKind::Werewolf)
                }
                RoleKind::Villager => false,
            })
            .collect()
    }
}
