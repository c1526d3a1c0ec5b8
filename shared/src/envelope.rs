use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::game::{
    ActionId, ActionKind, Faction, GameSnapshot, PlayerId, RoleCounts, RoleKind,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "channel", rename_all = "lowercase")]
pub enum ServerEnvelope {
    Game(GameEvent),
    Presence(PresenceEvent),
    Settings(SettingsEvent),
    Timer(TimerEvent),
    Action(ActionEvent),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum GameEvent {
    Snapshot(GameSnapshot),
    HostChanged {
        host_id: PlayerId,
    },
    RoleRevealed {
        player_id: PlayerId,
        role: RoleKind,
    },
    NightCall {
        role: RoleKind,
    },
    NightClear,
    Chat {
        sender_id: PlayerId,
        sender_name: String,
        message: String,
    },
    VoteStarted,
    VoteCast {
        voter_id: PlayerId,
        target: Option<PlayerId>,
    },
    VoteResult {
        eliminated: Option<PlayerId>,
    },
    GameEnded {
        winner: Faction,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum PresenceEvent {
    PlayerConnected { player_id: PlayerId },
    PlayerDisconnected { player_id: PlayerId },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum SettingsEvent {
    Confirmed { role_counts: RoleCounts },
    Rejected { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum TimerEvent {
    Started { seconds: u32 },
    Cleared,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ActionEvent {
    ActionCreated {
        action_id: ActionId,
        kind: ActionKind,
        #[serde(default)]
        payload: Value,
        expires_at: u64,
        timeout_seconds: u32,
    },
    ActionExpired {
        action_id: ActionId,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "channel", rename_all = "lowercase")]
pub enum ClientEnvelope {
    Game(GameRequest),
    Settings(SettingsRequest),
    Action(ActionRequest),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum GameRequest {
    Chat { message: String },
    Vote { target: Option<PlayerId> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum SettingsRequest {
    Update { role_counts: RoleCounts },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ActionRequest {
    ActionResponse { action_id: ActionId, response: Value },
}
