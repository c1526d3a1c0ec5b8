pub mod envelope;
pub mod game;

pub use envelope::{
    ActionEvent, ActionRequest, ClientEnvelope, GameEvent, GameRequest, PresenceEvent,
    ServerEnvelope, SettingsEvent, SettingsRequest, TimerEvent,
};
pub use game::{
    default_role_counts, ActionId, ActionKind, Faction, GameId, GamePhase, GameSnapshot,
    GameStatus, Player, PlayerId, RoleCounts, RoleKind, VoteResult,
};
