use std::time::Duration;

use log::{info, warn};
use serde_json::Value;
use tokio::time::Instant;

use shared::{
    ActionEvent, GameEvent, PresenceEvent, ServerEnvelope, SettingsEvent, TimerEvent,
};

use crate::actions::ActionTracker;
use crate::engine::EngineEvent;
use crate::settings::SettingsSync;
use crate::store::{ChatEntry, GameStore};

/// What one transport frame decoded to.
#[derive(Debug)]
pub enum Inbound {
    /// A JSON object, candidate for envelope routing.
    Json(Value),
    /// Anything else. Kept verbatim for the out-of-band notice path.
    Text(String),
}

/// First decode stage. Only a JSON object can be an envelope; every other
/// frame falls back to plain text.
pub fn decode_frame(raw: String) -> Inbound {
    match serde_json::from_str::<Value>(&raw) {
        Ok(value) if value.is_object() => Inbound::Json(value),
        _ => Inbound::Text(raw),
    }
}

/// Routes one decoded frame into the stores. Runs synchronously on the
/// engine task so every envelope lands in exactly one handler, in arrival
/// order. Returns the events the routing produced.
pub fn dispatch(
    inbound: Inbound,
    now: Instant,
    notice_for: Duration,
    store: &mut GameStore,
    settings: &mut SettingsSync,
    actions: &mut ActionTracker,
) -> Vec<EngineEvent> {
    let value = match inbound {
        Inbound::Text(text) => {
            warn!("Non-envelope frame from server: {}", text);
            store.raise_notice(text.clone(), now + notice_for);
            return vec![EngineEvent::Notice(text)];
        }
        Inbound::Json(value) => value,
    };

    if value.get("type").is_none() {
        warn!("Envelope missing type field; dropping");
        return Vec::new();
    }

    match serde_json::from_value::<ServerEnvelope>(value) {
        Ok(envelope) => route(envelope, now, notice_for, store, settings, actions),
        Err(e) => {
            // Unknown channel or type from a newer server; skip it.
            info!("Dropping unroutable envelope: {}", e);
            Vec::new()
        }
    }
}

fn route(
    envelope: ServerEnvelope,
    now: Instant,
    notice_for: Duration,
    store: &mut GameStore,
    settings: &mut SettingsSync,
    actions: &mut ActionTracker,
) -> Vec<EngineEvent> {
    match envelope {
        ServerEnvelope::Game(event) => route_game(event, store, settings),
        ServerEnvelope::Presence(event) => route_presence(event, store),
        ServerEnvelope::Settings(event) => {
            route_settings(event, now, notice_for, store, settings)
        }
        ServerEnvelope::Timer(event) => route_timer(event, store),
        ServerEnvelope::Action(event) => route_action(event, actions),
    }
}

fn route_game(
    event: GameEvent,
    store: &mut GameStore,
    settings: &mut SettingsSync,
) -> Vec<EngineEvent> {
    match event {
        GameEvent::Snapshot(mut snapshot) => {
            settings.seed(snapshot.role_counts.clone());
            // Local uncommitted edits stay on top of whatever the server sent.
            snapshot.role_counts = settings.visible().clone();
            let event = EngineEvent::Snapshot(snapshot.clone());
            store.apply_snapshot(snapshot);
            vec![event]
        }
        GameEvent::HostChanged { host_id } => {
            info!("Host is now {}", host_id);
            store.set_host(host_id);
            snapshot_event(store)
        }
        GameEvent::RoleRevealed { player_id, role } => {
            store.reveal_role(&player_id, role);
            snapshot_event(store)
        }
        GameEvent::NightCall { role } => {
            store.set_night_call(Some(role));
            vec![EngineEvent::NightCall(Some(role))]
        }
        GameEvent::NightClear => {
            store.set_night_call(None);
            vec![EngineEvent::NightCall(None)]
        }
        GameEvent::Chat {
            sender_id,
            sender_name,
            message,
        } => {
            let entry = ChatEntry {
                sender_id,
                sender_name,
                message,
            };
            store.push_chat(entry.clone());
            vec![EngineEvent::Chat(entry)]
        }
        GameEvent::VoteStarted => {
            store.vote_started();
            vec![EngineEvent::VoteChanged(store.vote().clone())]
        }
        GameEvent::VoteCast { voter_id, target } => {
            store.vote_cast(voter_id, target);
            vec![EngineEvent::VoteChanged(store.vote().clone())]
        }
        GameEvent::VoteResult { eliminated } => {
            store.vote_result(eliminated);
            vec![EngineEvent::VoteChanged(store.vote().clone())]
        }
        GameEvent::GameEnded { winner } => {
            info!("Game over: {} win", winner);
            store.set_win(winner);
            vec![EngineEvent::GameEnded(winner)]
        }
    }
}

fn route_presence(event: PresenceEvent, store: &mut GameStore) -> Vec<EngineEvent> {
    match event {
        PresenceEvent::PlayerConnected { player_id } => {
            store.set_presence(&player_id, true);
        }
        PresenceEvent::PlayerDisconnected { player_id } => {
            store.set_presence(&player_id, false);
        }
    }
    snapshot_event(store)
}

fn route_settings(
    event: SettingsEvent,
    now: Instant,
    notice_for: Duration,
    store: &mut GameStore,
    settings: &mut SettingsSync,
) -> Vec<EngineEvent> {
    match event {
        SettingsEvent::Confirmed { role_counts } => {
            settings.confirm(role_counts);
            store.set_role_counts(settings.visible().clone());
            snapshot_event(store)
        }
        SettingsEvent::Rejected { reason } => {
            let restored = settings.reject();
            store.set_role_counts(restored.clone());
            store.raise_notice(reason.clone(), now + notice_for);
            vec![
                EngineEvent::SettingsRolledBack(restored),
                EngineEvent::Notice(reason),
            ]
        }
    }
}

fn route_timer(event: TimerEvent, store: &mut GameStore) -> Vec<EngineEvent> {
    match event {
        TimerEvent::Started { seconds } => store.timer_started(seconds),
        TimerEvent::Cleared => store.timer_cleared(),
    }
    vec![EngineEvent::TimerChanged(store.timer())]
}

fn route_action(event: ActionEvent, actions: &mut ActionTracker) -> Vec<EngineEvent> {
    match event {
        ActionEvent::ActionCreated {
            action_id,
            kind,
            payload,
            expires_at,
            timeout_seconds,
        } => {
            actions.create(action_id.clone(), kind, payload, expires_at, timeout_seconds);
            match actions.get(&action_id) {
                Some(action) => vec![EngineEvent::ActionCreated(action.clone())],
                None => Vec::new(),
            }
        }
        ActionEvent::ActionExpired { action_id } => {
            if !actions.expire(&action_id) {
                // Already expired locally (or unknown); nothing changed.
                return Vec::new();
            }
            match actions.get(&action_id) {
                Some(action) => vec![EngineEvent::ActionUpdated(action.clone())],
                None => Vec::new(),
            }
        }
    }
}

fn snapshot_event(store: &GameStore) -> Vec<EngineEvent> {
    match store.snapshot() {
        Some(snapshot) => vec![EngineEvent::Snapshot(snapshot.clone())],
        None => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::ActionStatus;
    use serde_json::json;
    use shared::{default_role_counts, PlayerId, RoleKind};

    struct Fixture {
        store: GameStore,
        settings: SettingsSync,
        actions: ActionTracker,
    }

    impl Fixture {
        fn new() -> Self {
            Fixture {
                store: GameStore::new(PlayerId::new("p1")),
                settings: SettingsSync::new(Duration::from_millis(300)),
                actions: ActionTracker::new(),
            }
        }

        fn dispatch(&mut self, raw: String) -> Vec<EngineEvent> {
            dispatch(
                decode_frame(raw),
                Instant::now(),
                Duration::from_secs(5),
                &mut self.store,
                &mut self.settings,
                &mut self.actions,
            )
        }
    }

    fn snapshot_json() -> Value {
        json!({
            "channel": "game",
            "type": "snapshot",
            "data": {
                "id": "g1",
                "status": "active",
                "phase": "day",
                "day": 1,
                "players": [
                    {"id": "p1", "name": "alice", "alive": true},
                    {"id": "p2", "name": "bob", "alive": true}
                ],
                "host": "p1",
                "role_counts": {"villager": 4, "werewolf": 2, "seer": 1, "witch": 1}
            }
        })
    }

    #[test]
    fn test_plain_text_frame_becomes_notice() {
        let mut fx = Fixture::new();

        let events = fx.dispatch("rate limit exceeded".to_string());

        assert_eq!(
            events,
            vec![EngineEvent::Notice("rate limit exceeded".to_string())]
        );
        assert_eq!(fx.store.notice(), Some("rate limit exceeded"));
    }

    #[test]
    fn test_json_scalar_falls_back_to_text() {
        let mut fx = Fixture::new();

        let events = fx.dispatch("42".to_string());

        assert_eq!(events, vec![EngineEvent::Notice("42".to_string())]);
    }

    #[test]
    fn test_missing_type_is_dropped() {
        let mut fx = Fixture::new();

        let raw = json!({"channel": "game", "data": {}}).to_string();
        let events = fx.dispatch(raw);

        assert!(events.is_empty());
        assert_eq!(fx.store.notice(), None);
    }

    #[test]
    fn test_unknown_type_is_dropped() {
        let mut fx = Fixture::new();

        let raw = json!({"channel": "game", "type": "time_travel", "data": {}}).to_string();
        let events = fx.dispatch(raw);

        assert!(events.is_empty());
    }

    #[test]
    fn test_unknown_channel_is_dropped() {
        let mut fx = Fixture::new();

        let raw = json!({"channel": "lobby", "type": "snapshot", "data": {}}).to_string();
        let events = fx.dispatch(raw);

        assert!(events.is_empty());
    }

    #[test]
    fn test_snapshot_routes_to_store_and_seeds_settings() {
        let mut fx = Fixture::new();

        let events = fx.dispatch(snapshot_json().to_string());

        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], EngineEvent::Snapshot(_)));
        assert_eq!(fx.store.snapshot().unwrap().players.len(), 2);
        assert_eq!(fx.settings.confirmed(), &default_role_counts());
    }

    #[test]
    fn test_snapshot_keeps_uncommitted_counts_visible() {
        let mut fx = Fixture::new();
        fx.dispatch(snapshot_json().to_string());
        fx.settings
            .update_count(RoleKind::Werewolf, 1, Instant::now());

        fx.dispatch(snapshot_json().to_string());

        let visible = fx.store.snapshot().unwrap().role_counts.clone();
        assert_eq!(visible.get(&RoleKind::Werewolf), Some(&3));
        assert_eq!(
            fx.settings.confirmed().get(&RoleKind::Werewolf),
            Some(&2)
        );
    }

    #[test]
    fn test_host_change_patches_and_reemits_snapshot() {
        let mut fx = Fixture::new();
        fx.dispatch(snapshot_json().to_string());

        let raw = json!({
            "channel": "game",
            "type": "host_changed",
            "data": {"host_id": "p2"}
        })
        .to_string();
        let events = fx.dispatch(raw);

        assert_eq!(events.len(), 1);
        assert!(!fx.store.is_host());
    }

    #[test]
    fn test_chat_appends_and_emits() {
        let mut fx = Fixture::new();

        let raw = json!({
            "channel": "game",
            "type": "chat",
            "data": {"sender_id": "p2", "sender_name": "bob", "message": "hi"}
        })
        .to_string();
        let events = fx.dispatch(raw);

        assert_eq!(fx.store.chat().len(), 1);
        match &events[0] {
            EngineEvent::Chat(entry) => assert_eq!(entry.message, "hi"),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_vote_envelopes_update_tally() {
        let mut fx = Fixture::new();
        fx.dispatch(snapshot_json().to_string());

        fx.dispatch(json!({"channel": "game", "type": "vote_started"}).to_string());
        assert!(fx.store.vote().active);

        fx.dispatch(
            json!({
                "channel": "game",
                "type": "vote_cast",
                "data": {"voter_id": "p1", "target": "p2"}
            })
            .to_string(),
        );
        assert_eq!(
            fx.store.vote().my_vote,
            Some(Some(PlayerId::new("p2")))
        );

        let events = fx.dispatch(
            json!({
                "channel": "game",
                "type": "vote_result",
                "data": {"eliminated": "p2"}
            })
            .to_string(),
        );
        assert!(!fx.store.vote().active);
        assert!(matches!(events[0], EngineEvent::VoteChanged(_)));
    }

    #[test]
    fn test_settings_rejection_rolls_back_and_raises_notice() {
        let mut fx = Fixture::new();
        fx.dispatch(snapshot_json().to_string());
        fx.settings
            .update_count(RoleKind::Werewolf, 1, Instant::now());

        let raw = json!({
            "channel": "settings",
            "type": "rejected",
            "data": {"reason": "too many werewolves"}
        })
        .to_string();
        let events = fx.dispatch(raw);

        assert_eq!(
            events,
            vec![
                EngineEvent::SettingsRolledBack(default_role_counts()),
                EngineEvent::Notice("too many werewolves".to_string()),
            ]
        );
        assert!(!fx.settings.has_pending());
        assert_eq!(
            fx.store.snapshot().unwrap().role_counts,
            default_role_counts()
        );
        assert_eq!(fx.store.notice(), Some("too many werewolves"));
    }

    #[test]
    fn test_settings_confirmation_advances_baseline() {
        let mut fx = Fixture::new();
        fx.dispatch(snapshot_json().to_string());

        let raw = json!({
            "channel": "settings",
            "type": "confirmed",
            "data": {"role_counts": {"villager": 5, "werewolf": 2, "seer": 1, "witch": 1}}
        })
        .to_string();
        fx.dispatch(raw);

        assert_eq!(fx.settings.confirmed().get(&RoleKind::Villager), Some(&5));
        assert_eq!(
            fx.store.snapshot().unwrap().role_counts.get(&RoleKind::Villager),
            Some(&5)
        );
    }

    #[test]
    fn test_timer_envelopes() {
        let mut fx = Fixture::new();

        fx.dispatch(
            json!({"channel": "timer", "type": "started", "data": {"seconds": 30}}).to_string(),
        );
        assert_eq!(fx.store.timer().map(|t| t.remaining), Some(30));

        let events =
            fx.dispatch(json!({"channel": "timer", "type": "cleared"}).to_string());
        assert_eq!(events, vec![EngineEvent::TimerChanged(None)]);
    }

    #[test]
    fn test_night_call_and_clear() {
        let mut fx = Fixture::new();

        fx.dispatch(
            json!({"channel": "game", "type": "night_call", "data": {"role": "seer"}})
                .to_string(),
        );
        assert_eq!(fx.store.night_call(), Some(RoleKind::Seer));

        let events =
            fx.dispatch(json!({"channel": "game", "type": "night_clear"}).to_string());
        assert_eq!(events, vec![EngineEvent::NightCall(None)]);
        assert_eq!(fx.store.night_call(), None);
    }

    #[test]
    fn test_action_created_then_duplicate_expiry() {
        let mut fx = Fixture::new();

        let created = fx.dispatch(
            json!({
                "channel": "action",
                "type": "action_created",
                "data": {
                    "action_id": "a1",
                    "kind": "night_action",
                    "payload": {"targets": ["p2"]},
                    "expires_at": 1700000000,
                    "timeout_seconds": 10
                }
            })
            .to_string(),
        );
        assert_eq!(created.len(), 1);
        assert_eq!(fx.actions.len(), 1);

        let expire = json!({
            "channel": "action",
            "type": "action_expired",
            "data": {"action_id": "a1"}
        })
        .to_string();

        let first = fx.dispatch(expire.clone());
        assert_eq!(first.len(), 1);
        match &first[0] {
            EngineEvent::ActionUpdated(action) => {
                assert_eq!(action.status, ActionStatus::Expired)
            }
            other => panic!("unexpected event {:?}", other),
        }

        let second = fx.dispatch(expire);
        assert!(second.is_empty());
    }

    #[test]
    fn test_presence_patch_reemits_snapshot() {
        let mut fx = Fixture::new();
        fx.dispatch(snapshot_json().to_string());

        let events = fx.dispatch(
            json!({
                "channel": "presence",
                "type": "player_disconnected",
                "data": {"player_id": "p2"}
            })
            .to_string(),
        );

        assert_eq!(events.len(), 1);
        assert!(!fx
            .store
            .snapshot()
            .unwrap()
            .player(&PlayerId::new("p2"))
            .unwrap()
            .connected);
    }
}
