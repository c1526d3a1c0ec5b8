use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};

use shared::{
    ActionId, ActionRequest, ClientEnvelope, Faction, GameId, GameRequest, GameSnapshot,
    PlayerId, RoleCounts, RoleKind, SettingsRequest,
};

use crate::actions::{ActionTracker, ClockGuard, PendingAction};
use crate::config::ClientConfig;
use crate::connection::{Connection, ConnectionStatus, FrameEvent, SendResult};
use crate::dispatch::{decode_frame, dispatch};
use crate::session::{dial_url, Identity};
use crate::settings::SettingsSync;
use crate::store::{ChatEntry, GameStore, PhaseTimer, VoteState};

/// Requests from the owning application to the engine task.
#[derive(Debug)]
pub enum Command {
    Connect,
    Close { code: u16, reason: String },
    Chat { message: String },
    Vote { target: Option<PlayerId> },
    UpdateRoleCount { role: RoleKind, delta: i64 },
    RespondAction { action_id: ActionId, response: Value },
    CancelAction { action_id: ActionId },
    ClearActions,
    Shutdown,
}

/// State changes pushed back to the owning application.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Status {
        status: ConnectionStatus,
        attempts: u32,
        error: Option<String>,
    },
    Snapshot(GameSnapshot),
    Chat(ChatEntry),
    VoteChanged(VoteState),
    TimerChanged(Option<PhaseTimer>),
    NightCall(Option<RoleKind>),
    ActionCreated(PendingAction),
    ActionUpdated(PendingAction),
    ActionsCleared,
    Notice(String),
    NoticeCleared,
    SettingsRolledBack(RoleCounts),
    GameEnded(Faction),
}

/// Cloneable handle for driving the engine from other tasks. Holding one
/// also keeps the shared countdown clock running.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    commands: mpsc::UnboundedSender<Command>,
    #[allow(dead_code)]
    clock: ClockGuard,
}

impl EngineHandle {
    pub fn connect(&self) {
        self.command(Command::Connect);
    }

    pub fn close(&self, code: u16, reason: impl Into<String>) {
        self.command(Command::Close {
            code,
            reason: reason.into(),
        });
    }

    pub fn send_chat(&self, message: impl Into<String>) {
        self.command(Command::Chat {
            message: message.into(),
        });
    }

    pub fn cast_vote(&self, target: Option<PlayerId>) {
        self.command(Command::Vote { target });
    }

    pub fn update_role_count(&self, role: RoleKind, delta: i64) {
        self.command(Command::UpdateRoleCount { role, delta });
    }

    pub fn respond(&self, action_id: ActionId, response: Value) {
        self.command(Command::RespondAction {
            action_id,
            response,
        });
    }

    pub fn cancel_action(&self, action_id: ActionId) {
        self.command(Command::CancelAction { action_id });
    }

    pub fn clear_actions(&self) {
        self.command(Command::ClearActions);
    }

    pub fn shutdown(&self) {
        self.command(Command::Shutdown);
    }

    fn command(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!("Engine task is gone; dropping command");
        }
    }
}

/// The client engine. One task owns the connection, the stores, and every
/// timer, so all state changes apply in strict arrival order with no locks.
pub struct Engine {
    config: ClientConfig,
    identity: Arc<dyn Identity>,
    session: Option<GameId>,
    connection: Connection,
    store: GameStore,
    settings: SettingsSync,
    actions: ActionTracker,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<EngineEvent>,
}

impl Engine {
    pub fn new(
        config: ClientConfig,
        identity: Arc<dyn Identity>,
        session: Option<GameId>,
    ) -> (Engine, EngineHandle, mpsc::UnboundedReceiver<EngineEvent>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let connection = Connection::new(config.endpoint.clone(), config.reconnect.clone());
        let store = GameStore::new(identity.player_id());
        let settings = SettingsSync::new(config.debounce_window);
        let actions = ActionTracker::new();

        let handle = EngineHandle {
            commands: command_tx,
            clock: actions.clock_handle(),
        };

        let engine = Engine {
            config,
            identity,
            session,
            connection,
            store,
            settings,
            actions,
            commands: command_rx,
            events: event_tx,
        };

        (engine, handle, event_rx)
    }

    /// Runs until shutdown. Commands, inbound frames, and every timer are
    /// multiplexed onto this one task; the deadline branches stay disabled
    /// while nothing is armed.
    pub async fn run(mut self) {
        let mut ticker = time::interval(self.config.tick_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await;

        loop {
            let transport_alive = self.connection.transport_alive();
            let clock_running = self.actions.clock_running();
            let reconnect_at = self.connection.reconnect_at();
            let flush_at = self.settings.flush_deadline();
            let notice_at = self.store.notice_deadline();

            tokio::select! {
                command = self.commands.recv() => {
                    match command {
                        Some(Command::Shutdown) | None => break,
                        Some(command) => self.handle_command(command).await,
                    }
                }
                frame = self.connection.next_frame(), if transport_alive => {
                    self.handle_frame(frame);
                }
                _ = time::sleep_until(arm(reconnect_at)), if reconnect_at.is_some() => {
                    self.dial(true).await;
                }
                _ = time::sleep_until(arm(flush_at)), if flush_at.is_some() => {
                    self.flush_settings().await;
                }
                _ = time::sleep_until(arm(notice_at)), if notice_at.is_some() => {
                    self.expire_notice();
                }
                _ = ticker.tick(), if clock_running => {
                    self.tick();
                }
            }
        }

        debug!("Engine loop ended; closing transport");
        self.connection.close(1000, "client shutting down").await;
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect => self.dial(false).await,
            Command::Close { code, reason } => {
                self.connection.close(code, &reason).await;
                self.emit_status();
            }
            Command::Chat { message } => {
                self.send(ClientEnvelope::Game(GameRequest::Chat { message }))
                    .await;
            }
            Command::Vote { target } => {
                // The tally waits for the server echo rather than guessing.
                self.send(ClientEnvelope::Game(GameRequest::Vote { target }))
                    .await;
            }
            Command::UpdateRoleCount { role, delta } => {
                if !self.store.is_host() {
                    warn!("Ignoring settings edit: not the host");
                    return;
                }
                let visible = self.settings.update_count(role, delta, Instant::now());
                self.store.set_role_counts(visible);
                if let Some(snapshot) = self.store.snapshot() {
                    let event = EngineEvent::Snapshot(snapshot.clone());
                    self.emit(event);
                }
            }
            Command::RespondAction {
                action_id,
                response,
            } => {
                if !self.actions.complete(&action_id, response.clone()) {
                    return;
                }
                if let Some(action) = self.actions.get(&action_id) {
                    let event = EngineEvent::ActionUpdated(action.clone());
                    self.emit(event);
                }
                self.send(ClientEnvelope::Action(ActionRequest::ActionResponse {
                    action_id,
                    response,
                }))
                .await;
            }
            Command::CancelAction { action_id } => {
                if !self.actions.cancel(&action_id) {
                    return;
                }
                if let Some(action) = self.actions.get(&action_id) {
                    let event = EngineEvent::ActionUpdated(action.clone());
                    self.emit(event);
                }
            }
            Command::ClearActions => {
                self.actions.clear_all();
                self.emit(EngineEvent::ActionsCleared);
            }
            // Handled by the run loop before dispatching here.
            Command::Shutdown => {}
        }
    }

    fn handle_frame(&mut self, frame: FrameEvent) {
        match frame {
            FrameEvent::Frame(raw) => {
                let events = dispatch(
                    decode_frame(raw),
                    Instant::now(),
                    self.config.notice_duration,
                    &mut self.store,
                    &mut self.settings,
                    &mut self.actions,
                );
                for event in events {
                    self.emit(event);
                }
            }
            FrameEvent::Closed(reason) => {
                if let Some(reason) = reason {
                    info!("Server closed the connection: {}", reason);
                }
                self.connection.mark_closed(None, Instant::now());
                self.emit_status();
            }
            FrameEvent::Failed(message) => {
                self.connection.mark_closed(Some(message), Instant::now());
                self.emit_status();
            }
        }
    }

    /// Dials the endpoint with a freshly fetched token. `retry` marks a
    /// scheduled reconnect, which counts against the attempt cap.
    async fn dial(&mut self, retry: bool) {
        if self.connection.status().is_open() && !retry {
            debug!("Already connected");
            return;
        }

        self.connection.mark_connecting();
        self.emit_status();

        let token = match self.identity.access_token().await {
            Ok(token) => token,
            Err(e) => {
                warn!("Token renewal failed: {}", e);
                self.connection
                    .mark_closed(Some(e.to_string()), Instant::now());
                self.emit_status();
                return;
            }
        };

        let dial = dial_url(&self.config.endpoint, &token, self.session.as_ref());
        let result = if retry {
            self.connection.reconnect(&dial).await
        } else {
            self.connection.connect(&dial).await
        };

        match result {
            Ok(()) => {
                self.settings.rearm_after_reconnect(Instant::now());
            }
            Err(_) => {
                self.connection.schedule_reconnect(Instant::now());
            }
        }
        self.emit_status();
    }

    /// Debounce deadline fired: send the coalesced settings edit.
    async fn flush_settings(&mut self) {
        let role_counts = match self.settings.take_flush() {
            Some(counts) => counts,
            None => return,
        };

        let envelope = ClientEnvelope::Settings(SettingsRequest::Update { role_counts });
        match self.connection.send(&envelope).await {
            SendResult::Sent => {}
            SendResult::Dropped => {
                debug!("Settings flush deferred until the connection reopens");
                self.settings.flush_dropped();
            }
            SendResult::Rejected(message) => {
                warn!("Settings flush not serializable: {}", message);
                self.settings.flush_dropped();
                self.raise_notice(message);
            }
            SendResult::TransportFailed(message) => {
                self.settings.flush_dropped();
                self.connection.mark_closed(Some(message), Instant::now());
                self.emit_status();
            }
        }
    }

    fn expire_notice(&mut self) {
        self.store.clear_notice();
        self.settings.settle_rejection();
        self.emit(EngineEvent::NoticeCleared);
    }

    /// One shared clock tick: action countdowns first, then the phase timer.
    fn tick(&mut self) {
        for id in self.actions.tick() {
            if let Some(action) = self.actions.get(&id) {
                let event = EngineEvent::ActionUpdated(action.clone());
                self.emit(event);
            }
        }

        if self.store.tick_timer() {
            self.emit(EngineEvent::TimerChanged(self.store.timer()));
        }
    }

    async fn send(&mut self, envelope: ClientEnvelope) {
        match self.connection.send(&envelope).await {
            SendResult::Sent | SendResult::Dropped => {}
            SendResult::Rejected(message) => self.raise_notice(message),
            SendResult::TransportFailed(message) => {
                self.connection.mark_closed(Some(message), Instant::now());
                self.emit_status();
            }
        }
    }

    /// Surfaces a message to the user for the configured duration.
    fn raise_notice(&mut self, message: String) {
        let deadline = Instant::now() + self.config.notice_duration;
        self.store.raise_notice(message.clone(), deadline);
        self.emit(EngineEvent::Notice(message));
    }

    fn emit(&self, event: EngineEvent) {
        let _ = self.events.send(event);
    }

    fn emit_status(&self) {
        self.emit(EngineEvent::Status {
            status: self.connection.status(),
            attempts: self.connection.attempts(),
            error: self.connection.last_error().map(str::to_string),
        });
    }
}

fn arm(deadline: Option<Instant>) -> Instant {
    // The branch is disabled when None; the placeholder is never polled.
    deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(86_400))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::ActionStatus;
    use crate::settings::SyncPhase;
    use crate::session::StaticToken;
    use serde_json::json;
    use shared::{
        default_role_counts, ActionKind, GamePhase, GameStatus, Player,
    };
    use tokio_test::block_on;
    use url::Url;

    fn new_engine() -> (
        Engine,
        EngineHandle,
        mpsc::UnboundedReceiver<EngineEvent>,
    ) {
        let config = ClientConfig::new(Url::parse("ws://127.0.0.1:1/ws").unwrap());
        let identity = Arc::new(StaticToken::new(PlayerId::new("p1"), "tok"));
        Engine::new(config, identity, None)
    }

    fn lobby_snapshot() -> GameSnapshot {
        GameSnapshot {
            id: GameId::new("g1"),
            status: GameStatus::Waiting,
            phase: GamePhase::Start,
            day: 0,
            players: vec![
                Player::new(PlayerId::new("p1"), "alice"),
                Player::new(PlayerId::new("p2"), "bob"),
            ],
            host: PlayerId::new("p1"),
            role_counts: default_role_counts(),
        }
    }

    #[test]
    fn test_handle_keeps_clock_alive() {
        let (engine, handle, _events) = new_engine();
        assert!(engine.actions.clock_running());

        let second = handle.clone();
        drop(handle);
        assert!(engine.actions.clock_running());

        drop(second);
        assert!(!engine.actions.clock_running());
    }

    #[test]
    fn test_settings_edit_requires_host() {
        let (mut engine, _handle, mut events) = new_engine();

        block_on(engine.handle_command(Command::UpdateRoleCount {
            role: RoleKind::Werewolf,
            delta: 1,
        }));
        assert!(!engine.settings.has_pending());
        assert!(events.try_recv().is_err());

        engine.store.apply_snapshot(lobby_snapshot());
        engine.settings.seed(default_role_counts());
        block_on(engine.handle_command(Command::UpdateRoleCount {
            role: RoleKind::Werewolf,
            delta: 1,
        }));

        assert!(engine.settings.has_pending());
        assert!(engine.settings.flush_deadline().is_some());
        match events.try_recv() {
            Ok(EngineEvent::Snapshot(snapshot)) => {
                assert_eq!(snapshot.role_counts.get(&RoleKind::Werewolf), Some(&3));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_vote_command_waits_for_server_echo() {
        let (mut engine, _handle, _events) = new_engine();

        block_on(engine.handle_command(Command::Vote {
            target: Some(PlayerId::new("p2")),
        }));

        assert_eq!(engine.store.vote().my_vote, None);
    }

    #[test]
    fn test_respond_action_completes_once() {
        let (mut engine, _handle, mut events) = new_engine();
        engine
            .actions
            .create(ActionId::new("a1"), ActionKind::Vote, json!({}), 0, 30);

        block_on(engine.handle_command(Command::RespondAction {
            action_id: ActionId::new("a1"),
            response: json!({"target": "p2"}),
        }));
        assert_eq!(
            engine.actions.get(&ActionId::new("a1")).unwrap().status,
            ActionStatus::Completed
        );
        assert!(matches!(
            events.try_recv(),
            Ok(EngineEvent::ActionUpdated(_))
        ));

        block_on(engine.handle_command(Command::RespondAction {
            action_id: ActionId::new("a1"),
            response: json!({"target": "p1"}),
        }));
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_cancel_then_clear_actions() {
        let (mut engine, _handle, mut events) = new_engine();
        engine
            .actions
            .create(ActionId::new("a1"), ActionKind::NightAction, json!({}), 0, 30);

        block_on(engine.handle_command(Command::CancelAction {
            action_id: ActionId::new("a1"),
        }));
        assert_eq!(
            engine.actions.get(&ActionId::new("a1")).unwrap().status,
            ActionStatus::Cancelled
        );
        assert!(matches!(
            events.try_recv(),
            Ok(EngineEvent::ActionUpdated(_))
        ));

        block_on(engine.handle_command(Command::ClearActions));
        assert!(engine.actions.is_empty());
        assert!(matches!(events.try_recv(), Ok(EngineEvent::ActionsCleared)));
    }

    #[test]
    fn test_tick_drives_actions_and_phase_timer() {
        let (mut engine, _handle, mut events) = new_engine();
        engine
            .actions
            .create(ActionId::new("a1"), ActionKind::Vote, json!({}), 0, 2);
        engine.store.timer_started(3);

        engine.tick();
        match events.try_recv() {
            Ok(EngineEvent::ActionUpdated(action)) => {
                assert_eq!(action.remaining_seconds, 1)
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(matches!(
            events.try_recv(),
            Ok(EngineEvent::TimerChanged(Some(PhaseTimer { remaining: 2 })))
        ));

        engine.tick();
        assert_eq!(
            engine.actions.get(&ActionId::new("a1")).unwrap().status,
            ActionStatus::Expired
        );
    }

    #[test]
    fn test_expire_notice_settles_rejection() {
        let (mut engine, _handle, mut events) = new_engine();
        engine.settings.reject();
        engine
            .store
            .raise_notice("no".to_string(), Instant::now() + Duration::from_secs(5));

        engine.expire_notice();

        assert_eq!(engine.store.notice(), None);
        assert_eq!(engine.settings.phase(), SyncPhase::Clean);
        assert!(matches!(events.try_recv(), Ok(EngineEvent::NoticeCleared)));
    }

    #[test]
    fn test_flush_while_disconnected_keeps_edit() {
        let (mut engine, _handle, _events) = new_engine();
        engine.store.apply_snapshot(lobby_snapshot());
        engine.settings.seed(default_role_counts());
        block_on(engine.handle_command(Command::UpdateRoleCount {
            role: RoleKind::Seer,
            delta: 1,
        }));

        block_on(engine.flush_settings());

        assert_eq!(engine.settings.phase(), SyncPhase::DirtyPending);
        assert!(engine.settings.has_pending());
        assert!(engine.settings.flush_deadline().is_none());
    }
}
