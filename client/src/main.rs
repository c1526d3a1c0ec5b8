use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use log::{info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use url::Url;

use client::actions::ActionStatus;
use client::config::ClientConfig;
use client::connection::ReconnectPolicy;
use client::engine::{Engine, EngineEvent, EngineHandle};
use client::session::{LocalSession, SessionService, StaticToken};
use shared::{ActionId, GameId, PlayerId, RoleKind};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// WebSocket endpoint of the game server
    #[arg(short = 's', long, default_value = "ws://127.0.0.1:9001/ws")]
    server: String,

    /// Bearer token presented when dialing
    #[arg(short = 't', long, default_value = "dev-token")]
    token: String,

    /// Player identifier
    #[arg(short = 'i', long, default_value = "p1")]
    id: String,

    /// Display name used when creating a session
    #[arg(short = 'n', long, default_value = "player")]
    name: String,

    /// Create a new session instead of joining one
    #[arg(long)]
    create_session: bool,

    /// Session to join
    #[arg(long)]
    session: Option<String>,

    /// Delay between reconnect attempts in milliseconds
    #[arg(long, default_value = "3000")]
    reconnect_delay_ms: u64,

    /// Reconnect attempts before giving up
    #[arg(long, default_value = "10")]
    max_reconnects: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let endpoint = Url::parse(&args.server)?;
    let mut config = ClientConfig::new(endpoint);
    config.reconnect = ReconnectPolicy {
        enabled: true,
        delay: Duration::from_millis(args.reconnect_delay_ms),
        max_attempts: args.max_reconnects,
    };

    let session = if args.create_session {
        let service = LocalSession;
        Some(service.create_session(&args.name).await?)
    } else {
        args.session.map(GameId::new)
    };

    let identity = Arc::new(StaticToken::new(PlayerId::new(args.id), args.token));
    let (engine, handle, mut events) = Engine::new(config, identity, session);

    info!("Starting client...");
    info!("Connecting to: {}", args.server);
    info!("Commands: /vote <player|skip>, /count <role> <+|->, /act <action> <target>, /quit");

    let engine_task = tokio::spawn(engine.run());
    handle.connect();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Some(event) => print_event(event),
                    None => break,
                }
            }
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        if !handle_line(&handle, line.trim()) {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!("Failed to read stdin: {}", e);
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                break;
            }
        }
    }

    handle.shutdown();
    let _ = engine_task.await;

    Ok(())
}

/// Turns one line of input into a command. Returns false when it is time
/// to quit.
fn handle_line(handle: &EngineHandle, line: &str) -> bool {
    if line.is_empty() {
        return true;
    }

    let rest = match line.strip_prefix('/') {
        Some(rest) => rest,
        None => {
            handle.send_chat(line);
            return true;
        }
    };

    let mut parts = rest.split_whitespace();
    match parts.next() {
        Some("quit") => return false,
        Some("vote") => match parts.next() {
            Some("skip") => handle.cast_vote(None),
            Some(target) => handle.cast_vote(Some(PlayerId::new(target))),
            None => println!("usage: /vote <player|skip>"),
        },
        Some("count") => {
            let role = parts.next().and_then(RoleKind::parse);
            let delta = match parts.next() {
                Some("+") => Some(1),
                Some("-") => Some(-1),
                _ => None,
            };
            match (role, delta) {
                (Some(role), Some(delta)) => handle.update_role_count(role, delta),
                _ => println!("usage: /count <role> <+|->"),
            }
        }
        Some("act") => match (parts.next(), parts.next()) {
            (Some(action), Some(target)) => handle.respond(
                ActionId::new(action),
                serde_json::json!({ "target": target }),
            ),
            _ => println!("usage: /act <action> <target>"),
        },
        Some(other) => println!("unknown command: /{}", other),
        None => {}
    }

    true
}

fn print_event(event: EngineEvent) {
    match event {
        EngineEvent::Status {
            status,
            attempts,
            error,
        } => match error {
            Some(error) => println!("[{}] attempts={} ({})", status, attempts, error),
            None => println!("[{}] attempts={}", status, attempts),
        },
        EngineEvent::Snapshot(snapshot) => {
            let living = snapshot.players.iter().filter(|p| p.alive).count();
            println!(
                "game {} [{:?}/{:?} day {}] {} players ({} alive), host {}",
                snapshot.id,
                snapshot.status,
                snapshot.phase,
                snapshot.day,
                snapshot.players.len(),
                living,
                snapshot.host
            );
        }
        EngineEvent::Chat(entry) => println!("<{}> {}", entry.sender_name, entry.message),
        EngineEvent::VoteChanged(vote) => {
            if vote.active {
                println!("vote open ({} cast)", vote.votes.len());
            } else if let Some(result) = vote.result {
                match result.eliminated {
                    Some(who) => println!("vote closed: {} is eliminated", who),
                    None => println!("vote closed: nobody is eliminated"),
                }
            }
        }
        EngineEvent::TimerChanged(Some(timer)) => {
            if timer.remaining % 10 == 0 || timer.remaining <= 5 {
                println!("{}s left in phase", timer.remaining);
            }
        }
        EngineEvent::TimerChanged(None) => {}
        EngineEvent::NightCall(Some(role)) => println!("night call: {}", role),
        EngineEvent::NightCall(None) => {}
        EngineEvent::ActionCreated(action) => println!(
            "action {} ({:?}): respond within {}s",
            action.id, action.kind, action.timeout_seconds
        ),
        EngineEvent::ActionUpdated(action) => match action.status {
            ActionStatus::Pending => {}
            status => println!("action {} is now {:?}", action.id, status),
        },
        EngineEvent::ActionsCleared => println!("actions cleared"),
        EngineEvent::Notice(message) => println!("! {}", message),
        EngineEvent::NoticeCleared => {}
        EngineEvent::SettingsRolledBack(counts) => {
            let summary: Vec<String> = counts
                .iter()
                .map(|(role, n)| format!("{} {}", role, n))
                .collect();
            println!("settings reverted: {}", summary.join(", "));
        }
        EngineEvent::GameEnded(winner) => println!("game over: {} win", winner),
    }
}
