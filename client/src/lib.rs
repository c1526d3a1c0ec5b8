//! # Werewolf Client Engine
//!
//! This library provides the complete client-side engine for the werewolf
//! social deduction game. It handles all aspects of client functionality
//! including the real-time connection, envelope routing, local game state,
//! optimistic settings edits, and timed action prompts.
//!
//! ## Architecture Overview
//!
//! The engine is designed around a single cooperative task that owns every
//! piece of mutable state. Commands from the application, frames from the
//! server, and timer deadlines are multiplexed onto that one task, so state
//! changes apply in strict arrival order without locks or reentrancy.
//!
//! ### Optimistic Settings
//! The host's lobby edits show instantly in the local snapshot while a
//! debounce window coalesces bursts into a single request. The server echo
//! is the only thing that advances the confirmed baseline; a rejection rolls
//! the visible state back to it.
//!
//! ### Resilient Connection
//! The connection dials with a freshly fetched bearer token, reconnects a
//! configured number of times after a fixed delay, and treats send on a
//! closed socket as a logged drop rather than a fault. Overlapping reconnect
//! requests coalesce into one pending deadline.
//!
//! ### Shared Countdown Clock
//! Server-issued action prompts count down on one shared one-second tick
//! that runs only while at least one handle holds a clock guard. Countdowns
//! expire locally even if the server's expiry notification never arrives.
//!
//! ## Module Organization
//!
//! ### Engine Module (`engine`)
//! The event loop plus the command and event surface the application uses.
//!
//! ### Connection Module (`connection`)
//! WebSocket lifecycle: dialing, fixed-delay reconnects, close semantics,
//! and send/receive on the live transport.
//!
//! ### Dispatch Module (`dispatch`)
//! Two-level envelope routing from raw frames to store mutations, with
//! fallbacks for plain text and unknown envelope kinds.
//!
//! ### Store Module (`store`)
//! The authoritative game snapshot mirror and its derived views: vote
//! tallies, living players, eligible night-action targets.
//!
//! ### Settings Module (`settings`)
//! The optimistic reconciler for the host's role-count edits.
//!
//! ### Actions Module (`actions`)
//! Timed action prompts and the reference-counted countdown clock.
//!
//! ### Session Module (`session`)
//! Identity and token supply, session creation, and dial URL construction.
//!
//! ## Usage Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use client::config::ClientConfig;
//! use client::engine::{Engine, EngineEvent};
//! use client::session::StaticToken;
//! use shared::PlayerId;
//! use url::Url;
//!
//! #[tokio::main]
//! async fn main() {
//!     let endpoint = Url::parse("ws://127.0.0.1:9001/ws").unwrap();
//!     let identity = Arc::new(StaticToken::new(PlayerId::new("p1"), "token"));
//!     let (engine, handle, mut events) =
//!         Engine::new(ClientConfig::new(endpoint), identity, None);
//!
//!     tokio::spawn(engine.run());
//!     handle.connect();
//!
//!     while let Some(event) = events.recv().await {
//!         if let EngineEvent::Snapshot(snapshot) = event {
//!             println!("game {}: {} players", snapshot.id, snapshot.players.len());
//!         }
//!     }
//! }
//! ```
//!
//! ## Design Philosophy
//!
//! ### Server Authority
//! The server owns the truth. Snapshots replace the mirror wholesale, vote
//! tallies wait for the server echo, and the only local divergence is the
//! host's explicitly optimistic settings edit.
//!
//! ### No Fatal Paths
//! Every failure is contained: malformed frames become notices, unroutable
//! envelopes are logged and skipped, and a lost transport degrades into a
//! scheduled reconnect instead of an error return.

pub mod actions;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod engine;
pub mod session;
pub mod settings;
pub mod store;
