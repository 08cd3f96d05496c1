//! # Session Engine Library
//!
//! This library implements the server side of a real-time competitive
//! session platform for language learners: two quick-match game modes
//! (quiz and typing race) paired through a FIFO queue, plus hosted rooms
//! that players join by short code and start through a ready check.
//!
//! ## Architecture
//!
//! ### Single Engine Loop
//! All state lives behind one sequential command loop ([`engine::Engine`]).
//! Every inbound frame, timer expiry and collaborator completion becomes
//! one [`engine::EngineCommand`] on one channel, which eliminates races
//! over the matchmaking queue and the session registry without locks.
//! Anything that would suspend the loop (content fetches, settlement
//! writes, countdowns, time limits) runs in a spawned task that posts a
//! completion command back into the channel.
//!
//! ### WebSocket Gateway
//! Clients speak JSON text frames over WebSocket ([`network::Gateway`]).
//! A connection starts with a token handshake; after that, every frame is
//! attributed to the bound identity and forwarded to the engine. Outbound
//! messages travel through a per-connection outbox channel drained by a
//! writer task, so the engine never blocks on a slow socket.
//!
//! ### Collaborator Seams
//! The question/word bank ([`content::ContentProvider`]), the identity
//! service ([`auth::IdentityVerifier`]) and the XP ledger
//! ([`persistence::SettlementSink`]) are traits. Production wires real
//! services; tests and standalone runs use the built-in implementations.
//!
//! ## Module Organization
//!
//! - `auth` — token verification seam and the local dev verifier
//! - `content` — content items, fetch seam, built-in sample bank
//! - `engine` — the command loop owning queue and registry
//! - `error` — error taxonomy shared across the crate
//! - `matchmaking` — FIFO pairing queue
//! - `network` — WebSocket gateway and frame mapping
//! - `persistence` — fire-and-forget settlement records
//! - `scoring` — pure XP and point formulas
//! - `session` — the unified session state machine and registry

pub mod auth;
pub mod content;
pub mod engine;
pub mod error;
pub mod matchmaking;
pub mod network;
pub mod persistence;
pub mod scoring;
pub mod session;
pub mod util;
