//! # Pong Match Orchestrator
//!
//! Authoritative server for browser-playable real-time Pong. It owns
//! every match: room lifecycle, the fixed-rate physics simulation, the
//! scripted opponent, tournament lobbies, and result persistence.
//! Clients render what the server tells them and send nothing but
//! intents (paddle positions, room and tournament requests).
//!
//! ## Architecture
//!
//! All mutable state lives in a single event loop (see [`network::Server`]).
//! The socket receiver, the outbound sender and the per-room AI timers
//! run as separate tasks, but they only exchange messages with the loop
//! over channels. No registry is ever touched from two tasks, so there
//! are no locks around game state and every tick observes a consistent
//! world.
//!
//! Rooms simulate at a fixed tick rate (60 Hz by default) regardless of
//! how many are running. A room without two effective participants is
//! skipped, not removed, and its state stays frozen until an opponent
//! arrives.
//!
//! ## Module Organization
//!
//! - [`identity`]: token verification, connection tracking, and the
//!   viewer bindings that route state broadcasts.
//! - [`rooms`]: the room registry with its numeric id free-list, name
//!   collision handling and seat management.
//! - [`physics`]: one simulation step, from ball integration through
//!   paddle collision to scoring and win detection.
//! - [`ai`]: the scripted opponent with its difficulty profiles,
//!   trajectory prediction and capped paddle movement.
//! - [`tournament`]: tournament lobbies with host election and
//!   capacity-driven start.
//! - [`persistence`]: the match result store behind a trait, with
//!   retry-once delivery that never blocks the tick.
//! - [`network`]: UDP transport, packet dispatch and the match loop
//!   scheduler tying everything together.

pub mod ai;
pub mod identity;
pub mod network;
pub mod persistence;
pub mod physics;
pub mod rooms;
pub mod tournament;
