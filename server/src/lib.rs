//! # Game Server Library
//!
//! Authoritative server for a real-time multiplayer racing game. Clients only
//! submit control input; the server integrates every car, resolves collisions,
//! rejects impossible movement and broadcasts the resulting state.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Simulation
//! Each room steps its cars at a fixed 60 Hz with the same integrator the
//! renderer uses for prediction (see the `shared` crate), and broadcasts a
//! compact snapshot of every car at 20 Hz.
//!
//! ### Anti-Cheat
//! After every step each car is checked for impossible displacement, excessive
//! speed, leaving the track bounds and an implausible rating. Offenders are
//! rubberbanded, clamped or exploded, and repeat offenders are kicked.
//! Input flooding is dropped as it arrives.
//!
//! ### Room Allocation
//! Joining clients are placed in the first room with a free seat. New rooms are
//! opened on demand up to a configured cap and evicted once empty.
//!
//! ## Architecture Design
//!
//! ### One Task Per Room
//! A room's simulation and broadcast timers are multiplexed on a single Tokio
//! task, so the two never run concurrently for the same room. Transport tasks
//! join, leave and submit input concurrently; those calls take short,
//! synchronous `parking_lot` locks that are never held across an `.await`.
//!
//! ### Non-Blocking Fan-Out
//! Rooms talk to clients through the [`room::Connection`] trait, whose `send`
//! queues or drops a frame but never waits. The bundled UDP transport gives
//! every client a bounded queue drained by its own writer task.
//!
//! ## Module Organization
//!
//! - [`config`]: command line configuration and per-room settings
//! - [`participant`]: a driver's identity and lock-guarded simulation state
//! - [`anticheat`]: validation verdicts and their application
//! - [`spatial`]: uniform grid for collision candidate pairs
//! - [`room`]: the per-room scheduler, roster and broadcasts
//! - [`allocator`]: room registry, placement and cleanup
//! - [`client_manager`]: per-address session table for the transport
//! - [`network`]: UDP transport
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::allocator::Allocator;
//! use server::config::AllocatorConfig;
//! use server::network::Server;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let allocator = Arc::new(Allocator::new(AllocatorConfig::default()));
//!
//!     // Up to 5000 client sessions, dropped after 60 s of silence
//!     let server = Server::bind("127.0.0.1:8080", allocator, 5000, Duration::from_secs(60)).await?;
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod allocator;
pub mod anticheat;
pub mod client_manager;
pub mod config;
pub mod error;
pub mod network;
pub mod participant;
pub mod room;
pub mod spatial;
