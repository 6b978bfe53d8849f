//! Server configuration.
//!
//! `Config` is parsed from the command line (with environment fallbacks for the
//! bind address) and split into the plain structs the core consumes.

use clap::Parser;
use shared::{
    BROADCAST_RATE, MAX_DELTA_TIME, MAX_PLAYERS_PER_ROOM, MAX_ROOMS_PER_SERVER, PHYSICS_TICK_RATE,
};
use std::time::Duration;

/// Per-room simulation settings.
#[derive(Debug, Clone)]
pub struct RoomConfig {
    pub max_players: usize,
    /// Simulation steps per second
    pub physics_rate: u32,
    /// State broadcasts per second
    pub broadcast_rate: u32,
    /// Largest delta a single step integrates
    pub max_delta: f64,
    /// How long an exploded car stays wrecked before it respawns
    pub respawn_delay: Duration,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            max_players: MAX_PLAYERS_PER_ROOM,
            physics_rate: PHYSICS_TICK_RATE,
            broadcast_rate: BROADCAST_RATE,
            max_delta: MAX_DELTA_TIME,
            respawn_delay: Duration::from_secs(3),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AllocatorConfig {
    pub max_rooms: usize,
    pub room: RoomConfig,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            max_rooms: MAX_ROOMS_PER_SERVER,
            room: RoomConfig::default(),
        }
    }
}

/// Command line arguments for the game server binary.
#[derive(Parser, Debug, Clone)]
#[clap(author, version, about)]
pub struct Config {
    /// Server IP address to bind to
    #[clap(short = 'H', long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,
    /// Server port to listen on
    #[clap(short, long, env = "PORT", default_value = "8080")]
    pub port: u16,
    /// Maximum participants per room
    #[clap(long, default_value_t = MAX_PLAYERS_PER_ROOM)]
    pub max_players_per_room: usize,
    /// Maximum rooms hosted by this server
    #[clap(long, default_value_t = MAX_ROOMS_PER_SERVER)]
    pub max_rooms: usize,
    /// Maximum concurrent client sessions
    #[clap(long, default_value = "5000")]
    pub max_clients: usize,
    /// Seconds of silence before a client session is dropped
    #[clap(long, default_value = "60")]
    pub client_timeout_secs: u64,
    /// Seconds between empty-room sweeps
    #[clap(long, default_value = "30")]
    pub cleanup_interval_secs: u64,
    /// Seconds between stats log lines
    #[clap(long, default_value = "300")]
    pub stats_interval_secs: u64,
    /// Milliseconds an exploded car waits before respawning
    #[clap(long, default_value = "3000")]
    pub respawn_delay_ms: u64,
}

impl Config {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn room_config(&self) -> RoomConfig {
        RoomConfig {
            max_players: self.max_players_per_room,
            respawn_delay: Duration::from_millis(self.respawn_delay_ms),
            ..RoomConfig::default()
        }
    }

    pub fn allocator_config(&self) -> AllocatorConfig {
        AllocatorConfig {
            max_rooms: self.max_rooms,
            room: self.room_config(),
        }
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.client_timeout_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs)
    }
}
