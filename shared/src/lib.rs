//! Simulation constants, track geometry, physics and wire protocol shared by the
//! authoritative server and any client that mirrors its simulation.
//!
//! Everything in this crate must stay bit-for-bit compatible with the renderer's
//! prediction code: constants, evaluation order and message layouts included.

pub mod physics;
pub mod protocol;

pub use physics::{integrate, resolve_collision, CarState, ControlInput};
pub use protocol::{ClientMessage, ErrorCode, ProtocolError, ServerMessage};

// Dimensions
pub const CAR_WIDTH: f64 = 20.0;
pub const CAR_HEIGHT: f64 = 34.0;
pub const ROAD_WIDTH: f64 = 400.0;

// Timing
pub const PHYSICS_TICK_RATE: u32 = 60;
pub const BROADCAST_RATE: u32 = 20;
/// Upper bound on a single step's delta, applied after scheduler stalls.
pub const MAX_DELTA_TIME: f64 = 0.1;

// Driving
pub const MAX_SPEED: f64 = 1400.0;
pub const REVERSE_SPEED_RATIO: f64 = 0.2;
pub const ACCELERATION: f64 = 900.0;
pub const BRAKING: f64 = 2000.0;
pub const FRICTION_ROAD: f64 = 250.0;
pub const FRICTION_OFFROAD: f64 = 5000.0;
pub const OFFROAD_DRAG: f64 = 2.0;
pub const INERTIA_DAMPENING: f64 = 0.3;
pub const MIN_TURN_AUTHORITY: f64 = 0.5;
pub const EXPLOSION_TOLERANCE: f64 = 0.35;
pub const ANALOG_DEADZONE: f64 = 0.1;

// Steering
pub const TURN_SPEED: f64 = 550.0;
pub const MAX_STEER_ANGLE: f64 = 25.0;
pub const MIN_TURN_SPEED: f64 = 20.0;
pub const TURN_SPEED_PENALTY: f64 = 0.3;
pub const ANGLE_DECAY: f64 = 0.9;

// Collisions
pub const PUSH_FORCE: f64 = 2.0;
pub const PUSH_BASE_SPEED: f64 = 100.0;
pub const SPEED_DIFF_MULTIPLIER: f64 = 3.5;
pub const SPEED_DIFF_THRESHOLD: f64 = 200.0;
pub const COLLISION_RADIUS: f64 = CAR_WIDTH * 1.4;
pub const COLLISION_DAMPING: f64 = 0.9;
pub const SPATIAL_CELL_SIZE: f64 = 100.0;

// Track generation
pub const ROAD_SCALE: f64 = 0.001;
pub const ROAD_AMPLITUDE: f64 = 600.0;

// Rooms
pub const MAX_PLAYERS_PER_ROOM: usize = 100;
pub const MAX_ROOMS_PER_SERVER: usize = 50;
pub const RESPAWN_ADVANCE: f64 = 200.0;
pub const MAX_NAME_LEN: usize = 20;

// Anti-cheat
pub const MAX_VIOLATIONS: u32 = 5;
pub const SPEED_TOLERANCE: f64 = 1.1;
pub const MAX_INPUTS_PER_TICK: u32 = 3;
pub const RATING_TOLERANCE: f64 = 1.5;

/// Key bits carried in the input bitfield.
pub const KEY_UP: u8 = 1 << 0;
pub const KEY_DOWN: u8 = 1 << 1;
pub const KEY_LEFT: u8 = 1 << 2;
pub const KEY_RIGHT: u8 = 1 << 3;

/// Returns the x coordinate of the track centerline at forward position `y`.
pub fn road_curve(y: f64) -> f64 {
    let base_curve = (y * ROAD_SCALE).sin() * ROAD_AMPLITUDE;
    let sharp_turn = (y * ROAD_SCALE * 1.5).sin().powi(3) * (ROAD_AMPLITUDE * 0.5);
    base_curve + sharp_turn
}

/// Lateral distance of `(x, y)` from the centerline.
pub fn distance_from_center(x: f64, y: f64) -> f64 {
    (x - road_curve(y)).abs()
}

/// Highest rating a car can accrue per simulated second, reached at full speed.
pub fn max_rating_rate() -> f64 {
    let speed_factor = MAX_SPEED / 100.0;
    speed_factor * speed_factor * 0.5
}
