//! Participants: one driver inside a room.
//!
//! Identity (id, name, color, connection) is fixed at creation and readable
//! without locking. Everything the simulation touches lives in
//! [`ParticipantState`] behind the participant's own `RwLock`: the scheduler
//! takes the write half to step a car, broadcasts and lookups take the read half.

use crate::room::Connection;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use shared::{road_curve, CarState, ControlInput, RESPAWN_ADVANCE};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Mutable simulation and anti-cheat state of one participant.
#[derive(Debug, Clone)]
pub struct ParticipantState {
    pub car: CarState,
    /// Last position that passed validation
    pub last_valid_x: f64,
    pub last_valid_y: f64,
    pub violations: u32,
    /// Inputs received since the last simulation step
    pub inputs_this_tick: u32,
    /// Most recent accepted control input, applied on every step until replaced
    pub input: ControlInput,
    pub last_input_at: Instant,
    pub exploded_at: Option<Instant>,
    /// Simulated seconds integrated since the car last (re)spawned
    pub active_secs: f64,
}

impl ParticipantState {
    /// State of a freshly joined car: stationary on the centerline at the origin,
    /// with that spot saved as the validation baseline.
    pub fn at_start(now: Instant) -> Self {
        let mut state = Self {
            car: CarState::on_centerline(0.0),
            last_valid_x: 0.0,
            last_valid_y: 0.0,
            violations: 0,
            inputs_this_tick: 0,
            input: ControlInput::default(),
            last_input_at: now,
            exploded_at: None,
            active_secs: 0.0,
        };
        state.save_valid_position();
        state
    }

    pub fn save_valid_position(&mut self) {
        self.last_valid_x = self.car.x;
        self.last_valid_y = self.car.y;
        self.violations = 0;
    }

    /// Snaps the car back to its last validated position.
    pub fn rubberband(&mut self) {
        self.car.x = self.last_valid_x;
        self.car.y = self.last_valid_y;
        self.violations += 1;
    }

    /// Marks the car as exploded. Returns false if it already was.
    pub fn explode(&mut self, now: Instant) -> bool {
        if self.car.exploded {
            self.exploded_at.get_or_insert(now);
            return false;
        }
        self.car.exploded = true;
        self.car.rating = 0.0;
        self.exploded_at = Some(now);
        true
    }

    pub fn should_respawn(&self, now: Instant, delay: Duration) -> bool {
        match (self.car.exploded, self.exploded_at) {
            (true, Some(at)) => now.saturating_duration_since(at) >= delay,
            _ => false,
        }
    }

    /// Puts the car back on the centerline a little further down the track.
    pub fn respawn(&mut self) {
        let y = self.car.y + RESPAWN_ADVANCE;
        self.car = CarState {
            x: road_curve(y),
            y,
            speed: 0.0,
            angle: 0.0,
            rating: 0.0,
            exploded: false,
        };
        self.exploded_at = None;
        self.active_secs = 0.0;
        self.save_valid_position();
    }
}

/// A connected driver.
pub struct Participant {
    id: u16,
    name: String,
    color: u8,
    connection: Arc<dyn Connection>,
    connected_at: Instant,
    /// Set once the participant has been sent its RoomInfo.
    welcomed: AtomicBool,
    state: RwLock<ParticipantState>,
}

impl Participant {
    pub fn new(id: u16, name: String, color: u8, connection: Arc<dyn Connection>) -> Self {
        let now = Instant::now();
        Self {
            id,
            name,
            color,
            connection,
            connected_at: now,
            welcomed: AtomicBool::new(false),
            state: RwLock::new(ParticipantState::at_start(now)),
        }
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn color(&self) -> u8 {
        self.color
    }

    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.connection
    }

    pub fn connected_at(&self) -> Instant {
        self.connected_at
    }

    /// Room broadcasts skip participants that have not been welcomed yet.
    pub fn is_welcomed(&self) -> bool {
        self.welcomed.load(Ordering::Acquire)
    }

    pub fn mark_welcomed(&self) {
        self.welcomed.store(true, Ordering::Release);
    }

    pub fn state(&self) -> RwLockReadGuard<'_, ParticipantState> {
        self.state.read()
    }

    pub fn state_mut(&self) -> RwLockWriteGuard<'_, ParticipantState> {
        self.state.write()
    }

    /// Copy of the car for broadcasting.
    pub fn car(&self) -> CarState {
        self.state.read().car
    }
}

impl std::fmt::Debug for Participant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Participant")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("color", &self.color)
            .field("remote", &self.connection.remote_addr())
            .finish()
    }
}
