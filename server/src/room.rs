//! Rooms: one independent race with its own scheduler.
//!
//! A room owns its participants and drives them from a single task that
//! multiplexes two timers: the simulation step (60 Hz by default) and the state
//! broadcast (20 Hz). Transport tasks call [`Room::add_player`],
//! [`Room::remove_player`] and [`Room::handle_input`] concurrently with that task.
//!
//! ## Locking
//!
//! The roster sits behind a `RwLock`: steps and broadcasts take a shared lock
//! just long enough to clone the participant list, joins and leaves take the
//! exclusive lock only for the map mutation. Participant state has its own lock.
//! No lock is ever held while sending to a connection or across an `.await`.

use crate::anticheat::{AntiCheat, Verdict};
use crate::config::RoomConfig;
use crate::error::RoomError;
use crate::participant::Participant;
use crate::spatial::SpatialGrid;
use log::{debug, error, info, trace, warn};
use parking_lot::{Mutex, RwLock};
use shared::protocol::{ErrorCode, InputMessage, PlayerStateData, ServerMessage};
use shared::{integrate, resolve_collision};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, MissedTickBehavior};

pub use crate::error::SendError;

/// Outbound half of a client connection.
///
/// `send` must never block: implementations queue the frame or drop it and
/// report [`SendError::Full`].
pub trait Connection: Send + Sync {
    fn send(&self, frame: &[u8]) -> Result<(), SendError>;
    fn close(&self);
    fn remote_addr(&self) -> String;
}

/// Membership and outcome notifications published by rooms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomEvent {
    Joined {
        room_id: String,
        id: u16,
        name: String,
    },
    Left {
        room_id: String,
        id: u16,
    },
    Kicked {
        room_id: String,
        id: u16,
        reason: String,
    },
    Exploded {
        room_id: String,
        id: u16,
    },
}

/// Dense participant storage with an id index.
struct Roster {
    participants: Vec<Arc<Participant>>,
    index: HashMap<u16, usize>,
    next_id: u32,
}

impl Roster {
    fn new() -> Self {
        Self {
            participants: Vec::new(),
            index: HashMap::new(),
            next_id: 1,
        }
    }

    fn len(&self) -> usize {
        self.participants.len()
    }

    /// Hands out the next id. Ids are never reused within a room.
    fn allocate_id(&mut self) -> Option<u16> {
        let id = u16::try_from(self.next_id).ok()?;
        self.next_id += 1;
        Some(id)
    }

    fn insert(&mut self, participant: Arc<Participant>) {
        self.index.insert(participant.id(), self.participants.len());
        self.participants.push(participant);
    }

    fn remove(&mut self, id: u16) -> Option<Arc<Participant>> {
        let slot = self.index.remove(&id)?;
        let removed = self.participants.swap_remove(slot);
        if let Some(moved) = self.participants.get(slot) {
            self.index.insert(moved.id(), slot);
        }
        Some(removed)
    }

    fn get(&self, id: u16) -> Option<&Arc<Participant>> {
        self.index.get(&id).map(|&slot| &self.participants[slot])
    }
}

pub struct Room {
    id: String,
    config: RoomConfig,
    roster: RwLock<Roster>,
    anticheat: AntiCheat,
    grid: Mutex<SpatialGrid>,
    tick: AtomicU64,
    running: AtomicBool,
    stop_tx: Mutex<Option<oneshot::Sender<()>>>,
    events: Option<mpsc::UnboundedSender<RoomEvent>>,
}

impl Room {
    pub fn new(id: impl Into<String>, config: RoomConfig) -> Self {
        Self {
            id: id.into(),
            config,
            roster: RwLock::new(Roster::new()),
            anticheat: AntiCheat::default(),
            grid: Mutex::new(SpatialGrid::default()),
            tick: AtomicU64::new(0),
            running: AtomicBool::new(false),
            stop_tx: Mutex::new(None),
            events: None,
        }
    }

    /// Publishes membership and explosion events on `events`.
    pub fn with_events(mut self, events: mpsc::UnboundedSender<RoomEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &RoomConfig {
        &self.config
    }

    pub fn tick(&self) -> u64 {
        self.tick.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn player_count(&self) -> usize {
        self.roster.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.player_count() == 0
    }

    pub fn participant(&self, id: u16) -> Option<Arc<Participant>> {
        self.roster.read().get(id).cloned()
    }

    /// Spawns the scheduler on the current Tokio runtime. No-op if already running.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }

        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                error!("Room {} cannot start outside a runtime: {}", self.id, e);
                self.running.store(false, Ordering::Release);
                return;
            }
        };

        let (stop_tx, stop_rx) = oneshot::channel();
        *self.stop_tx.lock() = Some(stop_tx);
        handle.spawn(Arc::clone(self).run(stop_rx));
        info!("Room {} started", self.id);
    }

    /// Signals the scheduler to exit after any in-flight step. No-op if not running.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(stop_tx) = self.stop_tx.lock().take() {
            let _ = stop_tx.send(());
        }
        info!("Room {} stopped", self.id);
    }

    async fn run(self: Arc<Self>, mut stop_rx: oneshot::Receiver<()>) {
        let mut physics = interval(rate_period(self.config.physics_rate));
        physics.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut broadcast = interval(rate_period(self.config.broadcast_rate));
        broadcast.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut last_step = Instant::now();

        loop {
            tokio::select! {
                _ = &mut stop_rx => break,
                now = physics.tick() => {
                    let now = now.into_std();
                    let dt = now.saturating_duration_since(last_step).as_secs_f64();
                    last_step = now;

                    self.guarded("simulation", || self.step(dt));

                    let tick = self.tick();
                    if tick % u64::from(self.config.physics_rate.max(1)) == 0 {
                        debug!(
                            "Room {} tick {}: {} players, dt {:.4}s",
                            self.id,
                            tick,
                            self.player_count(),
                            dt
                        );
                    }
                }
                _ = broadcast.tick() => {
                    self.guarded("broadcast", || self.broadcast_state());
                }
            }
        }
    }

    /// Runs one scheduler job, logging instead of unwinding out of the task.
    fn guarded(&self, what: &str, job: impl FnOnce()) {
        if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(job)) {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!("Room {} {} step panicked: {}", self.id, what, message);
        }
    }

    fn snapshot(&self) -> Vec<Arc<Participant>> {
        self.roster.read().participants.clone()
    }

    /// Advances the simulation by `dt` seconds (clamped to the configured maximum).
    pub fn step(&self, dt: f64) {
        let dt = if dt.is_finite() {
            dt.clamp(0.0, self.config.max_delta)
        } else {
            0.0
        };
        let now = Instant::now();
        let snapshot = self.snapshot();
        let mut exploded = Vec::new();

        // Integrate
        let mut cars = Vec::with_capacity(snapshot.len());
        for participant in &snapshot {
            let mut state = participant.state_mut();
            state.inputs_this_tick = 0;

            if state.should_respawn(now, self.config.respawn_delay) {
                state.respawn();
                debug!("Player {} respawned in room {}", participant.id(), self.id);
            }

            let was_exploded = state.car.exploded;
            state.car = integrate(&state.car, &state.input, dt);
            if state.car.exploded {
                if !was_exploded {
                    state.exploded_at = Some(now);
                    exploded.push(participant.id());
                }
            } else {
                state.active_secs += dt;
            }
            cars.push(state.car);
        }

        // Collide
        let pairs = {
            let mut grid = self.grid.lock();
            grid.rebuild(
                snapshot
                    .iter()
                    .zip(&cars)
                    .map(|(participant, car)| (participant.id(), car.x, car.y)),
            );
            grid.candidate_pairs()
        };

        let mut pushed = vec![false; cars.len()];
        for (a, b) in pairs {
            let other = cars[b];
            if resolve_collision(&mut cars[a], &other, dt) {
                pushed[a] = true;
            }
        }
        for (slot, participant) in snapshot.iter().enumerate() {
            if pushed[slot] {
                participant.state_mut().car = cars[slot];
            }
        }

        // Validate
        let mut kicked = Vec::new();
        for participant in &snapshot {
            let mut state = participant.state_mut();
            let verdict = self.anticheat.validate(&mut state, dt);
            if verdict == Verdict::Kick {
                kicked.push(Arc::clone(participant));
                continue;
            }
            if self.anticheat.apply(&mut state, verdict, now) {
                warn!(
                    "Player {} left the track bounds in room {}",
                    participant.id(),
                    self.id
                );
                exploded.push(participant.id());
            }
        }

        for participant in &kicked {
            self.kick(participant, "Speed hack detected");
        }

        for id in exploded {
            if kicked.iter().any(|p| p.id() == id) {
                continue;
            }
            self.broadcast(&ServerMessage::PlayerDeath { id }, None);
            self.emit(RoomEvent::Exploded {
                room_id: self.id.clone(),
                id,
            });
        }

        self.tick.fetch_add(1, Ordering::AcqRel);
    }

    /// Sends the current state of every participant to every participant.
    pub fn broadcast_state(&self) {
        let snapshot = self.snapshot();
        if snapshot.is_empty() {
            return;
        }

        let players = snapshot
            .iter()
            .map(|p| PlayerStateData::from_car(p.id(), &p.car(), p.color()))
            .collect();
        let tick = (self.tick() & 0xFFFF) as u16;

        let Some(frame) = self.encode(&ServerMessage::StateUpdate { tick, players }) else {
            return;
        };
        for participant in snapshot.iter().filter(|p| p.is_welcomed()) {
            self.deliver(participant, &frame);
        }
    }

    /// Adds a participant.
    ///
    /// The joiner receives a RoomInfo and everyone else a PlayerJoin. Until its
    /// RoomInfo is out, the joiner is simulated and shown to others but is sent
    /// no broadcasts. A full room answers the joiner with an Error frame and
    /// leaves the roster alone.
    pub fn add_player(
        &self,
        name: &str,
        color: u8,
        connection: Arc<dyn Connection>,
    ) -> Result<Arc<Participant>, RoomError> {
        let admitted = {
            let mut roster = self.roster.write();
            if roster.len() >= self.config.max_players {
                Err(RoomError::Full)
            } else if let Some(id) = roster.allocate_id() {
                let participant = Arc::new(Participant::new(
                    id,
                    name.to_string(),
                    color,
                    Arc::clone(&connection),
                ));
                roster.insert(Arc::clone(&participant));
                Ok((participant, roster.len()))
            } else {
                Err(RoomError::IdsExhausted)
            }
        };

        let (participant, count) = match admitted {
            Ok(admitted) => admitted,
            Err(e) => {
                let refusal = ServerMessage::error(ErrorCode::RoomFull, e.to_string());
                if let Some(frame) = self.encode(&refusal) {
                    let _ = connection.send(&frame);
                }
                debug!(
                    "Room {} refused {}: {}",
                    self.id,
                    connection.remote_addr(),
                    e
                );
                return Err(e);
            }
        };

        let id = participant.id();
        self.send_to(
            &participant,
            &ServerMessage::RoomInfo {
                room_id: self.id.clone(),
                player_count: saturate(count),
                max_players: saturate(self.config.max_players),
                your_id: id,
            },
        );
        participant.mark_welcomed();
        self.broadcast(
            &ServerMessage::PlayerJoin {
                id,
                name: name.to_string(),
                color,
            },
            Some(id),
        );

        info!("Player {} (ID: {}) joined room {}", name, id, self.id);
        self.emit(RoomEvent::Joined {
            room_id: self.id.clone(),
            id,
            name: name.to_string(),
        });

        Ok(participant)
    }

    /// Removes a participant and tells the others. Unknown ids are ignored.
    ///
    /// The participant's connection stays open; the caller owns it.
    pub fn remove_player(&self, id: u16) -> Option<Arc<Participant>> {
        let removed = self.roster.write().remove(id);

        if let Some(participant) = &removed {
            self.broadcast(&ServerMessage::PlayerLeave { id }, None);
            info!(
                "Player {} (ID: {}) left room {}",
                participant.name(),
                id,
                self.id
            );
            self.emit(RoomEvent::Left {
                room_id: self.id.clone(),
                id,
            });
        }

        removed
    }

    /// Records a participant's control input for the next step.
    pub fn handle_input(&self, id: u16, input: &InputMessage) {
        let Some(participant) = self.participant(id) else {
            return;
        };

        let mut state = participant.state_mut();
        if self.anticheat.check_input_rate(&mut state) == Verdict::IgnoreInput {
            return;
        }
        state.input = input.to_control();
        state.last_input_at = Instant::now();
    }

    fn kick(&self, participant: &Arc<Participant>, reason: &str) {
        let id = participant.id();
        info!(
            "Kicking player {} (ID: {}) from room {}: {}",
            participant.name(),
            id,
            self.id,
            reason
        );

        self.send_to(participant, &ServerMessage::error(ErrorCode::Kicked, reason));
        self.remove_player(id);
        participant.connection().close();

        self.emit(RoomEvent::Kicked {
            room_id: self.id.clone(),
            id,
            reason: reason.to_string(),
        });
    }

    fn broadcast(&self, message: &ServerMessage, except: Option<u16>) {
        let Some(frame) = self.encode(message) else {
            return;
        };
        for participant in self.snapshot() {
            if Some(participant.id()) == except || !participant.is_welcomed() {
                continue;
            }
            self.deliver(&participant, &frame);
        }
    }

    fn send_to(&self, participant: &Participant, message: &ServerMessage) {
        if let Some(frame) = self.encode(message) {
            self.deliver(participant, &frame);
        }
    }

    fn deliver(&self, participant: &Participant, frame: &[u8]) {
        match participant.connection().send(frame) {
            Ok(()) => {}
            Err(SendError::Full) => {
                trace!("Dropped frame for player {}: queue full", participant.id());
            }
            Err(e) => {
                warn!("Failed to send to player {}: {}", participant.id(), e);
            }
        }
    }

    fn encode(&self, message: &ServerMessage) -> Option<Vec<u8>> {
        match message.encode() {
            Ok(frame) => Some(frame),
            Err(e) => {
                error!("Room {} failed to encode message: {}", self.id, e);
                None
            }
        }
    }

    fn emit(&self, event: RoomEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}

impl std::fmt::Debug for Room {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Room")
            .field("id", &self.id)
            .field("players", &self.player_count())
            .field("tick", &self.tick())
            .field("running", &self.is_running())
            .finish()
    }
}

fn rate_period(hz: u32) -> Duration {
    Duration::from_secs_f64(1.0 / f64::from(hz.max(1)))
}

fn saturate(n: usize) -> u8 {
    u8::try_from(n).unwrap_or(u8::MAX)
}
