//! Room allocation.
//!
//! The allocator owns every room hosted by this server. Joining clients are
//! placed in the first room with a free seat; a new room is opened only when
//! all existing rooms are full and the room cap allows it. Empty rooms are only
//! torn down by [`Allocator::cleanup_empty_rooms`], which the host calls on a
//! timer.

use crate::config::AllocatorConfig;
use crate::error::AllocatorError;
use crate::participant::Participant;
use crate::room::{Connection, Room, RoomEvent};
use log::info;
use parking_lot::RwLock;
use rand::Rng;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoomStats {
    pub id: String,
    pub player_count: usize,
    pub max_players: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AllocatorStats {
    pub total_rooms: usize,
    pub total_players: usize,
    pub rooms: Vec<RoomStats>,
}

pub struct Allocator {
    config: AllocatorConfig,
    rooms: RwLock<HashMap<String, Arc<Room>>>,
    events: Option<mpsc::UnboundedSender<RoomEvent>>,
}

impl Allocator {
    pub fn new(config: AllocatorConfig) -> Self {
        Self {
            config,
            rooms: RwLock::new(HashMap::new()),
            events: None,
        }
    }

    /// Rooms created by this allocator publish their events on `events`.
    pub fn with_events(mut self, events: mpsc::UnboundedSender<RoomEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    /// Returns a room with a free seat, opening and starting a new one if needed.
    ///
    /// The registry lock is released on return, so a room handed out here can be
    /// evicted by [`Allocator::cleanup_empty_rooms`] before anyone joins it. Use
    /// [`Allocator::join`] to place a participant.
    pub fn find_room(&self) -> Result<Arc<Room>, AllocatorError> {
        let mut rooms = self.rooms.write();
        self.place(&mut rooms)
    }

    /// Places a new participant in a room with a free seat.
    ///
    /// Room choice and the join happen under the registry lock, so cleanup can
    /// never evict the room in between. A room refusing the join has already
    /// sent the client its Error frame.
    pub fn join(
        &self,
        name: &str,
        color: u8,
        connection: Arc<dyn Connection>,
    ) -> Result<(Arc<Room>, Arc<Participant>), AllocatorError> {
        let mut rooms = self.rooms.write();
        let room = self.place(&mut rooms)?;
        let participant = room.add_player(name, color, connection)?;
        Ok((room, participant))
    }

    fn place(
        &self,
        rooms: &mut HashMap<String, Arc<Room>>,
    ) -> Result<Arc<Room>, AllocatorError> {
        if let Some(room) = rooms
            .values()
            .find(|room| room.player_count() < self.config.room.max_players)
        {
            return Ok(Arc::clone(room));
        }

        if rooms.len() >= self.config.max_rooms {
            return Err(AllocatorError::NoRoomAvailable);
        }

        let mut id = generate_room_id();
        while rooms.contains_key(&id) {
            id = generate_room_id();
        }

        let room = self.open_room(id.clone());
        rooms.insert(id, Arc::clone(&room));
        Ok(room)
    }

    pub fn get_room(&self, id: &str) -> Option<Arc<Room>> {
        self.rooms.read().get(id).cloned()
    }

    /// Returns the room named `id`, opening it if the room cap allows.
    pub fn get_or_create_room(&self, id: &str) -> Result<Arc<Room>, AllocatorError> {
        let mut rooms = self.rooms.write();

        if let Some(room) = rooms.get(id) {
            return Ok(Arc::clone(room));
        }
        if rooms.len() >= self.config.max_rooms {
            return Err(AllocatorError::NoRoomAvailable);
        }

        let room = self.open_room(id.to_string());
        rooms.insert(id.to_string(), Arc::clone(&room));
        Ok(room)
    }

    /// Stops and forgets a room. Returns false for unknown ids.
    pub fn remove_room(&self, id: &str) -> bool {
        let removed = self.rooms.write().remove(id);
        match removed {
            Some(room) => {
                room.stop();
                true
            }
            None => false,
        }
    }

    /// Stops and evicts every room without participants. Returns how many went.
    pub fn cleanup_empty_rooms(&self) -> usize {
        let mut rooms = self.rooms.write();
        let before = rooms.len();

        rooms.retain(|_, room| {
            if room.is_empty() {
                room.stop();
                false
            } else {
                true
            }
        });

        before - rooms.len()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.read().len()
    }

    pub fn stats(&self) -> AllocatorStats {
        let rooms = self.rooms.read();
        let mut stats = AllocatorStats {
            total_rooms: rooms.len(),
            ..AllocatorStats::default()
        };

        for (id, room) in rooms.iter() {
            let player_count = room.player_count();
            stats.total_players += player_count;
            stats.rooms.push(RoomStats {
                id: id.clone(),
                player_count,
                max_players: self.config.room.max_players,
            });
        }
        stats.rooms.sort_by(|a, b| a.id.cmp(&b.id));

        stats
    }

    /// Stops every room.
    pub fn shutdown(&self) {
        let rooms: Vec<Arc<Room>> = self.rooms.write().drain().map(|(_, room)| room).collect();
        for room in &rooms {
            room.stop();
        }
        info!("Allocator shut down {} rooms", rooms.len());
    }

    fn open_room(&self, id: String) -> Arc<Room> {
        let mut room = Room::new(id, self.config.room.clone());
        if let Some(events) = &self.events {
            room = room.with_events(events.clone());
        }
        let room = Arc::new(room);
        room.start();
        room
    }
}

/// Random 16 hex digit room id.
fn generate_room_id() -> String {
    let value: u64 = rand::thread_rng().gen();
    format!("{:016x}", value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RoomConfig;
    use crate::error::{RoomError, SendError};

    struct NullConnection;

    impl Connection for NullConnection {
        fn send(&self, _frame: &[u8]) -> Result<(), SendError> {
            Ok(())
        }

        fn close(&self) {}

        fn remote_addr(&self) -> String {
            "null".to_string()
        }
    }

    fn allocator(max_rooms: usize, max_players: usize) -> Allocator {
        Allocator::new(AllocatorConfig {
            max_rooms,
            room: RoomConfig {
                max_players,
                ..RoomConfig::default()
            },
        })
    }

    fn fill(room: &Room, count: usize) {
        for i in 0..count {
            room.add_player(&format!("p{}", i), 0, Arc::new(NullConnection))
                .unwrap();
        }
    }

    #[test]
    fn test_room_id_format() {
        let id = generate_room_id();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn test_find_room_reuses_room_with_space() {
        let allocator = allocator(4, 2);
        let first = allocator.find_room().unwrap();
        assert!(first.is_running());
        fill(&first, 1);

        let second = allocator.find_room().unwrap();
        assert_eq!(first.id(), second.id());
        assert_eq!(allocator.room_count(), 1);
        allocator.shutdown();
    }

    #[tokio::test]
    async fn test_find_room_opens_new_room_when_full() {
        let allocator = allocator(4, 1);
        let first = allocator.find_room().unwrap();
        fill(&first, 1);

        let second = allocator.find_room().unwrap();
        assert_ne!(first.id(), second.id());
        assert_eq!(allocator.room_count(), 2);
        allocator.shutdown();
    }

    #[tokio::test]
    async fn test_no_room_available_at_capacity() {
        let allocator = allocator(2, 1);
        for _ in 0..2 {
            let room = allocator.find_room().unwrap();
            fill(&room, 1);
        }

        assert_eq!(
            allocator.find_room().unwrap_err(),
            AllocatorError::NoRoomAvailable
        );
        assert_eq!(allocator.room_count(), 2);
        allocator.shutdown();
    }

    #[tokio::test]
    async fn test_cleanup_empty_rooms() {
        let allocator = allocator(4, 1);
        let busy = allocator.find_room().unwrap();
        fill(&busy, 1);
        let idle = allocator.find_room().unwrap();

        assert_eq!(allocator.cleanup_empty_rooms(), 1);
        assert!(!idle.is_running());
        assert!(busy.is_running());
        assert!(allocator.get_room(busy.id()).is_some());
        assert!(allocator.get_room(idle.id()).is_none());
        allocator.shutdown();
    }

    #[tokio::test]
    async fn test_get_or_create_room() {
        let allocator = allocator(1, 4);
        let lobby = allocator.get_or_create_room("lobby").unwrap();
        let again = allocator.get_or_create_room("lobby").unwrap();
        assert!(Arc::ptr_eq(&lobby, &again));

        assert_eq!(
            allocator.get_or_create_room("other").unwrap_err(),
            AllocatorError::NoRoomAvailable
        );

        assert!(allocator.remove_room("lobby"));
        assert!(!allocator.remove_room("lobby"));
        assert!(!lobby.is_running());
    }

    #[tokio::test]
    async fn test_stats() {
        let allocator = allocator(4, 1);
        let a = allocator.find_room().unwrap();
        fill(&a, 1);
        allocator.find_room().unwrap();

        let stats = allocator.stats();
        assert_eq!(stats.total_rooms, 2);
        assert_eq!(stats.total_players, 1);
        assert!(stats.rooms.iter().all(|r| r.max_players == 1));

        allocator.shutdown();
        assert_eq!(allocator.room_count(), 0);
        assert!(!a.is_running());
    }

    #[tokio::test]
    async fn test_join_survives_cleanup_of_found_room() {
        let allocator = allocator(4, 4);
        let stale = allocator.find_room().unwrap();
        assert_eq!(allocator.cleanup_empty_rooms(), 1);
        assert!(!stale.is_running());

        let (room, participant) = allocator
            .join("late", 0, Arc::new(NullConnection))
            .unwrap();
        assert!(room.is_running());
        assert_ne!(room.id(), stale.id());
        assert!(allocator.get_room(room.id()).is_some());
        assert!(room.participant(participant.id()).is_some());
        assert_eq!(stale.player_count(), 0);
        allocator.shutdown();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_join_races_cleanup() {
        let allocator = Arc::new(allocator(64, 1));
        let sweeper = {
            let allocator = Arc::clone(&allocator);
            std::thread::spawn(move || {
                for _ in 0..2000 {
                    allocator.cleanup_empty_rooms();
                }
            })
        };

        let mut joined = Vec::new();
        for i in 0..64 {
            let (room, _) = allocator
                .join(&format!("p{}", i), 0, Arc::new(NullConnection))
                .unwrap();
            joined.push(room);
        }
        sweeper.join().unwrap();

        for room in &joined {
            assert!(room.is_running());
            assert!(allocator.get_room(room.id()).is_some());
        }
        assert_eq!(allocator.stats().total_players, 64);
        allocator.shutdown();
    }

    #[tokio::test]
    async fn test_join_reports_room_refusal() {
        let allocator = allocator(1, 1);
        let room = allocator.get_or_create_room("exhausted").unwrap();
        fill(&room, 1);

        assert_eq!(
            allocator
                .join("extra", 0, Arc::new(NullConnection))
                .unwrap_err(),
            AllocatorError::NoRoomAvailable
        );
        assert_eq!(
            AllocatorError::from(RoomError::Full),
            AllocatorError::Rejected(RoomError::Full)
        );
        allocator.shutdown();
    }
}
