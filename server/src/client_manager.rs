//! Client session tracking for the UDP transport.
//!
//! Datagram transports have no connection handshake, so the server keeps one
//! session per remote address:
//! - the outbound connection handed to rooms
//! - the room membership, once the client has joined
//! - the last time anything arrived, for timeout detection
//!
//! The manager only bookkeeps; leaving rooms and closing connections is left to
//! the caller so that no room call happens while the session table is locked.

use crate::network::UdpConnection;
use crate::room::Room;
use log::info;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// The room and participant id a session is playing as.
#[derive(Debug, Clone)]
pub struct Membership {
    pub room: Arc<Room>,
    pub player_id: u16,
}

/// A remote client known to the server
#[derive(Debug)]
pub struct Session {
    pub addr: SocketAddr,
    pub connection: Arc<UdpConnection>,
    pub membership: Option<Membership>,
    /// Last time we received any datagram from this client
    pub last_seen: Instant,
}

impl Session {
    pub fn new(addr: SocketAddr, connection: Arc<UdpConnection>) -> Self {
        Self {
            addr,
            connection,
            membership: None,
            last_seen: Instant::now(),
        }
    }

    /// Returns true if nothing arrived from this client within `timeout`.
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }

    /// A session is finished once it timed out or its connection was closed,
    /// which is how rooms signal a kick.
    pub fn is_expired(&self, timeout: Duration) -> bool {
        self.is_timed_out(timeout) || self.connection.is_closed()
    }
}

/// Session table keyed by remote address, bounded by `max_clients`.
pub struct ClientManager {
    sessions: HashMap<SocketAddr, Session>,
    max_clients: usize,
}

impl ClientManager {
    pub fn new(max_clients: usize) -> Self {
        Self {
            sessions: HashMap::new(),
            max_clients,
        }
    }

    /// Registers a session for `addr`.
    ///
    /// Returns false if the server is at capacity. An existing session for the
    /// same address is replaced.
    pub fn add_client(&mut self, addr: SocketAddr, connection: Arc<UdpConnection>) -> bool {
        if !self.sessions.contains_key(&addr) && self.sessions.len() >= self.max_clients {
            return false;
        }

        info!("Client connected from {}", addr);
        self.sessions.insert(addr, Session::new(addr, connection));
        true
    }

    pub fn remove_client(&mut self, addr: &SocketAddr) -> Option<Session> {
        let session = self.sessions.remove(addr)?;
        info!("Client {} disconnected", addr);
        Some(session)
    }

    pub fn get(&self, addr: &SocketAddr) -> Option<&Session> {
        self.sessions.get(addr)
    }

    /// Marks the client as alive. Returns false for unknown addresses.
    pub fn touch(&mut self, addr: &SocketAddr) -> bool {
        match self.sessions.get_mut(addr) {
            Some(session) => {
                session.last_seen = Instant::now();
                true
            }
            None => false,
        }
    }

    pub fn set_membership(&mut self, addr: &SocketAddr, membership: Option<Membership>) -> bool {
        match self.sessions.get_mut(addr) {
            Some(session) => {
                session.membership = membership;
                true
            }
            None => false,
        }
    }

    /// Takes the session's membership, leaving it unjoined.
    pub fn take_membership(&mut self, addr: &SocketAddr) -> Option<Membership> {
        self.sessions.get_mut(addr)?.membership.take()
    }

    /// Removes and returns every expired session.
    pub fn check_timeouts(&mut self, timeout: Duration) -> Vec<Session> {
        let expired: Vec<SocketAddr> = self
            .sessions
            .values()
            .filter(|session| session.is_expired(timeout))
            .map(|session| session.addr)
            .collect();

        expired
            .iter()
            .filter_map(|addr| self.remove_client(addr))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
