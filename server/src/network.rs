//! UDP transport: one datagram carries exactly one protocol message.
//!
//! Each remote address gets a session with a bounded outbound queue drained by
//! its own writer task, so a room sending to a slow client never waits on the
//! socket. Inbound datagrams are decoded and routed to the session's room.

use crate::allocator::Allocator;
use crate::client_manager::{ClientManager, Membership};
use crate::error::AllocatorError;
use crate::room::{Connection, SendError};
use log::{debug, error, info, trace, warn};
use parking_lot::Mutex;
use shared::protocol::{ClientMessage, ErrorCode, JoinRoom, ServerMessage};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::{interval, MissedTickBehavior};

/// Frames queued per client before new ones are dropped.
pub const SEND_QUEUE_CAPACITY: usize = 256;

const RECV_BUFFER_SIZE: usize = 2048;

/// Outbound side of a UDP session.
#[derive(Debug)]
pub struct UdpConnection {
    addr: SocketAddr,
    tx: mpsc::Sender<Vec<u8>>,
    closed: AtomicBool,
}

impl UdpConnection {
    pub fn new(addr: SocketAddr, tx: mpsc::Sender<Vec<u8>>) -> Self {
        Self {
            addr,
            tx,
            closed: AtomicBool::new(false),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Connection for UdpConnection {
    fn send(&self, frame: &[u8]) -> Result<(), SendError> {
        if self.is_closed() {
            return Err(SendError::Closed);
        }
        self.tx.try_send(frame.to_vec()).map_err(|e| match e {
            TrySendError::Full(_) => SendError::Full,
            TrySendError::Closed(_) => SendError::Closed,
        })
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn remote_addr(&self) -> String {
        self.addr.to_string()
    }
}

/// The game server's network front end.
pub struct Server {
    socket: Arc<UdpSocket>,
    allocator: Arc<Allocator>,
    clients: Mutex<ClientManager>,
    client_timeout: Duration,
}

impl Server {
    pub async fn bind(
        addr: &str,
        allocator: Arc<Allocator>,
        max_clients: usize,
        client_timeout: Duration,
    ) -> io::Result<Self> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Server listening on {}", socket.local_addr()?);

        Ok(Self {
            socket,
            allocator,
            clients: Mutex::new(ClientManager::new(max_clients)),
            client_timeout,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().len()
    }

    /// Receives and dispatches datagrams until the socket fails for good.
    pub async fn run(&self) -> io::Result<()> {
        let mut buffer = [0u8; RECV_BUFFER_SIZE];
        let mut sweep = interval(Duration::from_secs(1));
        sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let received = tokio::select! {
                received = self.socket.recv_from(&mut buffer) => Some(received),
                _ = sweep.tick() => None,
            };

            match received {
                Some(Ok((len, addr))) => self.handle_datagram(&buffer[..len], addr),
                Some(Err(e)) => {
                    error!("Error receiving datagram: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                None => self.expire_sessions(),
            }
        }
    }

    fn handle_datagram(&self, data: &[u8], addr: SocketAddr) {
        let message = match ClientMessage::decode(data) {
            Ok(message) => message,
            Err(e) => {
                debug!("Ignoring malformed datagram from {}: {}", addr, e);
                return;
            }
        };

        let Some(connection) = self.session_for(addr) else {
            return;
        };

        match message {
            ClientMessage::Ping { timestamp } => {
                if let Ok(frame) = (ServerMessage::Pong { timestamp }).encode() {
                    let _ = connection.send(&frame);
                }
            }
            ClientMessage::JoinRoom(join) => self.handle_join(addr, &connection, join),
            ClientMessage::Input(input) => {
                let membership = self
                    .clients
                    .lock()
                    .get(&addr)
                    .and_then(|session| session.membership.clone());
                if let Some(Membership { room, player_id }) = membership {
                    room.handle_input(player_id, &input);
                }
            }
            ClientMessage::LeaveRoom => {
                let membership = self.clients.lock().take_membership(&addr);
                if let Some(Membership { room, player_id }) = membership {
                    room.remove_player(player_id);
                }
            }
        }
    }

    /// Looks up or opens the session for `addr` and marks it alive.
    fn session_for(&self, addr: SocketAddr) -> Option<Arc<UdpConnection>> {
        let mut clients = self.clients.lock();

        if let Some(session) = clients.get(&addr) {
            if !session.connection.is_closed() {
                let connection = Arc::clone(&session.connection);
                clients.touch(&addr);
                return Some(connection);
            }
            // Kicked clients start over with a fresh session.
            clients.remove_client(&addr);
        }

        let connection = self.open_connection(addr);
        if !clients.add_client(addr, Arc::clone(&connection)) {
            drop(clients);
            warn!("Rejecting {}: too many clients", addr);
            let refusal = ServerMessage::error(ErrorCode::RoomFull, "Server full");
            if let Ok(frame) = refusal.encode() {
                let _ = self.socket.try_send_to(&frame, addr);
            }
            return None;
        }
        Some(connection)
    }

    fn open_connection(&self, addr: SocketAddr) -> Arc<UdpConnection> {
        let (tx, mut rx) = mpsc::channel::<Vec<u8>>(SEND_QUEUE_CAPACITY);
        let socket = Arc::clone(&self.socket);

        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if let Err(e) = socket.send_to(&frame, addr).await {
                    warn!("Failed to send to {}: {}", addr, e);
                }
            }
            trace!("Writer for {} finished", addr);
        });

        Arc::new(UdpConnection::new(addr, tx))
    }

    fn handle_join(&self, addr: SocketAddr, connection: &Arc<UdpConnection>, join: JoinRoom) {
        let already_joined = self
            .clients
            .lock()
            .get(&addr)
            .map_or(false, |session| session.membership.is_some());
        if already_joined {
            debug!("Ignoring join from {}: already in a room", addr);
            return;
        }

        let name = join.sanitized_name();
        let placed = self.allocator.join(&name, join.color, connection.clone());
        let (room, participant) = match placed {
            Ok(placed) => placed,
            Err(AllocatorError::NoRoomAvailable) => {
                info!("No room for {}", addr);
                let refusal = ServerMessage::error(ErrorCode::RoomFull, "Server full");
                if let Ok(frame) = refusal.encode() {
                    let _ = connection.send(&frame);
                }
                return;
            }
            // The room already told the client why.
            Err(AllocatorError::Rejected(e)) => {
                debug!("Join from {} refused: {}", addr, e);
                return;
            }
        };

        let membership = Membership {
            room: Arc::clone(&room),
            player_id: participant.id(),
        };
        if !self.clients.lock().set_membership(&addr, Some(membership)) {
            // The session vanished while joining.
            room.remove_player(participant.id());
        }
    }

    fn expire_sessions(&self) {
        let expired = self.clients.lock().check_timeouts(self.client_timeout);

        for session in expired {
            if let Some(Membership { room, player_id }) = session.membership {
                room.remove_player(player_id);
            }
            session.connection.close();
            debug!("Session {} expired", session.addr);
        }
    }
}
