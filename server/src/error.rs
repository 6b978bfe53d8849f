//! Error types surfaced by rooms and the room allocator.

/// Reasons a room refuses a join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RoomError {
    #[error("room is full")]
    Full,
    /// Every participant id this room can hand out has been used once already.
    #[error("room has no participant ids left")]
    IdsExhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AllocatorError {
    #[error("no room available")]
    NoRoomAvailable,
    /// The chosen room turned the join down and already told the client.
    #[error("join refused: {0}")]
    Rejected(#[from] RoomError),
}

/// Outbound delivery failures reported by a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// The recipient's queue is saturated; this frame was dropped.
    #[error("send queue full")]
    Full,
    #[error("connection closed")]
    Closed,
}
