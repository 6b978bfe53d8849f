//! Binary wire protocol.
//!
//! Every message starts with a one-byte type tag. Multi-byte fields are
//! little-endian. Fixed-size bodies go through bincode's fixint encoding, which
//! lays structs out field by field with no padding; strings carry an explicit
//! one-byte length prefix and are truncated to 255 bytes.

use crate::physics::{CarState, ControlInput};
use crate::MAX_NAME_LEN;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

// Client -> Server
pub const MSG_INPUT: u8 = 0x01;
pub const MSG_JOIN_ROOM: u8 = 0x02;
pub const MSG_LEAVE_ROOM: u8 = 0x03;
pub const MSG_PING: u8 = 0x04;

// Server -> Client
pub const MSG_STATE_UPDATE: u8 = 0x10;
pub const MSG_PLAYER_JOIN: u8 = 0x11;
pub const MSG_PLAYER_LEAVE: u8 = 0x12;
pub const MSG_PLAYER_DEATH: u8 = 0x13;
pub const MSG_ROOM_INFO: u8 = 0x14;
pub const MSG_PONG: u8 = 0x15;
pub const MSG_ERROR: u8 = 0xFF;

/// Player record flag bits.
pub const FLAG_EXPLODED: u8 = 1 << 0;

pub const INPUT_BODY_SIZE: usize = 5;
pub const PLAYER_RECORD_SIZE: usize = 16;
pub const MAX_STRING_LEN: usize = u8::MAX as usize;
pub const MAX_RECORDS: usize = u8::MAX as usize;
pub const MAX_RATING: u32 = 0xFF_FFFF;

/// Heading is quantized to ±127 over ±25 degrees.
const ANGLE_SCALE: f64 = 127.0 / 25.0;
const POSITION_SCALE: f64 = 10.0;
const ANALOG_SCALE: f64 = 127.0;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("empty message")]
    Empty,
    #[error("unknown message type 0x{0:02x}")]
    UnknownType(u8),
    #[error("unknown error code {0}")]
    UnknownErrorCode(u8),
    #[error("message type 0x{kind:02x} needs {needed} bytes, got {got}")]
    TooShort { kind: u8, needed: usize, got: usize },
    #[error("malformed payload: {0}")]
    Payload(#[from] bincode::Error),
}

/// Error codes carried by the Error message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ErrorCode {
    InvalidMessage = 1,
    RoomFull = 2,
    Kicked = 3,
    ServerError = 4,
}

impl TryFrom<u8> for ErrorCode {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(ErrorCode::InvalidMessage),
            2 => Ok(ErrorCode::RoomFull),
            3 => Ok(ErrorCode::Kicked),
            4 => Ok(ErrorCode::ServerError),
            other => Err(ProtocolError::UnknownErrorCode(other)),
        }
    }
}

/// Raw control input as sent by the client (5-byte body).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InputMessage {
    pub sequence: u8,
    pub keys: u8,
    /// -127..=127 mapped onto -1.0..=1.0
    pub steering: i8,
    pub throttle: i8,
    pub flags: u8,
}

impl InputMessage {
    /// Decodes the compressed analog axes into the integrator's control state.
    pub fn to_control(&self) -> ControlInput {
        ControlInput {
            sequence: self.sequence,
            keys: self.keys,
            steering: f64::from(self.steering) / ANALOG_SCALE,
            throttle: f64::from(self.throttle) / ANALOG_SCALE,
            flags: self.flags,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRoom {
    pub name: String,
    pub color: u8,
}

impl JoinRoom {
    /// Trimmed display name, defaulted when blank and capped at `MAX_NAME_LEN` characters.
    pub fn sanitized_name(&self) -> String {
        let trimmed = self.name.trim();
        if trimmed.is_empty() {
            return "Player".to_string();
        }
        trimmed.chars().take(MAX_NAME_LEN).collect()
    }
}

/// Messages sent by clients.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Input(InputMessage),
    JoinRoom(JoinRoom),
    LeaveRoom,
    Ping { timestamp: u64 },
}

impl ClientMessage {
    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        let mut reader = Reader::new(data)?;
        let kind = reader.kind;
        match kind {
            MSG_INPUT => Ok(ClientMessage::Input(
                reader.record::<InputMessage>(INPUT_BODY_SIZE)?,
            )),
            MSG_JOIN_ROOM => {
                let name = reader.string()?;
                let color = reader.u8()?;
                Ok(ClientMessage::JoinRoom(JoinRoom { name, color }))
            }
            MSG_LEAVE_ROOM => Ok(ClientMessage::LeaveRoom),
            MSG_PING => Ok(ClientMessage::Ping {
                timestamp: reader.u64()?,
            }),
            other => Err(ProtocolError::UnknownType(other)),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut buf = Vec::with_capacity(16);
        match self {
            ClientMessage::Input(input) => {
                buf.push(MSG_INPUT);
                bincode::serialize_into(&mut buf, input)?;
            }
            ClientMessage::JoinRoom(join) => {
                buf.push(MSG_JOIN_ROOM);
                write_string(&mut buf, &join.name);
                buf.push(join.color);
            }
            ClientMessage::LeaveRoom => buf.push(MSG_LEAVE_ROOM),
            ClientMessage::Ping { timestamp } => {
                buf.push(MSG_PING);
                buf.extend_from_slice(&timestamp.to_le_bytes());
            }
        }
        Ok(buf)
    }
}

/// One car inside a StateUpdate (16 bytes on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PlayerStateData {
    pub id: u16,
    /// x scaled by 10
    pub x: i16,
    pub y: i32,
    /// speed scaled by 10
    pub speed: i16,
    pub angle: i8,
    /// 24-bit little-endian rating
    pub rating: [u8; 3],
    pub flags: u8,
    pub color: u8,
}

impl PlayerStateData {
    /// Quantizes a car for the wire. Float-to-int casts saturate, so
    /// out-of-range values clamp to the field's limits.
    pub fn from_car(id: u16, car: &CarState, color: u8) -> Self {
        let rating = (car.rating as u32).min(MAX_RATING).to_le_bytes();
        let flags = if car.exploded { FLAG_EXPLODED } else { 0 };

        Self {
            id,
            x: (car.x * POSITION_SCALE).round() as i16,
            y: car.y as i32,
            speed: (car.speed * POSITION_SCALE).round() as i16,
            angle: (car.angle * ANGLE_SCALE).round().clamp(-127.0, 127.0) as i8,
            rating: [rating[0], rating[1], rating[2]],
            flags,
            color,
        }
    }

    pub fn x(&self) -> f64 {
        f64::from(self.x) / POSITION_SCALE
    }

    pub fn speed(&self) -> f64 {
        f64::from(self.speed) / POSITION_SCALE
    }

    pub fn angle_degrees(&self) -> f64 {
        f64::from(self.angle) / ANGLE_SCALE
    }

    pub fn rating(&self) -> u32 {
        u32::from_le_bytes([self.rating[0], self.rating[1], self.rating[2], 0])
    }

    pub fn exploded(&self) -> bool {
        self.flags & FLAG_EXPLODED != 0
    }
}

/// Messages sent by the server.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    StateUpdate {
        tick: u16,
        players: Vec<PlayerStateData>,
    },
    PlayerJoin {
        id: u16,
        name: String,
        color: u8,
    },
    PlayerLeave {
        id: u16,
    },
    PlayerDeath {
        id: u16,
    },
    RoomInfo {
        room_id: String,
        player_count: u8,
        max_players: u8,
        your_id: u16,
    },
    Pong {
        timestamp: u64,
    },
    Error {
        code: ErrorCode,
        message: String,
    },
}

impl ServerMessage {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            code,
            message: message.into(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut buf;
        match self {
            ServerMessage::StateUpdate { tick, players } => {
                let count = players.len().min(MAX_RECORDS);
                buf = Vec::with_capacity(4 + count * PLAYER_RECORD_SIZE);
                buf.push(MSG_STATE_UPDATE);
                buf.extend_from_slice(&tick.to_le_bytes());
                buf.push(count as u8);
                for player in &players[..count] {
                    bincode::serialize_into(&mut buf, player)?;
                }
            }
            ServerMessage::PlayerJoin { id, name, color } => {
                buf = Vec::with_capacity(5 + name.len());
                buf.push(MSG_PLAYER_JOIN);
                buf.extend_from_slice(&id.to_le_bytes());
                write_string(&mut buf, name);
                buf.push(*color);
            }
            ServerMessage::PlayerLeave { id } => {
                buf = vec![MSG_PLAYER_LEAVE];
                buf.extend_from_slice(&id.to_le_bytes());
            }
            ServerMessage::PlayerDeath { id } => {
                buf = vec![MSG_PLAYER_DEATH];
                buf.extend_from_slice(&id.to_le_bytes());
            }
            ServerMessage::RoomInfo {
                room_id,
                player_count,
                max_players,
                your_id,
            } => {
                buf = Vec::with_capacity(6 + room_id.len());
                buf.push(MSG_ROOM_INFO);
                write_string(&mut buf, room_id);
                buf.push(*player_count);
                buf.push(*max_players);
                buf.extend_from_slice(&your_id.to_le_bytes());
            }
            ServerMessage::Pong { timestamp } => {
                buf = Vec::with_capacity(9);
                buf.push(MSG_PONG);
                buf.extend_from_slice(&timestamp.to_le_bytes());
            }
            ServerMessage::Error { code, message } => {
                buf = Vec::with_capacity(3 + message.len());
                buf.push(MSG_ERROR);
                buf.push(*code as u8);
                write_string(&mut buf, message);
            }
        }
        Ok(buf)
    }

    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        let mut reader = Reader::new(data)?;
        let kind = reader.kind;
        match kind {
            MSG_STATE_UPDATE => {
                let tick = reader.u16()?;
                let count = reader.u8()? as usize;
                let mut players = Vec::with_capacity(count);
                for _ in 0..count {
                    players.push(reader.record::<PlayerStateData>(PLAYER_RECORD_SIZE)?);
                }
                Ok(ServerMessage::StateUpdate { tick, players })
            }
            MSG_PLAYER_JOIN => {
                let id = reader.u16()?;
                let name = reader.string()?;
                let color = reader.u8()?;
                Ok(ServerMessage::PlayerJoin { id, name, color })
            }
            MSG_PLAYER_LEAVE => Ok(ServerMessage::PlayerLeave { id: reader.u16()? }),
            MSG_PLAYER_DEATH => Ok(ServerMessage::PlayerDeath { id: reader.u16()? }),
            MSG_ROOM_INFO => {
                let room_id = reader.string()?;
                let player_count = reader.u8()?;
                let max_players = reader.u8()?;
                let your_id = reader.u16()?;
                Ok(ServerMessage::RoomInfo {
                    room_id,
                    player_count,
                    max_players,
                    your_id,
                })
            }
            MSG_PONG => Ok(ServerMessage::Pong {
                timestamp: reader.u64()?,
            }),
            MSG_ERROR => {
                let code = ErrorCode::try_from(reader.u8()?)?;
                let message = reader.string()?;
                Ok(ServerMessage::Error { code, message })
            }
            other => Err(ProtocolError::UnknownType(other)),
        }
    }
}

/// Appends a length-prefixed string, cut at the last char boundary within 255 bytes.
fn write_string(buf: &mut Vec<u8>, value: &str) {
    let mut end = value.len().min(MAX_STRING_LEN);
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    buf.push(end as u8);
    buf.extend_from_slice(&value.as_bytes()[..end]);
}

/// Bounds-checked cursor over a message after its type tag.
struct Reader<'a> {
    kind: u8,
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Result<Self, ProtocolError> {
        let kind = *data.first().ok_or(ProtocolError::Empty)?;
        Ok(Self { kind, data, pos: 1 })
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], ProtocolError> {
        let end = self.pos + len;
        if end > self.data.len() {
            return Err(ProtocolError::TooShort {
                kind: self.kind,
                needed: end,
                got: self.data.len(),
            });
        }
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, ProtocolError> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn u64(&mut self) -> Result<u64, ProtocolError> {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(bytes))
    }

    fn string(&mut self) -> Result<String, ProtocolError> {
        let len = self.u8()? as usize;
        Ok(String::from_utf8_lossy(self.take(len)?).into_owned())
    }

    fn record<T: DeserializeOwned>(&mut self, size: usize) -> Result<T, ProtocolError> {
        Ok(bincode::deserialize(self.take(size)?)?)
    }
}
