//! Control-channel message types and codecs
//!
//! The TCP control channel carries framed binary messages: a 1-byte type
//! discriminator followed by a payload. Most payloads are themselves
//! `[2-byte LE length][data]`; the exceptions are `Ping` (name-led) and
//! `Keepalive` (empty). Name fields are single-byte length-prefixed UTF-8,
//! at most [`MAX_NAME_LEN`](crate::MAX_NAME_LEN) bytes. Chat text is
//! UTF-16LE code units.
//!
//! The handshake happens before framed messages start flowing:
//!
//! ```text
//! client -> server   [ver len (1)][version][name len (1)][nickname]
//! server -> client   [reply code (1)] then, per code:
//!   Welcome          [2-byte LE block len][online count (4, LE)]
//!                    [{name len (1)}{name}] * count
//!   VersionMismatch  [ver len (1)][server version]
//!   NameTaken        (nothing)
//!   ServerFull       (nothing)
//! ```

use crate::text::{self, TextError};
use crate::{MAX_NAME_LEN, NameError, PROTOCOL_VERSION, validate_name};

// =============================================================================
// Errors
// =============================================================================

/// Error decoding or encoding a control-channel message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Payload ended before the advertised field lengths were satisfied
    Truncated,
    /// A name field failed validation
    Name(NameError),
    /// A text payload failed UTF-16 validation or exceeded the cap
    Text(TextError),
    /// Unknown message type discriminator
    UnknownType(u8),
    /// Unknown handshake reply code
    UnknownReply(u8),
    /// A length field exceeds the protocol's limits
    BadLength(usize),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolError::Truncated => write!(f, "message payload is truncated"),
            ProtocolError::Name(e) => write!(f, "invalid name field: {}", e),
            ProtocolError::Text(e) => write!(f, "invalid text payload: {}", e),
            ProtocolError::UnknownType(b) => write!(f, "unknown message type 0x{:02X}", b),
            ProtocolError::UnknownReply(b) => write!(f, "unknown handshake reply 0x{:02X}", b),
            ProtocolError::BadLength(n) => write!(f, "length field {} out of range", n),
        }
    }
}

impl From<NameError> for ProtocolError {
    fn from(e: NameError) -> Self {
        ProtocolError::Name(e)
    }
}

impl From<TextError> for ProtocolError {
    fn from(e: TextError) -> Self {
        ProtocolError::Text(e)
    }
}

// =============================================================================
// Message Types
// =============================================================================

/// Message types on the control channel
///
/// Uses a single byte for type identification. Values 0x0_ flow
/// server → client, 0x1_ client → server; `Keepalive` flows both ways
/// (the client echoes the probe byte back unchanged).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ControlMessageType {
    /// A user joined the server (updated count + name)
    UserJoined = 0x01,
    /// A user left the server (updated count + name)
    UserLeft = 0x02,
    /// Chat line (UTF-16 text with a time prefix)
    Chat = 0x03,
    /// Round-trip measurement for a user
    Ping = 0x04,
    /// Liveness probe; must be echoed back promptly
    Keepalive = 0x05,
    /// A user moved to a room
    RoomMoved = 0x06,
    /// Room entry rejected (wrong or missing password)
    RoomDenied = 0x07,
    /// A room was created
    RoomCreated = 0x08,
    /// A room was deleted
    RoomDeleted = 0x09,
    /// A room was renamed
    RoomRenamed = 0x0A,
    /// Chat line sent by the client (UTF-16 text)
    ChatSend = 0x10,
    /// Request to enter a room
    EnterRoom = 0x11,
    /// Request to enter a password-protected room
    EnterRoomPassword = 0x12,
}

impl ControlMessageType {
    /// Convert from byte value
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(ControlMessageType::UserJoined),
            0x02 => Some(ControlMessageType::UserLeft),
            0x03 => Some(ControlMessageType::Chat),
            0x04 => Some(ControlMessageType::Ping),
            0x05 => Some(ControlMessageType::Keepalive),
            0x06 => Some(ControlMessageType::RoomMoved),
            0x07 => Some(ControlMessageType::RoomDenied),
            0x08 => Some(ControlMessageType::RoomCreated),
            0x09 => Some(ControlMessageType::RoomDeleted),
            0x0A => Some(ControlMessageType::RoomRenamed),
            0x10 => Some(ControlMessageType::ChatSend),
            0x11 => Some(ControlMessageType::EnterRoom),
            0x12 => Some(ControlMessageType::EnterRoomPassword),
            _ => None,
        }
    }

    /// Convert to byte value
    pub fn to_byte(self) -> u8 {
        self as u8
    }

    /// Whether this message's payload carries a 2-byte LE length prefix
    ///
    /// `Ping` is name-led and `Keepalive` has no payload; everything else
    /// is length-prefixed.
    pub fn is_length_prefixed(self) -> bool {
        !matches!(
            self,
            ControlMessageType::Ping | ControlMessageType::Keepalive
        )
    }
}

/// Handshake reply codes, sent as a single byte before framed traffic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HandshakeReplyCode {
    /// Connection accepted; roster block follows
    Welcome = 0x20,
    /// The requested nickname is already connected
    NameTaken = 0x21,
    /// The server is at capacity
    ServerFull = 0x22,
    /// Protocol version mismatch; server's version string follows
    VersionMismatch = 0x23,
}

impl HandshakeReplyCode {
    /// Convert from byte value
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x20 => Some(HandshakeReplyCode::Welcome),
            0x21 => Some(HandshakeReplyCode::NameTaken),
            0x22 => Some(HandshakeReplyCode::ServerFull),
            0x23 => Some(HandshakeReplyCode::VersionMismatch),
            _ => None,
        }
    }

    /// Convert to byte value
    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

// =============================================================================
// Field Helpers
// =============================================================================

/// Cursor over a payload slab for field-by-field decoding
struct Fields<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Fields<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ProtocolError> {
        if self.buf.len() - self.pos < n {
            return Err(ProtocolError::Truncated);
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.take(1)?[0])
    }

    fn u16_le(&mut self) -> Result<u16, ProtocolError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32_le(&mut self) -> Result<u32, ProtocolError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read a single-byte length-prefixed name
    fn name(&mut self) -> Result<String, ProtocolError> {
        let len = self.u8()? as usize;
        if len > MAX_NAME_LEN {
            return Err(ProtocolError::BadLength(len));
        }
        let bytes = self.take(len)?;
        let name = std::str::from_utf8(bytes)
            .map_err(|_| ProtocolError::Name(NameError::InvalidCharacters))?;
        validate_name(name)?;
        Ok(name.to_string())
    }

    fn finish(self) -> Result<(), ProtocolError> {
        if self.pos == self.buf.len() {
            Ok(())
        } else {
            Err(ProtocolError::BadLength(self.buf.len() - self.pos))
        }
    }
}

/// Append a single-byte length-prefixed name, validating it first
fn put_name(buf: &mut Vec<u8>, name: &str) -> Result<(), ProtocolError> {
    validate_name(name)?;
    buf.push(name.len() as u8);
    buf.extend_from_slice(name.as_bytes());
    Ok(())
}

// =============================================================================
// Handshake
// =============================================================================

/// Client handshake request, the first bytes on a new control connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
    /// Protocol version string
    pub version: String,
    /// Requested nickname
    pub nickname: String,
}

impl HandshakeRequest {
    /// Build a request advertising the current protocol version
    pub fn current(nickname: &str) -> Self {
        Self {
            version: PROTOCOL_VERSION.to_string(),
            nickname: nickname.to_string(),
        }
    }

    /// Serialize to wire bytes
    ///
    /// # Errors
    ///
    /// Returns an error if the nickname fails validation or the version
    /// string does not fit a single-byte length.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        if self.version.is_empty() || self.version.len() > u8::MAX as usize {
            return Err(ProtocolError::BadLength(self.version.len()));
        }
        let mut bytes = Vec::with_capacity(2 + self.version.len() + self.nickname.len());
        bytes.push(self.version.len() as u8);
        bytes.extend_from_slice(self.version.as_bytes());
        put_name(&mut bytes, &self.nickname)?;
        Ok(bytes)
    }

    /// Deserialize from wire bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let mut fields = Fields::new(bytes);
        let vlen = fields.u8()? as usize;
        let version = std::str::from_utf8(fields.take(vlen)?)
            .map_err(|_| ProtocolError::Name(NameError::InvalidCharacters))?
            .to_string();
        let nickname = fields.name()?;
        fields.finish()?;
        Ok(Self { version, nickname })
    }
}

/// Server handshake reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeReply {
    /// Accepted; the roster of currently connected users follows
    Welcome(RosterBlock),
    /// Nickname already in use
    NameTaken,
    /// Server at capacity
    ServerFull,
    /// Version rejected; carries the server's version string
    VersionMismatch {
        /// The version the server runs
        server_version: String,
    },
}

impl HandshakeReply {
    /// Serialize to wire bytes (used by test servers)
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            HandshakeReply::Welcome(roster) => {
                let block = roster.to_bytes();
                let mut bytes = Vec::with_capacity(3 + block.len());
                bytes.push(HandshakeReplyCode::Welcome.to_byte());
                bytes.extend_from_slice(&(block.len() as u16).to_le_bytes());
                bytes.extend_from_slice(&block);
                bytes
            }
            HandshakeReply::NameTaken => vec![HandshakeReplyCode::NameTaken.to_byte()],
            HandshakeReply::ServerFull => vec![HandshakeReplyCode::ServerFull.to_byte()],
            HandshakeReply::VersionMismatch { server_version } => {
                let mut bytes = Vec::with_capacity(2 + server_version.len());
                bytes.push(HandshakeReplyCode::VersionMismatch.to_byte());
                bytes.push(server_version.len() as u8);
                bytes.extend_from_slice(server_version.as_bytes());
                bytes
            }
        }
    }
}

/// Roster block carried by a `Welcome` reply
///
/// Wire format (inside the 2-byte block length):
///
/// ```text
/// +-------------------+----------------+----------------+-----+
/// | online count (4)  | name len (1)   |  name (var)    | ... |
/// +-------------------+----------------+----------------+-----+
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterBlock {
    /// Online user count as reported by the server
    pub online_count: u32,
    /// Names of currently connected users, in server order
    pub names: Vec<String>,
}

impl RosterBlock {
    /// Serialize the block body (without the outer 2-byte length)
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&self.online_count.to_le_bytes());
        for name in &self.names {
            // Roster names come from the server; skip any it mangled
            if put_name(&mut bytes, name).is_err() {
                continue;
            }
        }
        bytes
    }

    /// Deserialize the block body
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let mut fields = Fields::new(bytes);
        let online_count = fields.u32_le()?;
        let mut names = Vec::new();
        while fields.pos < bytes.len() {
            names.push(fields.name()?);
        }
        Ok(Self {
            online_count,
            names,
        })
    }
}

// =============================================================================
// Payloads
// =============================================================================

/// Payload of `UserJoined` / `UserLeft`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserEvent {
    /// Updated online count
    pub online_count: u32,
    /// The user who joined or left
    pub name: String,
}

impl UserEvent {
    /// Serialize the payload body
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut bytes = Vec::with_capacity(5 + self.name.len());
        bytes.extend_from_slice(&self.online_count.to_le_bytes());
        put_name(&mut bytes, &self.name)?;
        Ok(bytes)
    }

    /// Deserialize the payload body
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let mut fields = Fields::new(bytes);
        let online_count = fields.u32_le()?;
        let name = fields.name()?;
        fields.finish()?;
        Ok(Self { online_count, name })
    }
}

/// Payload of `Ping`: `[name len (1)][name][rtt ms (4, LE)]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingUpdate {
    /// The user the measurement is for
    pub name: String,
    /// Round-trip time in milliseconds
    pub rtt_ms: u32,
}

impl PingUpdate {
    /// Serialize the payload body
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut bytes = Vec::with_capacity(5 + self.name.len());
        put_name(&mut bytes, &self.name)?;
        bytes.extend_from_slice(&self.rtt_ms.to_le_bytes());
        Ok(bytes)
    }

    /// Deserialize the payload body
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let mut fields = Fields::new(bytes);
        let name = fields.name()?;
        let rtt_ms = fields.u32_le()?;
        fields.finish()?;
        Ok(Self { name, rtt_ms })
    }
}

/// Payload of `RoomMoved`: a user relocated to a room
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomMove {
    /// The user who moved
    pub user: String,
    /// The destination room
    pub room: String,
}

impl RoomMove {
    /// Serialize the payload body
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut bytes = Vec::new();
        put_name(&mut bytes, &self.user)?;
        put_name(&mut bytes, &self.room)?;
        Ok(bytes)
    }

    /// Deserialize the payload body
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let mut fields = Fields::new(bytes);
        let user = fields.name()?;
        let room = fields.name()?;
        fields.finish()?;
        Ok(Self { user, room })
    }
}

/// Payload of `RoomCreated`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomInfo {
    /// Room name
    pub name: String,
    /// Whether entry requires a password
    pub has_password: bool,
    /// Maximum member count, 0 for unlimited
    pub max_users: u16,
}

impl RoomInfo {
    /// Serialize the payload body
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut bytes = Vec::new();
        put_name(&mut bytes, &self.name)?;
        bytes.push(u8::from(self.has_password));
        bytes.extend_from_slice(&self.max_users.to_le_bytes());
        Ok(bytes)
    }

    /// Deserialize the payload body
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let mut fields = Fields::new(bytes);
        let name = fields.name()?;
        let has_password = fields.u8()? != 0;
        let max_users = fields.u16_le()?;
        fields.finish()?;
        Ok(Self {
            name,
            has_password,
            max_users,
        })
    }
}

/// Payload of `RoomRenamed`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomRename {
    /// Previous room name
    pub old: String,
    /// New room name
    pub new: String,
}

impl RoomRename {
    /// Serialize the payload body
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut bytes = Vec::new();
        put_name(&mut bytes, &self.old)?;
        put_name(&mut bytes, &self.new)?;
        Ok(bytes)
    }

    /// Deserialize the payload body
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let mut fields = Fields::new(bytes);
        let old = fields.name()?;
        let new = fields.name()?;
        fields.finish()?;
        Ok(Self { old, new })
    }
}

// =============================================================================
// Messages
// =============================================================================

/// A message received from the server on the control channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    /// A user joined the server
    UserJoined(UserEvent),
    /// A user left the server
    UserLeft(UserEvent),
    /// Chat line; text still carries its time prefix
    Chat(String),
    /// Round-trip measurement for a user
    Ping(PingUpdate),
    /// Liveness probe to be echoed back
    Keepalive,
    /// A user moved to a room
    RoomMoved(RoomMove),
    /// Room entry was rejected; the client should prompt for a password
    RoomDenied {
        /// The room that rejected the request
        room: String,
    },
    /// A room was created
    RoomCreated(RoomInfo),
    /// A room was deleted
    RoomDeleted {
        /// The deleted room
        room: String,
    },
    /// A room was renamed
    RoomRenamed(RoomRename),
}

impl ServerMessage {
    /// Decode a server message from its type and payload body
    ///
    /// For length-prefixed messages `payload` is the body inside the
    /// 2-byte prefix; for `Ping` it is the reassembled name-led payload.
    pub fn decode(kind: ControlMessageType, payload: &[u8]) -> Result<Self, ProtocolError> {
        match kind {
            ControlMessageType::UserJoined => {
                Ok(ServerMessage::UserJoined(UserEvent::from_bytes(payload)?))
            }
            ControlMessageType::UserLeft => {
                Ok(ServerMessage::UserLeft(UserEvent::from_bytes(payload)?))
            }
            ControlMessageType::Chat => Ok(ServerMessage::Chat(text::decode_utf16(payload)?)),
            ControlMessageType::Ping => Ok(ServerMessage::Ping(PingUpdate::from_bytes(payload)?)),
            ControlMessageType::Keepalive => Ok(ServerMessage::Keepalive),
            ControlMessageType::RoomMoved => {
                Ok(ServerMessage::RoomMoved(RoomMove::from_bytes(payload)?))
            }
            ControlMessageType::RoomDenied => {
                let mut fields = Fields::new(payload);
                let room = fields.name()?;
                fields.finish()?;
                Ok(ServerMessage::RoomDenied { room })
            }
            ControlMessageType::RoomCreated => {
                Ok(ServerMessage::RoomCreated(RoomInfo::from_bytes(payload)?))
            }
            ControlMessageType::RoomDeleted => {
                let mut fields = Fields::new(payload);
                let room = fields.name()?;
                fields.finish()?;
                Ok(ServerMessage::RoomDeleted { room })
            }
            ControlMessageType::RoomRenamed => {
                Ok(ServerMessage::RoomRenamed(RoomRename::from_bytes(payload)?))
            }
            ControlMessageType::ChatSend
            | ControlMessageType::EnterRoom
            | ControlMessageType::EnterRoomPassword => {
                Err(ProtocolError::UnknownType(kind.to_byte()))
            }
        }
    }

    /// Encode to full wire bytes, type byte included (used by test servers)
    pub fn to_wire(&self) -> Result<Vec<u8>, ProtocolError> {
        let (kind, body) = match self {
            ServerMessage::UserJoined(ev) => (ControlMessageType::UserJoined, ev.to_bytes()?),
            ServerMessage::UserLeft(ev) => (ControlMessageType::UserLeft, ev.to_bytes()?),
            ServerMessage::Chat(chat) => (ControlMessageType::Chat, text::encode_utf16(chat)?),
            ServerMessage::Ping(ping) => (ControlMessageType::Ping, ping.to_bytes()?),
            ServerMessage::Keepalive => (ControlMessageType::Keepalive, Vec::new()),
            ServerMessage::RoomMoved(mv) => (ControlMessageType::RoomMoved, mv.to_bytes()?),
            ServerMessage::RoomDenied { room } => {
                let mut body = Vec::new();
                put_name(&mut body, room)?;
                (ControlMessageType::RoomDenied, body)
            }
            ServerMessage::RoomCreated(info) => (ControlMessageType::RoomCreated, info.to_bytes()?),
            ServerMessage::RoomDeleted { room } => {
                let mut body = Vec::new();
                put_name(&mut body, room)?;
                (ControlMessageType::RoomDeleted, body)
            }
            ServerMessage::RoomRenamed(rn) => (ControlMessageType::RoomRenamed, rn.to_bytes()?),
        };
        Ok(frame(kind, &body))
    }
}

/// A message sent by the client on the control channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// Chat line
    Chat(String),
    /// Request to enter a room, optionally with a password
    EnterRoom {
        /// Target room name
        room: String,
        /// Password, when the room requires one
        password: Option<String>,
    },
    /// Echo of a server keepalive probe
    Keepalive,
}

impl ClientMessage {
    /// Encode to full wire bytes, type byte included
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::Text(TextError::TooLong)` when a chat
    /// message exceeds the UTF-16 cap; this is the local pre-I/O check.
    pub fn to_wire(&self) -> Result<Vec<u8>, ProtocolError> {
        match self {
            ClientMessage::Chat(chat) => {
                let body = text::encode_utf16(chat)?;
                Ok(frame(ControlMessageType::ChatSend, &body))
            }
            ClientMessage::EnterRoom { room, password } => {
                let mut body = Vec::new();
                put_name(&mut body, room)?;
                let kind = match password {
                    Some(pass) => {
                        if pass.is_empty() || pass.len() > u8::MAX as usize {
                            return Err(ProtocolError::BadLength(pass.len()));
                        }
                        body.push(pass.len() as u8);
                        body.extend_from_slice(pass.as_bytes());
                        ControlMessageType::EnterRoomPassword
                    }
                    None => ControlMessageType::EnterRoom,
                };
                Ok(frame(kind, &body))
            }
            ClientMessage::Keepalive => Ok(vec![ControlMessageType::Keepalive.to_byte()]),
        }
    }
}

impl ClientMessage {
    /// Decode a client message from its type and payload body
    pub fn decode(kind: ControlMessageType, payload: &[u8]) -> Result<Self, ProtocolError> {
        match kind {
            ControlMessageType::ChatSend => Ok(ClientMessage::Chat(text::decode_utf16(payload)?)),
            ControlMessageType::EnterRoom => {
                let mut fields = Fields::new(payload);
                let room = fields.name()?;
                fields.finish()?;
                Ok(ClientMessage::EnterRoom {
                    room,
                    password: None,
                })
            }
            ControlMessageType::EnterRoomPassword => {
                let mut fields = Fields::new(payload);
                let room = fields.name()?;
                let plen = fields.u8()? as usize;
                let password = std::str::from_utf8(fields.take(plen)?)
                    .map_err(|_| ProtocolError::Name(NameError::InvalidCharacters))?
                    .to_string();
                fields.finish()?;
                Ok(ClientMessage::EnterRoom {
                    room,
                    password: Some(password),
                })
            }
            ControlMessageType::Keepalive => Ok(ClientMessage::Keepalive),
            _ => Err(ProtocolError::UnknownType(kind.to_byte())),
        }
    }
}

/// Frame a payload body as `[type][2-byte LE length][body]`
fn frame(kind: ControlMessageType, body: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(3 + body.len());
    bytes.push(kind.to_byte());
    if kind.is_length_prefixed() {
        bytes.extend_from_slice(&(body.len() as u16).to_le_bytes());
    }
    bytes.extend_from_slice(body);
    bytes
}

// =============================================================================
// Tests
// =============================================================================
