//! I/O utilities for the control channel
//!
//! This module is the interface between the protocol message types and the
//! wire: async helpers for the handshake exchange and for framed message
//! traffic. Reads return `Ok(None)` when the peer has cleanly half-closed
//! the connection, the signal both teardown paths key off of.

use std::io;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::MAX_NAME_LEN;
use crate::protocol::{
    ClientMessage, ControlMessageType, HandshakeReply, HandshakeReplyCode, HandshakeRequest,
    ProtocolError, RosterBlock, ServerMessage,
};

/// Upper bound on a framed control payload
///
/// Chat is capped at 550 UTF-16 units (1,100 bytes); everything else is
/// far smaller. Anything larger is a protocol violation, not real traffic.
pub const MAX_CONTROL_PAYLOAD: usize = 4096;

// =============================================================================
// Error Conversion
// =============================================================================

impl From<ProtocolError> for io::Error {
    fn from(err: ProtocolError) -> Self {
        io::Error::new(io::ErrorKind::InvalidData, err.to_string())
    }
}

// =============================================================================
// Handshake
// =============================================================================

/// Send the client handshake request
pub async fn write_handshake<W>(writer: &mut W, request: &HandshakeRequest) -> io::Result<()>
where
    W: AsyncWriteExt + Unpin,
{
    let bytes = request.to_bytes()?;
    writer.write_all(&bytes).await?;
    writer.flush().await
}

/// Read the server's handshake reply
///
/// Blocks until the single-byte reply code and any payload it announces
/// have arrived.
pub async fn read_handshake_reply<R>(reader: &mut R) -> io::Result<HandshakeReply>
where
    R: AsyncReadExt + Unpin,
{
    let code = reader.read_u8().await?;
    let Some(code) = HandshakeReplyCode::from_byte(code) else {
        return Err(ProtocolError::UnknownReply(code).into());
    };

    match code {
        HandshakeReplyCode::Welcome => {
            let len = reader.read_u16_le().await? as usize;
            if len > MAX_CONTROL_PAYLOAD {
                return Err(ProtocolError::BadLength(len).into());
            }
            let mut block = vec![0u8; len];
            reader.read_exact(&mut block).await?;
            Ok(HandshakeReply::Welcome(RosterBlock::from_bytes(&block)?))
        }
        HandshakeReplyCode::NameTaken => Ok(HandshakeReply::NameTaken),
        HandshakeReplyCode::ServerFull => Ok(HandshakeReply::ServerFull),
        HandshakeReplyCode::VersionMismatch => {
            let len = reader.read_u8().await? as usize;
            let mut version = vec![0u8; len];
            reader.read_exact(&mut version).await?;
            let server_version = String::from_utf8(version)
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "invalid version string"))?;
            Ok(HandshakeReply::VersionMismatch { server_version })
        }
    }
}

/// Read a client handshake request (server side of the exchange)
pub async fn read_handshake_request<R>(reader: &mut R) -> io::Result<HandshakeRequest>
where
    R: AsyncReadExt + Unpin,
{
    let vlen = reader.read_u8().await? as usize;
    let mut buf = vec![0u8; vlen];
    reader.read_exact(&mut buf).await?;
    let mut bytes = vec![vlen as u8];
    bytes.extend_from_slice(&buf);

    let nlen = reader.read_u8().await? as usize;
    if nlen > MAX_NAME_LEN {
        return Err(ProtocolError::BadLength(nlen).into());
    }
    let mut name = vec![0u8; nlen];
    reader.read_exact(&mut name).await?;
    bytes.push(nlen as u8);
    bytes.extend_from_slice(&name);

    Ok(HandshakeRequest::from_bytes(&bytes)?)
}

/// Send a handshake reply (server side of the exchange)
pub async fn write_handshake_reply<W>(writer: &mut W, reply: &HandshakeReply) -> io::Result<()>
where
    W: AsyncWriteExt + Unpin,
{
    writer.write_all(&reply.to_bytes()).await?;
    writer.flush().await
}

// =============================================================================
// Framed Messages
// =============================================================================

/// Read one server message from the control channel
///
/// Returns `Ok(None)` when the connection was cleanly half-closed by the
/// peer (a zero-length read before any message byte).
pub async fn read_server_message<R>(reader: &mut R) -> io::Result<Option<ServerMessage>>
where
    R: AsyncReadExt + Unpin,
{
    let Some(kind) = read_message_type(reader).await? else {
        return Ok(None);
    };
    let payload = read_payload(reader, kind).await?;
    Ok(Some(ServerMessage::decode(kind, &payload)?))
}

/// Read one client message from the control channel (server side)
///
/// Returns `Ok(None)` on a clean half-close.
pub async fn read_client_message<R>(reader: &mut R) -> io::Result<Option<ClientMessage>>
where
    R: AsyncReadExt + Unpin,
{
    let Some(kind) = read_message_type(reader).await? else {
        return Ok(None);
    };
    let payload = read_payload(reader, kind).await?;
    Ok(Some(ClientMessage::decode(kind, &payload)?))
}

/// Send a client message on the control channel
pub async fn write_client_message<W>(writer: &mut W, message: &ClientMessage) -> io::Result<()>
where
    W: AsyncWriteExt + Unpin,
{
    let bytes = message.to_wire()?;
    writer.write_all(&bytes).await?;
    writer.flush().await
}

/// Send a server message on the control channel (server side)
pub async fn write_server_message<W>(writer: &mut W, message: &ServerMessage) -> io::Result<()>
where
    W: AsyncWriteExt + Unpin,
{
    let bytes = message.to_wire()?;
    writer.write_all(&bytes).await?;
    writer.flush().await
}

/// Read the 1-byte type discriminator, detecting clean half-close
async fn read_message_type<R>(reader: &mut R) -> io::Result<Option<ControlMessageType>>
where
    R: AsyncReadExt + Unpin,
{
    let mut tag = [0u8; 1];
    // A zero-length read on the first byte is the peer's FIN, not an error
    let n = reader.read(&mut tag).await?;
    if n == 0 {
        return Ok(None);
    }
    match ControlMessageType::from_byte(tag[0]) {
        Some(kind) => Ok(Some(kind)),
        None => Err(ProtocolError::UnknownType(tag[0]).into()),
    }
}

/// Read a message payload according to its type's framing
async fn read_payload<R>(reader: &mut R, kind: ControlMessageType) -> io::Result<Vec<u8>>
where
    R: AsyncReadExt + Unpin,
{
    if kind.is_length_prefixed() {
        let len = reader.read_u16_le().await? as usize;
        if len > MAX_CONTROL_PAYLOAD {
            return Err(ProtocolError::BadLength(len).into());
        }
        let mut payload = vec![0u8; len];
        reader.read_exact(&mut payload).await?;
        return Ok(payload);
    }

    match kind {
        ControlMessageType::Keepalive => Ok(Vec::new()),
        ControlMessageType::Ping => {
            // Name-led: [name len (1)][name][rtt (4)]
            let nlen = reader.read_u8().await? as usize;
            if nlen > MAX_NAME_LEN {
                return Err(ProtocolError::BadLength(nlen).into());
            }
            let mut payload = vec![nlen as u8];
            let mut rest = vec![0u8; nlen + 4];
            reader.read_exact(&mut rest).await?;
            payload.extend_from_slice(&rest);
            Ok(payload)
        }
        // Every other type is length-prefixed and handled above
        _ => Err(ProtocolError::UnknownType(kind.to_byte()).into()),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{PingUpdate, UserEvent};
    use std::io::Cursor;

    #[tokio::test]
    async fn test_handshake_exchange_roundtrip() {
        let request = HandshakeRequest::current("alice");

        let mut buffer = Vec::new();
        write_handshake(&mut buffer, &request).await.unwrap();

        let mut cursor = Cursor::new(buffer);
        let received = read_handshake_request(&mut cursor).await.unwrap();
        assert_eq!(received, request);
    }

    #[tokio::test]
    async fn test_handshake_reply_welcome() {
        let reply = HandshakeReply::Welcome(RosterBlock {
            online_count: 2,
            names: vec!["alice".to_string(), "bob".to_string()],
        });

        let mut buffer = Vec::new();
        write_handshake_reply(&mut buffer, &reply).await.unwrap();

        let mut cursor = Cursor::new(buffer);
        let received = read_handshake_reply(&mut cursor).await.unwrap();
        assert_eq!(received, reply);
    }

    #[tokio::test]
    async fn test_handshake_reply_version_mismatch() {
        let reply = HandshakeReply::VersionMismatch {
            server_version: "3.0.0".to_string(),
        };

        let mut buffer = Vec::new();
        write_handshake_reply(&mut buffer, &reply).await.unwrap();

        let mut cursor = Cursor::new(buffer);
        match read_handshake_reply(&mut cursor).await.unwrap() {
            HandshakeReply::VersionMismatch { server_version } => {
                assert_eq!(server_version, "3.0.0");
            }
            other => panic!("expected version mismatch, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_handshake_reply_rejections() {
        for reply in [HandshakeReply::NameTaken, HandshakeReply::ServerFull] {
            let mut buffer = Vec::new();
            write_handshake_reply(&mut buffer, &reply).await.unwrap();
            let mut cursor = Cursor::new(buffer);
            assert_eq!(read_handshake_reply(&mut cursor).await.unwrap(), reply);
        }
    }

    #[tokio::test]
    async fn test_handshake_reply_unknown_code() {
        let mut cursor = Cursor::new(vec![0x7Fu8]);
        let err = read_handshake_reply(&mut cursor).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_server_message_roundtrip() {
        let messages = vec![
            ServerMessage::UserJoined(UserEvent {
                online_count: 4,
                name: "carol".to_string(),
            }),
            ServerMessage::Ping(PingUpdate {
                name: "carol".to_string(),
                rtt_ms: 120,
            }),
            ServerMessage::Keepalive,
            ServerMessage::Chat("12:34:carol: hi".to_string()),
        ];

        let mut buffer = Vec::new();
        for msg in &messages {
            write_server_message(&mut buffer, msg).await.unwrap();
        }

        let mut cursor = Cursor::new(buffer);
        for expected in &messages {
            let received = read_server_message(&mut cursor).await.unwrap().unwrap();
            assert_eq!(&received, expected);
        }

        // Exhausted stream reads as a clean close
        assert!(read_server_message(&mut cursor).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_client_message_roundtrip() {
        let messages = vec![
            ClientMessage::Chat("hello".to_string()),
            ClientMessage::EnterRoom {
                room: "lounge".to_string(),
                password: Some("pw".to_string()),
            },
            ClientMessage::Keepalive,
        ];

        let mut buffer = Vec::new();
        for msg in &messages {
            write_client_message(&mut buffer, msg).await.unwrap();
        }

        let mut cursor = Cursor::new(buffer);
        for expected in &messages {
            let received = read_client_message(&mut cursor).await.unwrap().unwrap();
            assert_eq!(&received, expected);
        }
    }

    #[tokio::test]
    async fn test_clean_close_is_none() {
        let mut cursor = Cursor::new(Vec::new());
        assert!(read_server_message(&mut cursor).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_type_is_error() {
        let mut cursor = Cursor::new(vec![0xEEu8]);
        let err = read_server_message(&mut cursor).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_oversized_payload_rejected() {
        let mut bytes = vec![ControlMessageType::Chat.to_byte()];
        bytes.extend_from_slice(&(MAX_CONTROL_PAYLOAD as u16 + 1).to_le_bytes());
        let mut cursor = Cursor::new(bytes);
        let err = read_server_message(&mut cursor).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_truncated_payload_is_error() {
        // Announces 10 bytes of chat but the stream ends after 2
        let mut bytes = vec![ControlMessageType::Chat.to_byte()];
        bytes.extend_from_slice(&10u16.to_le_bytes());
        bytes.extend_from_slice(&[0x41, 0x00]);
        let mut cursor = Cursor::new(bytes);
        assert!(read_server_message(&mut cursor).await.is_err());
    }
}
