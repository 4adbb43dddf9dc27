//! Voice datagram format for the UDP channel
//!
//! Voice travels as raw PCM: mono 16-bit little-endian at 16 kHz, one
//! 40 ms frame per datagram. A compression stage existed upstream of this
//! format historically but is disabled; the wire carries the samples as-is.
//!
//! Outbound (client → server) datagrams are tag-led:
//!
//! ```text
//! +----------+----------------------------------+
//! | tag (1)  | payload                          |
//! +----------+----------------------------------+
//!   0x00       ping probe (echoed back verbatim)
//!   0x01       end of utterance (no payload)
//!   0x02       one PCM frame follows (LE i16)
//!   0xFF       registration: [name len (1)][name]
//! ```
//!
//! Inbound (server → client) voice datagrams are sender-led; the server
//! strips the tag and prepends who is talking:
//!
//! ```text
//! +----------------+--------------+----------+------------------+
//! | sender len (1) | sender (var) | flag (1) | PCM if flag=0x02 |
//! +----------------+--------------+----------+------------------+
//! ```
//!
//! A leading zero byte cannot be a sender length, so inbound ping probes
//! are still recognized by their 0x00 tag.

use crate::protocol::ProtocolError;
use crate::{MAX_NAME_LEN, NameError, validate_name};

// =============================================================================
// Audio Constants
// =============================================================================

/// Sample rate for voice audio (16 kHz mono)
pub const VOICE_SAMPLE_RATE: u32 = 16_000;

/// Frame duration in milliseconds
pub const VOICE_FRAME_DURATION_MS: u32 = 40;

/// Number of samples per frame (640 at 16 kHz / 40 ms)
pub const VOICE_FRAME_SAMPLES: usize =
    (VOICE_SAMPLE_RATE * VOICE_FRAME_DURATION_MS / 1000) as usize;

/// Size of one PCM frame in bytes (i16 samples)
pub const VOICE_FRAME_BYTES: usize = VOICE_FRAME_SAMPLES * 2;

/// Number of audio channels (mono)
pub const VOICE_CHANNELS: u16 = 1;

/// Number of rotating capture slots
pub const CAPTURE_SLOTS: usize = 4;

/// Number of rotating playback slots per peer
pub const PLAYBACK_SLOTS: usize = 2;

/// Frames of hold applied once the voice-activation threshold is crossed
pub const VAD_HANGOVER_FRAMES: u32 = 4;

/// Maximum inbound voice datagram size
/// (sender prefix + flag + one PCM frame)
pub const MAX_VOICE_DATAGRAM: usize = 1 + MAX_NAME_LEN + 1 + VOICE_FRAME_BYTES;

// =============================================================================
// Tags
// =============================================================================

/// Tag byte leading every outbound voice datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum VoiceTag {
    /// Ping probe; must be echoed back to the server unchanged
    PingProbe = 0x00,
    /// End of utterance; no audio payload
    LastFrame = 0x01,
    /// One raw PCM frame follows
    AudioFrame = 0x02,
    /// Voice-channel registration (sent once after connect)
    Register = 0xFF,
}

impl VoiceTag {
    /// Convert from byte value
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(VoiceTag::PingProbe),
            0x01 => Some(VoiceTag::LastFrame),
            0x02 => Some(VoiceTag::AudioFrame),
            0xFF => Some(VoiceTag::Register),
            _ => None,
        }
    }

    /// Convert to byte value
    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

// =============================================================================
// Outbound Encoding
// =============================================================================

/// Encode the one-time voice-channel registration datagram
///
/// # Errors
///
/// Returns an error if the name fails wire validation.
pub fn encode_register(name: &str) -> Result<Vec<u8>, ProtocolError> {
    validate_name(name)?;
    let mut bytes = Vec::with_capacity(2 + name.len());
    bytes.push(VoiceTag::Register.to_byte());
    bytes.push(name.len() as u8);
    bytes.extend_from_slice(name.as_bytes());
    Ok(bytes)
}

/// Encode one outbound PCM frame
pub fn encode_frame(pcm: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(1 + pcm.len() * 2);
    bytes.push(VoiceTag::AudioFrame.to_byte());
    for sample in pcm {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    bytes
}

/// Encode the end-of-utterance marker
pub fn encode_last() -> [u8; 1] {
    [VoiceTag::LastFrame.to_byte()]
}

// =============================================================================
// Inbound Decoding
// =============================================================================

/// A decoded inbound voice datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundDatagram {
    /// Ping probe; echo the original datagram back unchanged
    PingProbe,
    /// Voice traffic from a peer
    Voice(InboundVoice),
}

/// Voice traffic from a single peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundVoice {
    /// Who is talking
    pub sender: String,
    /// Whether this closes the utterance (no PCM when set)
    pub last: bool,
    /// PCM samples, empty for end-of-utterance markers
    pub pcm: Vec<i16>,
}

/// Decode an inbound voice datagram
///
/// # Errors
///
/// Returns an error for empty, oversized, or structurally invalid
/// datagrams.
pub fn decode_inbound(bytes: &[u8]) -> Result<InboundDatagram, ProtocolError> {
    let Some(&first) = bytes.first() else {
        return Err(ProtocolError::Truncated);
    };
    if bytes.len() > MAX_VOICE_DATAGRAM {
        return Err(ProtocolError::BadLength(bytes.len()));
    }

    if first == VoiceTag::PingProbe.to_byte() {
        return Ok(InboundDatagram::PingProbe);
    }

    // Sender-led voice datagram: the first byte is the name length
    let sender_len = first as usize;
    if sender_len > MAX_NAME_LEN || bytes.len() < 1 + sender_len + 1 {
        return Err(ProtocolError::BadLength(sender_len));
    }
    let sender = std::str::from_utf8(&bytes[1..1 + sender_len])
        .map_err(|_| ProtocolError::Name(NameError::InvalidCharacters))?;
    validate_name(sender)?;

    let flag = bytes[1 + sender_len];
    let body = &bytes[1 + sender_len + 1..];
    match VoiceTag::from_byte(flag) {
        Some(VoiceTag::LastFrame) => Ok(InboundDatagram::Voice(InboundVoice {
            sender: sender.to_string(),
            last: true,
            pcm: Vec::new(),
        })),
        Some(VoiceTag::AudioFrame) => {
            if body.is_empty() || body.len() % 2 != 0 {
                return Err(ProtocolError::BadLength(body.len()));
            }
            let pcm = body
                .chunks_exact(2)
                .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
                .collect();
            Ok(InboundDatagram::Voice(InboundVoice {
                sender: sender.to_string(),
                last: false,
                pcm,
            }))
        }
        _ => Err(ProtocolError::UnknownType(flag)),
    }
}

/// Encode an inbound-format voice datagram (used by test servers)
pub fn encode_inbound(sender: &str, last: bool, pcm: &[i16]) -> Result<Vec<u8>, ProtocolError> {
    validate_name(sender)?;
    let mut bytes = Vec::with_capacity(2 + sender.len() + pcm.len() * 2);
    bytes.push(sender.len() as u8);
    bytes.extend_from_slice(sender.as_bytes());
    if last {
        bytes.push(VoiceTag::LastFrame.to_byte());
    } else {
        bytes.push(VoiceTag::AudioFrame.to_byte());
        for sample in pcm {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
    }
    Ok(bytes)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants() {
        // One frame sits comfortably under a typical MTU
        assert_eq!(VOICE_FRAME_SAMPLES, 640);
        assert_eq!(VOICE_FRAME_BYTES, 1280);
        assert!(1 + VOICE_FRAME_BYTES < 1400);
        // Frame duration inside the 35-46 ms window
        assert!((35..=46).contains(&VOICE_FRAME_DURATION_MS));
    }

    #[test]
    fn test_tag_roundtrip() {
        for byte in [0x00, 0x01, 0x02, 0xFF] {
            let tag = VoiceTag::from_byte(byte).expect("valid tag");
            assert_eq!(tag.to_byte(), byte);
        }
        assert!(VoiceTag::from_byte(0x03).is_none());
    }

    #[test]
    fn test_register_datagram() {
        let bytes = encode_register("alice").expect("encode");
        assert_eq!(bytes[0], 0xFF);
        assert_eq!(bytes[1] as usize, 5);
        assert_eq!(&bytes[2..], b"alice");
    }

    #[test]
    fn test_register_rejects_bad_name() {
        assert!(encode_register("").is_err());
        assert!(encode_register(&"a".repeat(MAX_NAME_LEN + 1)).is_err());
    }

    #[test]
    fn test_encode_frame() {
        let pcm = [0i16, 1, -1, i16::MAX, i16::MIN];
        let bytes = encode_frame(&pcm);
        assert_eq!(bytes[0], VoiceTag::AudioFrame.to_byte());
        assert_eq!(bytes.len(), 1 + pcm.len() * 2);
        assert_eq!(&bytes[1..3], &0i16.to_le_bytes());
        assert_eq!(&bytes[7..9], &i16::MAX.to_le_bytes());
    }

    #[test]
    fn test_encode_last_is_single_byte() {
        assert_eq!(encode_last(), [VoiceTag::LastFrame.to_byte()]);
    }

    #[test]
    fn test_inbound_ping_probe() {
        let datagram = [0u8, 0xDE, 0xAD];
        assert_eq!(
            decode_inbound(&datagram).expect("decode"),
            InboundDatagram::PingProbe
        );
    }

    #[test]
    fn test_inbound_voice_roundtrip() {
        let pcm: Vec<i16> = (0..8).map(|i| i * 100 - 400).collect();
        let bytes = encode_inbound("bob", false, &pcm).expect("encode");
        match decode_inbound(&bytes).expect("decode") {
            InboundDatagram::Voice(voice) => {
                assert_eq!(voice.sender, "bob");
                assert!(!voice.last);
                assert_eq!(voice.pcm, pcm);
            }
            other => panic!("expected voice, got {:?}", other),
        }
    }

    #[test]
    fn test_inbound_last_marker() {
        let bytes = encode_inbound("bob", true, &[]).expect("encode");
        match decode_inbound(&bytes).expect("decode") {
            InboundDatagram::Voice(voice) => {
                assert!(voice.last);
                assert!(voice.pcm.is_empty());
            }
            other => panic!("expected voice, got {:?}", other),
        }
    }

    #[test]
    fn test_inbound_empty() {
        assert_eq!(decode_inbound(&[]), Err(ProtocolError::Truncated));
    }

    #[test]
    fn test_inbound_oversized() {
        let bytes = vec![3u8; MAX_VOICE_DATAGRAM + 1];
        assert!(decode_inbound(&bytes).is_err());
    }

    #[test]
    fn test_inbound_truncated_sender() {
        // Claims a 10-byte sender but carries only 3 bytes total
        let bytes = [10u8, b'b', b'o'];
        assert!(decode_inbound(&bytes).is_err());
    }

    #[test]
    fn test_inbound_bad_flag() {
        let mut bytes = vec![3u8];
        bytes.extend_from_slice(b"bob");
        bytes.push(0x07);
        assert_eq!(decode_inbound(&bytes), Err(ProtocolError::UnknownType(0x07)));
    }

    #[test]
    fn test_inbound_odd_pcm_length() {
        let mut bytes = vec![3u8];
        bytes.extend_from_slice(b"bob");
        bytes.push(VoiceTag::AudioFrame.to_byte());
        bytes.extend_from_slice(&[1, 2, 3]);
        assert!(decode_inbound(&bytes).is_err());
    }
}
