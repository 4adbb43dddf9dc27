//! UTF-16 wire text helpers
//!
//! Chat payloads travel as UTF-16LE code units. Inbound chat lines carry a
//! time prefix ("HH:MM:...") that is split from the body at the second
//! colon.

use crate::MAX_CHAT_UTF16_UNITS;

/// Error decoding or validating wire text
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextError {
    /// Byte payload has an odd length and cannot hold UTF-16 code units
    OddLength,
    /// Code units do not form valid UTF-16 (unpaired surrogate)
    InvalidUtf16,
    /// Message exceeds the wire cap of [`MAX_CHAT_UTF16_UNITS`] code units
    TooLong(usize),
}

impl std::fmt::Display for TextError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TextError::OddLength => write!(f, "text payload has odd byte length"),
            TextError::InvalidUtf16 => write!(f, "text payload is not valid UTF-16"),
            TextError::TooLong(units) => write!(
                f,
                "message is {} UTF-16 units, limit is {}",
                units, MAX_CHAT_UTF16_UNITS
            ),
        }
    }
}

/// Number of UTF-16 code units a string occupies on the wire
pub fn utf16_len(text: &str) -> usize {
    text.encode_utf16().count()
}

/// Encode a string as UTF-16LE bytes
///
/// # Errors
///
/// Returns `TextError::TooLong` if the string exceeds the wire cap.
pub fn encode_utf16(text: &str) -> Result<Vec<u8>, TextError> {
    let units = utf16_len(text);
    if units > MAX_CHAT_UTF16_UNITS {
        return Err(TextError::TooLong(units));
    }
    let mut bytes = Vec::with_capacity(units * 2);
    for unit in text.encode_utf16() {
        bytes.extend_from_slice(&unit.to_le_bytes());
    }
    Ok(bytes)
}

/// Decode UTF-16LE bytes into a string
///
/// # Errors
///
/// Returns `TextError::OddLength` or `TextError::InvalidUtf16` for
/// malformed payloads.
pub fn decode_utf16(bytes: &[u8]) -> Result<String, TextError> {
    if bytes.len() % 2 != 0 {
        return Err(TextError::OddLength);
    }
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16(&units).map_err(|_| TextError::InvalidUtf16)
}

/// Split an inbound chat line into its time label and body
///
/// Server chat lines look like `12:34:alice: hello`; the label ends at the
/// second colon. Returns `None` when fewer than two colons are present,
/// in which case the whole line is the body.
pub fn split_time_prefix(line: &str) -> Option<(&str, &str)> {
    let first = line.find(':')?;
    let second_rel = line[first + 1..].find(':')?;
    let second = first + 1 + second_rel;
    Some((&line[..second], &line[second + 1..]))
}
