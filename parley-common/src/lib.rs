//! Parley Common Library
//!
//! Shared wire-protocol types, codecs, and constants for the Parley
//! voice chat system.

pub mod io;
pub mod protocol;
pub mod text;
pub mod version;
pub mod voice;

/// Version string the client presents during the control-channel handshake
pub const PROTOCOL_VERSION: &str = "1.2.0";

/// Default port for Parley servers
///
/// TCP (control/text) and UDP (voice) share the same port number;
/// the OS routes by protocol.
pub const DEFAULT_PORT: u16 = 6740;

/// Default port as a string for form fields and display.
///
/// This is the string representation of [`DEFAULT_PORT`], provided as a
/// constant because Rust doesn't support const string formatting.
pub const DEFAULT_PORT_STR: &str = "6740";

/// Maximum length of a user or room name on the wire, in bytes
///
/// Name fields are single-byte length-prefixed, so this must stay below 256;
/// the protocol caps it much lower.
pub const MAX_NAME_LEN: usize = 20;

/// Maximum chat message length in UTF-16 code units
pub const MAX_CHAT_UTF16_UNITS: usize = 550;

/// Validation error for wire names (users and rooms)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameError {
    /// Name is empty
    Empty,
    /// Name exceeds [`MAX_NAME_LEN`] bytes
    TooLong,
    /// Name contains control or non-printable characters
    InvalidCharacters,
}

impl std::fmt::Display for NameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NameError::Empty => write!(f, "name is empty"),
            NameError::TooLong => write!(f, "name exceeds {} bytes", MAX_NAME_LEN),
            NameError::InvalidCharacters => write!(f, "name contains invalid characters"),
        }
    }
}

/// Validate a user or room name for the wire
///
/// Checks:
/// - Not empty
/// - At most [`MAX_NAME_LEN`] bytes (the wire length prefix counts bytes)
/// - No control characters or whitespace
///
/// # Errors
///
/// Returns a `NameError` variant describing the validation failure.
pub fn validate_name(name: &str) -> Result<(), NameError> {
    if name.is_empty() {
        return Err(NameError::Empty);
    }
    if name.len() > MAX_NAME_LEN {
        return Err(NameError::TooLong);
    }
    for ch in name.chars() {
        if ch.is_control() || ch.is_whitespace() {
            return Err(NameError::InvalidCharacters);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_version() {
        // Verify protocol version is valid semver
        let version = version::protocol_version();
        // Verify round-trip
        assert_eq!(version.to_string(), PROTOCOL_VERSION);
    }

    #[test]
    fn test_default_port_str_matches() {
        assert_eq!(DEFAULT_PORT_STR, DEFAULT_PORT.to_string());
    }

    #[test]
    fn test_max_name_fits_length_prefix() {
        // Names are single-byte length-prefixed on the wire
        assert!(MAX_NAME_LEN < 256);
    }

    #[test]
    fn test_valid_names() {
        assert!(validate_name("alice").is_ok());
        assert!(validate_name("Alice123").is_ok());
        assert!(validate_name("nick_name").is_ok());
        assert!(validate_name(&"a".repeat(MAX_NAME_LEN)).is_ok());
    }

    #[test]
    fn test_empty_name() {
        assert_eq!(validate_name(""), Err(NameError::Empty));
    }

    #[test]
    fn test_name_too_long() {
        assert_eq!(
            validate_name(&"a".repeat(MAX_NAME_LEN + 1)),
            Err(NameError::TooLong)
        );
        // Multi-byte characters count in bytes, not chars
        assert_eq!(validate_name(&"ü".repeat(11)), Err(NameError::TooLong));
    }

    #[test]
    fn test_name_invalid_characters() {
        assert_eq!(validate_name("nick name"), Err(NameError::InvalidCharacters));
        assert_eq!(validate_name("nick\tname"), Err(NameError::InvalidCharacters));
        assert_eq!(validate_name("nick\0name"), Err(NameError::InvalidCharacters));
        assert_eq!(validate_name("nick\nname"), Err(NameError::InvalidCharacters));
    }

    #[test]
    fn test_name_error_display() {
        assert_eq!(NameError::Empty.to_string(), "name is empty");
        assert!(NameError::TooLong.to_string().contains("20"));
    }
}
