//! Protocol version helpers
//!
//! The handshake carries the protocol version as a string; the server is
//! the authority on compatibility. These helpers keep the client side
//! honest about what it advertises.

use semver::Version;

use crate::PROTOCOL_VERSION;

/// Parse the protocol version constant into a semver version
///
/// # Panics
///
/// Panics if [`PROTOCOL_VERSION`] is not valid semver, which is a
/// compile-time constant and covered by tests.
pub fn protocol_version() -> Version {
    Version::parse(PROTOCOL_VERSION).expect("PROTOCOL_VERSION is valid semver")
}

/// Check whether a server-reported version shares our major version
///
/// Used only for display decisions after a version-mismatch rejection;
/// the server has already made the call by the time this runs.
pub fn same_major(server_version: &str) -> bool {
    match Version::parse(server_version) {
        Ok(v) => v.major == protocol_version().major,
        Err(_) => false,
    }
}
