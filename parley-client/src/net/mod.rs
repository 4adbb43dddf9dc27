//! Two-channel session networking
//!
//! [`session`] is the reliable TCP control channel (handshake, roster,
//! chat, rooms, keepalive, teardown); [`voice`] is the unreliable UDP
//! channel moving raw PCM frames with no delivery guarantees.

pub mod session;
pub mod voice;
