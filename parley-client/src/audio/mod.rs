//! Duplex audio pipeline
//!
//! Capture (microphone → transport) and playback (per-peer queue → device)
//! run on dedicated OS threads against the [`device::AudioBackend`]
//! abstraction. Hardware completion is a short blocking poll, not an OS
//! wait primitive; see [`device::DEVICE_POLL_INTERVAL`].

pub mod capture;
pub mod device;
pub mod level;
pub mod playback;
pub mod ptt;
pub mod slots;
