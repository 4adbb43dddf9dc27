//! Parley client core
//!
//! The duplex audio pipeline (capture and per-peer playback) coupled to the
//! two-channel session protocol (TCP control/text, UDP voice). Presentation
//! and configuration live outside the core: the former behind
//! [`ui::PresentationSink`], the latter as the read-only
//! [`config::settings::Settings`] snapshot.

pub mod audio;
pub mod config;
pub mod net;
pub mod roster;
pub mod session;
pub mod ui;
