//! Presentation sink
//!
//! The core never renders anything itself. Everything user-visible goes
//! through this trait: the embedding application (GUI, TUI, or the bundled
//! CLI) implements it and decides how text, lists, and indicators appear.

/// The passive presentation surface the core reports into
///
/// Implementations must be cheap and non-blocking; calls arrive from
/// network tasks and audio threads.
pub trait PresentationSink: Send + Sync {
    /// Print system/status text
    fn status_text(&self, text: &str);

    /// Print a chat line, already split into its time label and body
    fn chat_line(&self, time_label: &str, body: &str);

    /// Replace the online-user list
    fn set_user_list(&self, names: &[String]);

    /// Clear the online-user list
    fn clear_user_list(&self);

    /// A room became available
    fn room_added(&self, room: &str);

    /// A room was removed
    fn room_removed(&self, room: &str);

    /// A room was renamed
    fn room_renamed(&self, old: &str, new: &str);

    /// Update a peer's round-trip indicator
    fn peer_ping(&self, name: &str, rtt_ms: u32);

    /// Update a peer's talking indicator
    fn peer_talking(&self, name: &str, talking: bool);

    /// Show a microphone level reading (peak dBFS; `-inf` for silence)
    fn mic_level(&self, level_dbfs: f32);

    /// Pop a modal notice
    fn notice(&self, text: &str);

    /// Ask the user for a room password; the answer comes back through
    /// a later `enter_room_with_password` call, not through this trait
    fn request_room_password(&self, room: &str);

    /// The session ended; disable interactive elements
    fn connection_closed(&self);
}

/// Sink that discards everything
///
/// Useful as a default and in tests that don't observe presentation.
pub struct NullSink;

impl PresentationSink for NullSink {
    fn status_text(&self, _text: &str) {}
    fn chat_line(&self, _time_label: &str, _body: &str) {}
    fn set_user_list(&self, _names: &[String]) {}
    fn clear_user_list(&self) {}
    fn room_added(&self, _room: &str) {}
    fn room_removed(&self, _room: &str) {}
    fn room_renamed(&self, _old: &str, _new: &str) {}
    fn peer_ping(&self, _name: &str, _rtt_ms: u32) {}
    fn peer_talking(&self, _name: &str, _talking: bool) {}
    fn mic_level(&self, _level_dbfs: f32) {}
    fn notice(&self, _text: &str) {}
    fn request_room_password(&self, _room: &str) {}
    fn connection_closed(&self) {}
}
