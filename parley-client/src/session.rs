//! Session composition root
//!
//! One explicitly constructed object owns every subsystem: settings
//! snapshot, presentation sink, audio backend, roster, playback, capture,
//! and both network channels. Nothing lives in ambient globals; the
//! embedding application holds a [`ChatSession`] and passes it around.
//!
//! Teardown is one idempotent path shared by client-initiated disconnect
//! and a server-initiated close: stop capture, stop the voice channel,
//! clear every peer's queued audio and release the devices, empty the
//! roster, and tell the sink to go quiet.

use std::sync::Arc;
use std::sync::mpsc::sync_channel;

use tokio::sync::mpsc::UnboundedReceiver;

use crate::audio::capture::{CaptureConfig, CaptureEngine, OUTBOUND_QUEUE_FRAMES};
use crate::audio::device::AudioBackend;
use crate::audio::playback::PlaybackEngine;
use crate::audio::ptt::TalkKey;
use crate::config::Settings;
use crate::net::session::{ConnectError, ConnectionState, ControlEvent, NetworkSession, SendError};
use crate::net::voice::VoiceTransport;
use crate::roster::Roster;
use crate::ui::PresentationSink;

/// A chat session and everything it owns
pub struct ChatSession {
    settings: Settings,
    sink: Arc<dyn PresentationSink>,
    backend: Arc<dyn AudioBackend>,
    key: Arc<dyn TalkKey>,
    roster: Arc<Roster>,
    playback: Arc<PlaybackEngine>,
    capture: Option<CaptureEngine>,
    voice: Option<VoiceTransport>,
    network: Option<NetworkSession>,
}

impl ChatSession {
    /// Assemble a disconnected session from its collaborators
    pub fn new(
        settings: Settings,
        sink: Arc<dyn PresentationSink>,
        backend: Arc<dyn AudioBackend>,
        key: Arc<dyn TalkKey>,
    ) -> Self {
        let roster = Roster::new(backend.clone(), &settings.output_device);
        let playback = PlaybackEngine::new(
            roster.clone(),
            sink.clone(),
            settings.master_volume_factor(),
        );
        Self {
            settings,
            sink,
            backend,
            key,
            roster,
            playback,
            capture: None,
            voice: None,
            network: None,
        }
    }

    /// Connect text, then voice, then start capturing
    ///
    /// The text channel is required; a voice-channel or capture failure
    /// degrades the session to text-only and is reported through the
    /// sink, never returned as an error.
    ///
    /// # Errors
    ///
    /// Returns a [`ConnectError`] when the control channel cannot be
    /// established.
    pub async fn connect(&mut self) -> Result<UnboundedReceiver<ControlEvent>, ConnectError> {
        let (network, events) = NetworkSession::connect(
            &self.settings.server,
            self.settings.port,
            &self.settings.nickname,
            self.roster.clone(),
            self.sink.clone(),
        )
        .await?;
        self.network = Some(network);

        self.start_voice().await;
        Ok(events)
    }

    /// Bring up the UDP channel and the capture engine; failures degrade
    async fn start_voice(&mut self) {
        let server = match tokio::net::lookup_host((self.settings.server.as_str(), self.settings.port))
            .await
            .ok()
            .and_then(|mut addrs| addrs.next())
        {
            Some(addr) => addr,
            None => {
                self.sink
                    .status_text("Voice unavailable: cannot resolve server address");
                return;
            }
        };

        let (outbound_tx, outbound_rx) = sync_channel(OUTBOUND_QUEUE_FRAMES);
        match VoiceTransport::start(
            server,
            &self.settings.nickname,
            self.playback.clone(),
            self.sink.clone(),
            outbound_rx,
        ) {
            Ok(transport) => {
                self.voice = Some(transport);
                if let Some(network) = &self.network {
                    network.mark_voice_connected();
                }
            }
            Err(e) => {
                self.sink.status_text(&format!("Voice unavailable: {}", e));
                return;
            }
        }

        let mut capture = CaptureEngine::new(
            self.backend.clone(),
            self.sink.clone(),
            CaptureConfig::from_settings(&self.settings),
            self.key.clone(),
            outbound_tx,
        );
        if capture.start() {
            self.capture = Some(capture);
        }
        // A start failure already reported "voice disabled" via the sink;
        // inbound voice and text keep working.
    }

    /// React to an out-of-band control event
    ///
    /// Closed connections and hard errors run the shared teardown.
    pub async fn handle_event(&mut self, event: &ControlEvent) {
        match event {
            ControlEvent::Closed { by_server } => {
                if *by_server {
                    self.sink.status_text("Server closed the connection");
                }
                self.shutdown(false).await;
            }
            ControlEvent::ConnectionError(e) => {
                self.sink.status_text(&format!("Connection lost: {}", e));
                self.shutdown(false).await;
            }
            ControlEvent::SendFailed(e) => {
                self.sink
                    .status_text(&format!("Message not delivered: {}", e));
            }
        }
    }

    /// Client-initiated teardown
    pub async fn disconnect(&mut self) {
        self.shutdown(true).await;
    }

    /// The single teardown path; idempotent
    async fn shutdown(&mut self, client_initiated: bool) {
        let Some(mut network) = self.network.take() else {
            return;
        };

        // Audio goes quiet before the socket closes
        if let Some(mut capture) = self.capture.take() {
            capture.stop();
        }
        if let Some(mut voice) = self.voice.take() {
            voice.stop();
        }

        if client_initiated {
            // Our half-close, then the bounded wait for the server's
            network.disconnect().await;
        }

        self.roster.clear();
        self.sink.clear_user_list();
        self.sink.connection_closed();
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.network
            .as_ref()
            .map(NetworkSession::state)
            .unwrap_or(ConnectionState::Disconnected)
    }

    /// Whether the control channel is up
    pub fn is_connected(&self) -> bool {
        self.network.is_some()
    }

    /// Send a chat line
    ///
    /// # Errors
    ///
    /// `TooLong` for messages over the wire cap, `Closed` when offline.
    pub fn send_chat(&self, text: &str) -> Result<(), SendError> {
        match &self.network {
            Some(network) => network.send_chat(text),
            None => Err(SendError::Closed),
        }
    }

    /// Request to enter a room
    pub fn enter_room(&self, room: &str) -> Result<(), SendError> {
        match &self.network {
            Some(network) => network.enter_room(room),
            None => Err(SendError::Closed),
        }
    }

    /// Request to enter a password-protected room
    pub fn enter_room_with_password(&self, room: &str, password: &str) -> Result<(), SendError> {
        match &self.network {
            Some(network) => network.enter_room_with_password(room, password),
            None => Err(SendError::Closed),
        }
    }

    /// Set a peer's volume in percent (100 = unity)
    pub fn set_peer_volume(&self, name: &str, percent: u16) -> bool {
        self.roster.set_volume(name, f32::from(percent) / 100.0)
    }

    /// Mute or unmute the microphone
    pub fn set_muted(&self, muted: bool) {
        if let Some(capture) = &self.capture {
            capture.set_muted(muted);
        }
    }

    /// Toggle the hear-yourself loopback
    pub fn set_monitor(&self, enabled: bool) {
        if let Some(capture) = &self.capture {
            capture.set_monitor(enabled);
        }
    }

    /// Names currently online, in roster order
    pub fn user_names(&self) -> Vec<String> {
        self.roster.names()
    }

    /// Rooms currently known, with members
    pub fn rooms(&self) -> Vec<crate::roster::Room> {
        self.roster.rooms()
    }
}

// =============================================================================
// Tests
// =============================================================================
