//! TCP control channel
//!
//! Connection lifecycle: connect, handshake (version + nickname), roster
//! registration, then a split reader/writer pair over the framed message
//! protocol. The reader is the single consumer of control messages, so
//! framing imposes a total order on control events. Both tasks share a
//! stop flag; either side of the connection can initiate the half-close
//! teardown and the other answers in kind.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Notify, mpsc, oneshot};

use parley_common::io::{read_server_message, write_client_message, write_handshake};
use parley_common::protocol::{ClientMessage, HandshakeReply, HandshakeRequest, ServerMessage};
use parley_common::text::{split_time_prefix, utf16_len};
use parley_common::{MAX_CHAT_UTF16_UNITS, io as wire};

use crate::roster::Roster;
use crate::ui::PresentationSink;

// =============================================================================
// Constants
// =============================================================================

/// Bounded wait for the server to acknowledge our half-close
const CLOSE_ACK_TIMEOUT: Duration = Duration::from_secs(3);

// =============================================================================
// Connection State
// =============================================================================

/// Lifecycle of the session, shared by both channels
///
/// Transitions only move forward through the connection sequence, except
/// the terminal drop back to `Disconnected` from any state on error or
/// explicit stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection
    Disconnected,
    /// TCP connect and handshake in progress
    Connecting,
    /// Control channel up; text works
    TextConnected,
    /// Voice channel registered as well
    VoiceConnected,
    /// Teardown in progress
    Disconnecting,
}

impl ConnectionState {
    fn ordinal(self) -> u8 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::TextConnected => 2,
            ConnectionState::VoiceConnected => 3,
            ConnectionState::Disconnecting => 4,
        }
    }

    /// Whether moving to `next` is a valid transition
    pub fn can_advance(self, next: ConnectionState) -> bool {
        if next == ConnectionState::Disconnected {
            return true;
        }
        next.ordinal() > self.ordinal()
    }
}

/// Shared, validated connection state cell
#[derive(Clone)]
pub struct StateCell(Arc<StdMutex<ConnectionState>>);

impl StateCell {
    fn new() -> Self {
        Self(Arc::new(StdMutex::new(ConnectionState::Disconnected)))
    }

    /// Current state
    pub fn get(&self) -> ConnectionState {
        *self.0.lock().expect("state lock")
    }

    /// Apply a transition if it is valid; returns whether it applied
    pub fn advance(&self, next: ConnectionState) -> bool {
        let mut state = self.0.lock().expect("state lock");
        if state.can_advance(next) {
            *state = next;
            true
        } else {
            false
        }
    }
}

// =============================================================================
// Errors and Events
// =============================================================================

/// Why a connection attempt failed
#[derive(Debug)]
pub enum ConnectError {
    /// Socket or stream failure
    Io(std::io::Error),
    /// The requested nickname is already connected
    NameTaken,
    /// The server is at capacity
    ServerFull,
    /// The server runs an incompatible protocol version
    VersionMismatch {
        /// The version the server reported
        server_version: String,
    },
}

impl std::fmt::Display for ConnectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectError::Io(e) => write!(f, "connection failed: {}", e),
            ConnectError::NameTaken => write!(f, "that name is already in use"),
            ConnectError::ServerFull => write!(f, "the server is full"),
            ConnectError::VersionMismatch { server_version } => {
                write!(f, "version mismatch: server runs {}", server_version)
            }
        }
    }
}

impl From<std::io::Error> for ConnectError {
    fn from(e: std::io::Error) -> Self {
        ConnectError::Io(e)
    }
}

/// Failure to hand a message to the writer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    /// Message exceeds the wire cap; checked before any I/O
    TooLong(usize),
    /// The connection is gone
    Closed,
}

impl std::fmt::Display for SendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SendError::TooLong(units) => write!(
                f,
                "message is {} UTF-16 units, limit is {}",
                units, MAX_CHAT_UTF16_UNITS
            ),
            SendError::Closed => write!(f, "not connected"),
        }
    }
}

/// Out-of-band events for the session supervisor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlEvent {
    /// The control channel closed
    Closed {
        /// Whether the server initiated the close
        by_server: bool,
    },
    /// The control channel failed
    ConnectionError(String),
    /// A message could not be delivered; the connection remains open
    SendFailed(String),
}

// =============================================================================
// Network Session
// =============================================================================

/// Handle onto a live control channel
pub struct NetworkSession {
    command_tx: mpsc::UnboundedSender<ClientMessage>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    state: StateCell,
    closed_notify: Arc<Notify>,
    closed: Arc<AtomicBool>,
}

impl NetworkSession {
    /// Connect, handshake, register the roster, and start the listen loop
    ///
    /// On success the returned receiver carries [`ControlEvent`]s until
    /// the channel closes. On rejection the connection is dropped before
    /// any state was registered.
    ///
    /// # Errors
    ///
    /// Returns a [`ConnectError`] for socket failures and handshake
    /// rejections.
    pub async fn connect(
        host: &str,
        port: u16,
        nickname: &str,
        roster: Arc<Roster>,
        sink: Arc<dyn PresentationSink>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ControlEvent>), ConnectError> {
        let state = StateCell::new();
        state.advance(ConnectionState::Connecting);

        let stream = match TcpStream::connect((host, port)).await {
            Ok(s) => s,
            Err(e) => {
                state.advance(ConnectionState::Disconnected);
                return Err(e.into());
            }
        };
        let (mut reader, mut writer) = stream.into_split();

        write_handshake(&mut writer, &HandshakeRequest::current(nickname)).await?;
        let roster_block = match wire::read_handshake_reply(&mut reader).await? {
            HandshakeReply::Welcome(block) => block,
            HandshakeReply::NameTaken => {
                state.advance(ConnectionState::Disconnected);
                return Err(ConnectError::NameTaken);
            }
            HandshakeReply::ServerFull => {
                state.advance(ConnectionState::Disconnected);
                return Err(ConnectError::ServerFull);
            }
            HandshakeReply::VersionMismatch { server_version } => {
                state.advance(ConnectionState::Disconnected);
                return Err(ConnectError::VersionMismatch { server_version });
            }
        };

        // Register the existing users, then ourselves
        for name in &roster_block.names {
            let added = roster.add_peer(name);
            if let Some(e) = added.device_error {
                sink.status_text(&format!("No playback for {}: {}", name, e));
            }
        }
        roster.add_peer(nickname);
        sink.set_user_list(&roster.names());
        sink.status_text(&format!("{} users online", roster_block.online_count));

        state.advance(ConnectionState::TextConnected);

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_notify = Arc::new(Notify::new());
        let closed_notify = Arc::new(Notify::new());
        let closed = Arc::new(AtomicBool::new(false));
        let closing = Arc::new(AtomicBool::new(false));

        tokio::spawn(reader_task(
            reader,
            roster,
            sink,
            command_tx.clone(),
            event_tx.clone(),
            stop.clone(),
            stop_notify.clone(),
            closed_notify.clone(),
            closed.clone(),
            closing.clone(),
        ));
        tokio::spawn(writer_task(
            writer,
            command_rx,
            shutdown_rx,
            event_tx,
            stop,
            stop_notify,
            closing,
        ));

        Ok((
            Self {
                command_tx,
                shutdown_tx: Some(shutdown_tx),
                state,
                closed_notify,
                closed,
            },
            event_rx,
        ))
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    /// Record that the voice channel came up
    pub fn mark_voice_connected(&self) {
        self.state.advance(ConnectionState::VoiceConnected);
    }

    /// Send a chat line
    ///
    /// The length cap is enforced here, before any I/O.
    ///
    /// # Errors
    ///
    /// `TooLong` when the message exceeds the UTF-16 cap; `Closed` when
    /// the channel is gone.
    pub fn send_chat(&self, text: &str) -> Result<(), SendError> {
        let units = utf16_len(text);
        if units > MAX_CHAT_UTF16_UNITS {
            return Err(SendError::TooLong(units));
        }
        self.command_tx
            .send(ClientMessage::Chat(text.to_string()))
            .map_err(|_| SendError::Closed)
    }

    /// Request to enter a room
    pub fn enter_room(&self, room: &str) -> Result<(), SendError> {
        self.command_tx
            .send(ClientMessage::EnterRoom {
                room: room.to_string(),
                password: None,
            })
            .map_err(|_| SendError::Closed)
    }

    /// Request to enter a password-protected room
    pub fn enter_room_with_password(&self, room: &str, password: &str) -> Result<(), SendError> {
        self.command_tx
            .send(ClientMessage::EnterRoom {
                room: room.to_string(),
                password: Some(password.to_string()),
            })
            .map_err(|_| SendError::Closed)
    }

    /// Client-initiated teardown
    ///
    /// Sends our half-close, then waits (bounded) for the server's
    /// acknowledging close before releasing the socket.
    pub async fn disconnect(&mut self) {
        self.state.advance(ConnectionState::Disconnecting);
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if !self.closed.load(Ordering::SeqCst) {
            let _ = tokio::time::timeout(CLOSE_ACK_TIMEOUT, self.closed_notify.notified()).await;
        }
        self.state.advance(ConnectionState::Disconnected);
    }
}

// =============================================================================
// Reader Task
// =============================================================================

/// Single consumer of the control channel
///
/// Runs without `select!` so a read is never cancelled mid-frame; the
/// writer is signalled through the shared stop flag.
#[allow(clippy::too_many_arguments)]
async fn reader_task(
    mut reader: OwnedReadHalf,
    roster: Arc<Roster>,
    sink: Arc<dyn PresentationSink>,
    echo_tx: mpsc::UnboundedSender<ClientMessage>,
    event_tx: mpsc::UnboundedSender<ControlEvent>,
    stop: Arc<AtomicBool>,
    stop_notify: Arc<Notify>,
    closed_notify: Arc<Notify>,
    closed: Arc<AtomicBool>,
    closing: Arc<AtomicBool>,
) {
    loop {
        if stop.load(Ordering::Relaxed) {
            break;
        }
        match read_server_message(&mut reader).await {
            Ok(Some(message)) => dispatch(message, &roster, &sink, &echo_tx),
            Ok(None) => {
                // The peer's half-close; the writer answers with ours
                let by_server = !closing.load(Ordering::SeqCst);
                stop.store(true, Ordering::Relaxed);
                stop_notify.notify_one();
                let _ = event_tx.send(ControlEvent::Closed { by_server });
                break;
            }
            Err(e) => {
                stop.store(true, Ordering::Relaxed);
                stop_notify.notify_one();
                let _ = event_tx.send(ControlEvent::ConnectionError(e.to_string()));
                break;
            }
        }
    }
    closed.store(true, Ordering::SeqCst);
    // notify_one leaves a permit, so a disconnect() that starts waiting
    // after this point returns immediately instead of timing out
    closed_notify.notify_one();
}

/// Apply one server message to the roster and presentation sink
fn dispatch(
    message: ServerMessage,
    roster: &Arc<Roster>,
    sink: &Arc<dyn PresentationSink>,
    echo_tx: &mpsc::UnboundedSender<ClientMessage>,
) {
    match message {
        ServerMessage::UserJoined(ev) => {
            let added = roster.add_peer(&ev.name);
            if let Some(e) = added.device_error {
                sink.status_text(&format!("No playback for {}: {}", ev.name, e));
            }
            sink.status_text(&format!("{} joined ({} online)", ev.name, ev.online_count));
            sink.set_user_list(&roster.names());
        }
        ServerMessage::UserLeft(ev) => {
            roster.retire(&ev.name);
            sink.status_text(&format!("{} left ({} online)", ev.name, ev.online_count));
            sink.set_user_list(&roster.names());
        }
        ServerMessage::Chat(line) => match split_time_prefix(&line) {
            Some((label, body)) => sink.chat_line(label, body),
            None => sink.chat_line("", &line),
        },
        ServerMessage::Ping(ping) => {
            roster.set_ping(&ping.name, ping.rtt_ms);
            sink.peer_ping(&ping.name, ping.rtt_ms);
        }
        ServerMessage::Keepalive => {
            // Echo promptly; missing the window gets us disconnected
            let _ = echo_tx.send(ClientMessage::Keepalive);
        }
        ServerMessage::RoomMoved(mv) => {
            roster.move_peer_to_room(&mv.user, &mv.room);
            sink.status_text(&format!("{} moved to {}", mv.user, mv.room));
        }
        ServerMessage::RoomDenied { room } => {
            sink.request_room_password(&room);
        }
        ServerMessage::RoomCreated(info) => {
            roster.room_created(&info.name, info.has_password, info.max_users);
            sink.room_added(&info.name);
        }
        ServerMessage::RoomDeleted { room } => {
            roster.room_deleted(&room);
            sink.room_removed(&room);
        }
        ServerMessage::RoomRenamed(rn) => {
            roster.room_renamed(&rn.old, &rn.new);
            sink.room_renamed(&rn.old, &rn.new);
        }
    }
}

// =============================================================================
// Writer Task
// =============================================================================

/// Drains the command queue onto the wire and owns the half-close
async fn writer_task(
    mut writer: OwnedWriteHalf,
    mut command_rx: mpsc::UnboundedReceiver<ClientMessage>,
    mut shutdown_rx: oneshot::Receiver<()>,
    event_tx: mpsc::UnboundedSender<ControlEvent>,
    stop: Arc<AtomicBool>,
    stop_notify: Arc<Notify>,
    closing: Arc<AtomicBool>,
) {
    loop {
        if stop.load(Ordering::Relaxed) {
            let _ = writer.shutdown().await;
            break;
        }
        tokio::select! {
            message = command_rx.recv() => {
                let Some(message) = message else {
                    // Session handle dropped; close out
                    closing.store(true, Ordering::SeqCst);
                    stop.store(true, Ordering::Relaxed);
                    let _ = writer.shutdown().await;
                    break;
                };
                if let Err(e) = write_client_message(&mut writer, &message).await {
                    // Undelivered either way; only a hard error kills the
                    // channel, a full buffer leaves it open
                    let _ = event_tx.send(ControlEvent::SendFailed(e.to_string()));
                    if e.kind() != std::io::ErrorKind::WouldBlock {
                        stop.store(true, Ordering::Relaxed);
                        let _ = writer.shutdown().await;
                        break;
                    }
                }
            }
            _ = &mut shutdown_rx => {
                // Client-initiated teardown: our half-close goes out and
                // the reader waits for the server's answer
                closing.store(true, Ordering::SeqCst);
                let _ = writer.shutdown().await;
                break;
            }
            _ = stop_notify.notified() => {
                // Reader saw the peer's FIN or an error; answer in kind
                let _ = writer.shutdown().await;
                break;
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
