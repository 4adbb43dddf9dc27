//! Peer and room registry
//!
//! One table lock guards structural changes (peer and room add/remove,
//! room moves); each peer carries its own lock for its mutable playback
//! state so that roster churn never blocks an in-flight playback task for
//! an unrelated peer.
//!
//! Peer audio resources are opened eagerly at creation and released at
//! retirement. Retirement is the single cleanup site: normal departure,
//! deferred error cleanup, and full teardown all go through
//! [`Roster::retire`], which is idempotent.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use crate::audio::device::{AudioBackend, PlaybackStream};

// =============================================================================
// Peer
// =============================================================================

/// Mutable playback state of one peer, guarded by the peer's own lock
pub struct PeerState {
    /// Last reported round-trip time in milliseconds
    pub ping_ms: u32,
    /// Whether the peer is currently audible
    pub talking: bool,
    /// User-set volume multiplier (1.0 = unity)
    pub volume: f32,
    /// Received frames awaiting playback, in arrival order
    pub queue: VecDeque<Vec<i16>>,
    /// Whether a playback task currently runs for this peer
    pub playing: bool,
    /// A playback error occurred mid-stream; discard queued frames once
    /// the utterance completes
    pub purge_on_done: bool,
    /// The end-of-utterance marker has arrived
    pub final_received: bool,
    /// Output handle, `None` when the device failed to open
    pub stream: Option<Box<dyn PlaybackStream>>,
}

/// A remote chat participant
pub struct Peer {
    /// Display name, the unique key
    pub name: String,
    /// Playback state under the peer's exclusive lock
    pub state: Mutex<PeerState>,
}

/// Result of registering a peer
pub struct PeerAdded {
    /// The registered (or already present) peer
    pub peer: Arc<Peer>,
    /// Device error from the eager playback open, to surface upstream
    pub device_error: Option<String>,
}

// =============================================================================
// Room
// =============================================================================

/// A named subset of connected users
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Room {
    /// Room name, unique
    pub name: String,
    /// Whether entry requires a password
    pub has_password: bool,
    /// Maximum member count, 0 for unlimited
    pub max_users: u16,
    /// Member names in arrival order
    pub members: Vec<String>,
    /// Whether this is the default/welcome room
    pub is_default: bool,
}

// =============================================================================
// Roster
// =============================================================================

struct RosterInner {
    /// Peers keyed by lowercase name
    peers: HashMap<String, Arc<Peer>>,
    /// Display names in registration order
    order: Vec<String>,
    rooms: Vec<Room>,
}

/// Shared table of known peers and rooms
pub struct Roster {
    backend: Arc<dyn AudioBackend>,
    output_device: String,
    inner: Mutex<RosterInner>,
}

impl Roster {
    /// Create an empty roster opening peer playback on `output_device`
    pub fn new(backend: Arc<dyn AudioBackend>, output_device: &str) -> Arc<Self> {
        Arc::new(Self {
            backend,
            output_device: output_device.to_string(),
            inner: Mutex::new(RosterInner {
                peers: HashMap::new(),
                order: Vec::new(),
                rooms: Vec::new(),
            }),
        })
    }

    /// Register a peer, opening its playback resources eagerly
    ///
    /// A device open failure is tolerated: the peer exists for text and
    /// presence, its voice frames are silently dropped, and the error is
    /// returned for the caller to surface. Registering an existing name
    /// returns the existing peer untouched.
    pub fn add_peer(&self, name: &str) -> PeerAdded {
        let key = name.to_lowercase();
        let mut inner = self.inner.lock().expect("roster lock");
        if let Some(existing) = inner.peers.get(&key) {
            return PeerAdded {
                peer: existing.clone(),
                device_error: None,
            };
        }

        let (stream, device_error) = match self.backend.open_playback(&self.output_device) {
            Ok(stream) => (Some(stream), None),
            Err(e) => (None, Some(e)),
        };

        let peer = Arc::new(Peer {
            name: name.to_string(),
            state: Mutex::new(PeerState {
                ping_ms: 0,
                talking: false,
                volume: 1.0,
                queue: VecDeque::new(),
                playing: false,
                purge_on_done: false,
                final_received: false,
                stream,
            }),
        });
        inner.peers.insert(key, peer.clone());
        inner.order.push(name.to_string());

        PeerAdded { peer, device_error }
    }

    /// Look up a peer by name
    pub fn peer(&self, name: &str) -> Option<Arc<Peer>> {
        self.inner
            .lock()
            .expect("roster lock")
            .peers
            .get(&name.to_lowercase())
            .cloned()
    }

    /// Retire a peer: drop it from the table and release its resources
    ///
    /// Idempotent; returns whether the peer was present. A playback task
    /// still holding the peer's output handle finishes undisturbed and
    /// the handle is released when the task drops it.
    pub fn retire(&self, name: &str) -> bool {
        let key = name.to_lowercase();
        let peer = {
            let mut inner = self.inner.lock().expect("roster lock");
            let Some(peer) = inner.peers.remove(&key) else {
                return false;
            };
            inner.order.retain(|n| !n.eq_ignore_ascii_case(name));
            for room in &mut inner.rooms {
                room.members.retain(|m| !m.eq_ignore_ascii_case(name));
            }
            peer
        };

        let mut state = peer.state.lock().expect("peer lock");
        state.queue.clear();
        state.purge_on_done = false;
        state.final_received = false;
        state.talking = false;
        state.stream = None;
        true
    }

    /// Display names in registration order
    pub fn names(&self) -> Vec<String> {
        self.inner.lock().expect("roster lock").order.clone()
    }

    /// Number of registered peers
    pub fn len(&self) -> usize {
        self.inner.lock().expect("roster lock").peers.len()
    }

    /// Whether no peers are registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Retire every peer and forget every room
    pub fn clear(&self) {
        for name in self.names() {
            self.retire(&name);
        }
        self.inner.lock().expect("roster lock").rooms.clear();
    }

    /// Update a peer's round-trip measurement
    pub fn set_ping(&self, name: &str, rtt_ms: u32) -> bool {
        match self.peer(name) {
            Some(peer) => {
                peer.state.lock().expect("peer lock").ping_ms = rtt_ms;
                true
            }
            None => false,
        }
    }

    /// Update a peer's volume multiplier
    pub fn set_volume(&self, name: &str, volume: f32) -> bool {
        match self.peer(name) {
            Some(peer) => {
                peer.state.lock().expect("peer lock").volume = volume.max(0.0);
                true
            }
            None => false,
        }
    }

    // =========================================================================
    // Rooms
    // =========================================================================

    /// Record a server-created room
    ///
    /// The first room a server announces is its welcome room.
    pub fn room_created(&self, name: &str, has_password: bool, max_users: u16) {
        let mut inner = self.inner.lock().expect("roster lock");
        if inner.rooms.iter().any(|r| r.name == name) {
            return;
        }
        let is_default = inner.rooms.is_empty();
        inner.rooms.push(Room {
            name: name.to_string(),
            has_password,
            max_users,
            members: Vec::new(),
            is_default,
        });
    }

    /// Remove a server-deleted room; members fall out of any room
    pub fn room_deleted(&self, name: &str) {
        let mut inner = self.inner.lock().expect("roster lock");
        inner.rooms.retain(|r| r.name != name);
    }

    /// Apply a server-side room rename
    pub fn room_renamed(&self, old: &str, new: &str) {
        let mut inner = self.inner.lock().expect("roster lock");
        if let Some(room) = inner.rooms.iter_mut().find(|r| r.name == old) {
            room.name = new.to_string();
        }
    }

    /// Move a peer into a room, atomically with respect to the table
    ///
    /// The peer leaves its previous room and joins the target in one
    /// critical section; it is never observable in two rooms. An unknown
    /// target room is created on the fly (the server is the authority on
    /// room existence).
    pub fn move_peer_to_room(&self, user: &str, room: &str) {
        let mut inner = self.inner.lock().expect("roster lock");
        for r in &mut inner.rooms {
            r.members.retain(|m| !m.eq_ignore_ascii_case(user));
        }
        if let Some(target) = inner.rooms.iter_mut().find(|r| r.name == room) {
            target.members.push(user.to_string());
            return;
        }
        let is_default = inner.rooms.is_empty();
        inner.rooms.push(Room {
            name: room.to_string(),
            has_password: false,
            max_users: 0,
            members: vec![user.to_string()],
            is_default,
        });
    }

    /// Snapshot of the current rooms
    pub fn rooms(&self) -> Vec<Room> {
        self.inner.lock().expect("roster lock").rooms.clone()
    }

    /// The room a peer currently occupies, if any
    pub fn room_of(&self, user: &str) -> Option<String> {
        self.inner
            .lock()
            .expect("roster lock")
            .rooms
            .iter()
            .find(|r| r.members.iter().any(|m| m.eq_ignore_ascii_case(user)))
            .map(|r| r.name.clone())
    }
}

// =============================================================================
// Tests
// =============================================================================
