//! Per-peer playback
//!
//! Every inbound voice packet lands in [`PlaybackEngine::submit_frame`].
//! Frames are volume-scaled and queued on the peer; once more than one
//! frame is queued and no task runs for that peer, a playback task is
//! spawned. The task double-buffers two frames against the peer's output
//! handle (ping-pong), refilling whichever slot the hardware finished, so
//! playback never stalls while frames remain queued and drains gracefully
//! to silence when the queue empties.
//!
//! A device failure mid-stream sets the peer's purge flag; cleanup is
//! deferred until the end-of-utterance marker arrives so no buffer still
//! owned by in-flight hardware I/O is freed early.

use std::sync::Arc;
use std::thread;

use parley_common::voice::PLAYBACK_SLOTS;

use crate::audio::device::DEVICE_POLL_INTERVAL;
use crate::audio::level::scale_frame;
use crate::roster::{Peer, Roster};
use crate::ui::PresentationSink;

// =============================================================================
// Constants
// =============================================================================

/// Queue depth that starts a playback task (strictly more than this)
pub const PLAYBACK_START_THRESHOLD: usize = 1;

// =============================================================================
// Playback Engine
// =============================================================================

/// Routes received frames into per-peer playback tasks
pub struct PlaybackEngine {
    roster: Arc<Roster>,
    sink: Arc<dyn PresentationSink>,
    master_volume: f32,
}

impl PlaybackEngine {
    /// Create the engine over a roster and presentation sink
    pub fn new(
        roster: Arc<Roster>,
        sink: Arc<dyn PresentationSink>,
        master_volume: f32,
    ) -> Arc<Self> {
        Arc::new(Self {
            roster,
            sink,
            master_volume,
        })
    }

    /// The roster this engine plays into
    pub fn roster(&self) -> &Arc<Roster> {
        &self.roster
    }

    /// Accept one inbound voice packet for a peer
    ///
    /// Called from the network receive path. Unknown peers and peers
    /// whose output device failed to open drop the frame silently; the
    /// error was already surfaced when the peer was registered.
    pub fn submit_frame(self: &Arc<Self>, peer_name: &str, mut pcm: Vec<i16>, is_last: bool) {
        let Some(peer) = self.roster.peer(peer_name) else {
            return;
        };

        if is_last {
            self.handle_last(&peer);
            return;
        }

        let mut state = peer.state.lock().expect("peer lock");
        // A running task holds the stream; only a peer whose device never
        // opened has no stream and no task
        if state.stream.is_none() && !state.playing {
            return;
        }
        scale_frame(&mut pcm, self.master_volume * state.volume);
        state.queue.push_back(pcm);

        if state.queue.len() > PLAYBACK_START_THRESHOLD && !state.playing {
            state.playing = true;
            let stream = state.stream.take().expect("stream checked above");
            drop(state);

            let engine = self.clone();
            let task_peer = peer.clone();
            thread::spawn(move || engine.playback_task(task_peer, stream));
        }
    }

    /// Handle the end-of-utterance marker
    ///
    /// If a device error interrupted this utterance and no task is
    /// running, the deferred cleanup happens now; a still-running task
    /// performs it at exit instead, since it owns the in-flight buffers.
    fn handle_last(&self, peer: &Arc<Peer>) {
        let mut state = peer.state.lock().expect("peer lock");
        state.final_received = true;
        if !state.playing {
            state.queue.clear();
            state.purge_on_done = false;
            state.final_received = false;
        }
    }

    /// Exclusive playback task for one peer
    ///
    /// At most one runs per peer, enforced by the `playing` flag toggled
    /// under the peer lock.
    fn playback_task(
        self: Arc<Self>,
        peer: Arc<Peer>,
        mut stream: Box<dyn crate::audio::device::PlaybackStream>,
    ) {
        self.sink.peer_talking(&peer.name, true);
        if let Ok(mut state) = peer.state.lock() {
            state.talking = true;
        }

        let mut failed = None;

        'utterance: loop {
            // Double-buffer loop: keep up to PLAYBACK_SLOTS frames in
            // flight, refill as the hardware drains them.
            loop {
                let pending = match stream.pending_frames() {
                    Ok(p) => p,
                    Err(e) => {
                        failed = Some(e);
                        break 'utterance;
                    }
                };

                let mut submitted = false;
                if pending < PLAYBACK_SLOTS {
                    let next = peer.state.lock().expect("peer lock").queue.pop_front();
                    match next {
                        Some(frame) => {
                            if let Err(e) = stream.submit(&frame) {
                                failed = Some(e);
                                break 'utterance;
                            }
                            submitted = true;
                        }
                        None if pending == 0 => break,
                        None => {}
                    }
                }

                if !submitted {
                    thread::sleep(DEVICE_POLL_INTERVAL);
                }
            }

            // Queue drained. Restart within the task if frames raced in
            // after the last poll and no marker ended the utterance.
            let state = peer.state.lock().expect("peer lock");
            if !state.final_received && state.queue.len() > PLAYBACK_START_THRESHOLD {
                continue;
            }
            break;
        }

        if let Some(err) = &failed {
            self.sink
                .status_text(&format!("Playback error for {}: {}", peer.name, err));
        }

        let mut state = peer.state.lock().expect("peer lock");
        state.playing = false;
        state.talking = false;
        if failed.is_some() {
            state.purge_on_done = true;
        }
        if state.final_received {
            // Deferred cleanup site: the task owns the in-flight buffers,
            // so the purge waits for it to get here.
            state.queue.clear();
            state.purge_on_done = false;
            state.final_received = false;
        }
        // Hand the output handle back unless the peer was retired meanwhile
        if self.roster.peer(&peer.name).is_some() {
            state.stream = Some(stream);
        }
        drop(state);

        self.sink.peer_talking(&peer.name, false);
    }
}

// =============================================================================
// Tests
// =============================================================================
