//! UDP voice transport
//!
//! Established only after the text connection succeeds: the socket binds
//! with the server as its default destination, announces itself with a
//! one-time registration datagram, and then runs non-blocking. The
//! inbound loop echoes ping probes and hands voice frames to the playback
//! engine; the outbound pump drains the capture hand-off queue. A lost
//! datagram is simply lost; there is no retransmission on this channel.
//!
//! Both loops run on plain threads with a short poll: the receive path
//! calls straight into the blocking audio plane, and the poll cadence is
//! the same discipline the device waits use.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parley_common::voice::{
    MAX_VOICE_DATAGRAM, InboundDatagram, decode_inbound, encode_frame, encode_last,
    encode_register,
};

use crate::audio::capture::OutboundVoice;
use crate::audio::playback::PlaybackEngine;
use crate::ui::PresentationSink;

// =============================================================================
// Constants
// =============================================================================

/// Poll interval for the non-blocking receive loop
const RECV_POLL_INTERVAL: Duration = Duration::from_millis(3);

/// How long the outbound pump waits for work before re-checking liveness
const PUMP_IDLE_WAIT: Duration = Duration::from_millis(50);

// =============================================================================
// Voice Transport
// =============================================================================

/// The unreliable voice channel
pub struct VoiceTransport {
    alive: Arc<AtomicBool>,
    inbound: Option<JoinHandle<()>>,
    outbound: Option<JoinHandle<()>>,
}

impl VoiceTransport {
    /// Open the voice channel to `server` and start both loops
    ///
    /// Sends the registration datagram before switching to non-blocking
    /// mode. `outbound_rx` is the capture engine's hand-off queue.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the socket cannot be opened, connected, or
    /// registered; the caller treats that as "voice disabled".
    pub fn start(
        server: SocketAddr,
        nickname: &str,
        playback: Arc<PlaybackEngine>,
        sink: Arc<dyn PresentationSink>,
        outbound_rx: Receiver<OutboundVoice>,
    ) -> io::Result<Self> {
        let socket = UdpSocket::bind(local_bind_addr(&server))?;
        socket.connect(server)?;

        let registration = encode_register(nickname)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;
        socket.send(&registration)?;
        socket.set_nonblocking(true)?;

        let send_socket = socket.try_clone()?;
        let alive = Arc::new(AtomicBool::new(true));

        let inbound = {
            let alive = alive.clone();
            let sink = sink.clone();
            thread::spawn(move || run_inbound(socket, playback, sink, alive))
        };
        let outbound = {
            let alive = alive.clone();
            thread::spawn(move || run_outbound(send_socket, outbound_rx, sink, alive))
        };

        Ok(Self {
            alive,
            inbound: Some(inbound),
            outbound: Some(outbound),
        })
    }

    /// Stop both loops and close the socket; idempotent
    pub fn stop(&mut self) {
        self.alive.store(false, Ordering::SeqCst);
        if let Some(handle) = self.inbound.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.outbound.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for VoiceTransport {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Bind address matching the server's address family
fn local_bind_addr(server: &SocketAddr) -> SocketAddr {
    if server.is_ipv4() {
        "0.0.0.0:0".parse().expect("valid IPv4 bind address")
    } else {
        "[::]:0".parse().expect("valid IPv6 bind address")
    }
}

// =============================================================================
// Inbound Loop
// =============================================================================

/// Receive datagrams: echo ping probes, route voice to playback
fn run_inbound(
    socket: UdpSocket,
    playback: Arc<PlaybackEngine>,
    sink: Arc<dyn PresentationSink>,
    alive: Arc<AtomicBool>,
) {
    let mut buf = [0u8; MAX_VOICE_DATAGRAM + 64];
    while alive.load(Ordering::SeqCst) {
        match socket.recv(&mut buf) {
            Ok(n) => match decode_inbound(&buf[..n]) {
                Ok(InboundDatagram::PingProbe) => {
                    // Echoed back unchanged; the decode size-checked it
                    let _ = socket.send(&buf[..n]);
                }
                Ok(InboundDatagram::Voice(voice)) => {
                    playback.submit_frame(&voice.sender, voice.pcm, voice.last);
                }
                // Malformed datagrams are dropped, not fatal
                Err(_) => {}
            },
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(RECV_POLL_INTERVAL);
            }
            Err(e) => {
                if alive.swap(false, Ordering::SeqCst) {
                    sink.status_text(&format!("Voice channel lost: {}", e));
                }
                break;
            }
        }
    }
}

// =============================================================================
// Outbound Pump
// =============================================================================

/// Drain the capture hand-off queue onto the wire
///
/// A failed send is reported once and the frame is dropped; the voice
/// channel never retransmits.
fn run_outbound(
    socket: UdpSocket,
    outbound_rx: Receiver<OutboundVoice>,
    sink: Arc<dyn PresentationSink>,
    alive: Arc<AtomicBool>,
) {
    let mut send_error_reported = false;
    while alive.load(Ordering::SeqCst) {
        let item = match outbound_rx.recv_timeout(PUMP_IDLE_WAIT) {
            Ok(item) => item,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        let result = match item {
            OutboundVoice::Frame(pcm) => socket.send(&encode_frame(&pcm)),
            OutboundVoice::Last => socket.send(&encode_last()),
        };
        if let Err(e) = result {
            if e.kind() != io::ErrorKind::WouldBlock && !send_error_reported {
                sink.status_text(&format!("Voice send failed: {}", e));
                send_error_reported = true;
            }
        } else {
            send_error_reported = false;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::sync::mpsc::sync_channel;
    use std::time::Instant;

    use parley_common::voice::{VoiceTag, encode_inbound};

    use super::*;
    use crate::audio::capture::OUTBOUND_QUEUE_FRAMES;
    use crate::audio::device::testing::MockBackend;
    use crate::roster::Roster;
    use crate::ui::NullSink;
    use crate::ui::testing::RecordingSink;

    struct Rig {
        transport: VoiceTransport,
        server: UdpSocket,
        backend: Arc<MockBackend>,
        playback: Arc<PlaybackEngine>,
        outbound_tx: std::sync::mpsc::SyncSender<OutboundVoice>,
    }

    fn rig() -> Rig {
        let server = UdpSocket::bind("127.0.0.1:0").expect("bind server");
        server
            .set_read_timeout(Some(Duration::from_secs(2)))
            .expect("timeout");

        let backend = Arc::new(MockBackend::new());
        let roster = Roster::new(backend.clone(), "");
        let playback = PlaybackEngine::new(roster, Arc::new(NullSink), 1.0);

        let (outbound_tx, outbound_rx) = sync_channel(OUTBOUND_QUEUE_FRAMES);
        let transport = VoiceTransport::start(
            server.local_addr().expect("addr"),
            "alice",
            playback.clone(),
            Arc::new(RecordingSink::new()),
            outbound_rx,
        )
        .expect("start transport");

        Rig {
            transport,
            server,
            backend,
            playback,
            outbound_tx,
        }
    }

    /// Receive the registration datagram and remember the client address
    fn expect_registration(server: &UdpSocket) -> SocketAddr {
        let mut buf = [0u8; 64];
        let (n, from) = server.recv_from(&mut buf).expect("registration");
        assert_eq!(buf[0], VoiceTag::Register.to_byte());
        assert_eq!(buf[1] as usize, 5);
        assert_eq!(&buf[2..n], b"alice");
        from
    }

    #[test]
    fn test_registration_sent_first() {
        let mut rig = rig();
        expect_registration(&rig.server);
        rig.transport.stop();
    }

    #[test]
    fn test_ping_probe_echoed_unchanged() {
        let mut rig = rig();
        let client = expect_registration(&rig.server);

        let probe = [0u8, 0xDE, 0xAD, 0xBE];
        rig.server.send_to(&probe, client).expect("send probe");

        let mut buf = [0u8; 64];
        let (n, from) = rig.server.recv_from(&mut buf).expect("echo");
        assert_eq!(from, client);
        assert_eq!(&buf[..n], &probe);
        rig.transport.stop();
    }

    #[test]
    fn test_inbound_voice_reaches_playback() {
        let mut rig = rig();
        let client = expect_registration(&rig.server);
        rig.playback.roster().add_peer("bob");

        let pcm: Vec<i16> = (0..8).map(|i| i * 100).collect();
        for _ in 0..2 {
            let datagram = encode_inbound("bob", false, &pcm).expect("encode");
            rig.server.send_to(&datagram, client).expect("send voice");
        }
        let last = encode_inbound("bob", true, &[]).expect("encode");
        rig.server.send_to(&last, client).expect("send last");

        let deadline = Instant::now() + Duration::from_secs(2);
        while rig.backend.playback_log.submitted().len() < 2 {
            assert!(Instant::now() < deadline, "frames never reached playback");
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(rig.backend.playback_log.submitted()[0], pcm);
        rig.transport.stop();
    }

    #[test]
    fn test_outbound_frame_and_last_tagging() {
        let mut rig = rig();
        expect_registration(&rig.server);

        let pcm: Vec<i16> = vec![7; 4];
        rig.outbound_tx
            .send(OutboundVoice::Frame(pcm.clone()))
            .expect("queue frame");
        rig.outbound_tx
            .send(OutboundVoice::Last)
            .expect("queue last");

        let mut buf = [0u8; 256];
        let n = rig.server.recv(&mut buf).expect("frame datagram");
        assert_eq!(buf[0], VoiceTag::AudioFrame.to_byte());
        assert_eq!(n, 1 + pcm.len() * 2);
        assert_eq!(&buf[1..3], &7i16.to_le_bytes());

        let n = rig.server.recv(&mut buf).expect("last datagram");
        assert_eq!(n, 1);
        assert_eq!(buf[0], VoiceTag::LastFrame.to_byte());
        rig.transport.stop();
    }

    #[test]
    fn test_malformed_datagram_ignored() {
        let mut rig = rig();
        let client = expect_registration(&rig.server);

        // Claims an 18-byte sender but is 3 bytes long
        rig.server.send_to(&[18u8, 1, 2], client).expect("send");
        // A well-formed probe after it still gets echoed
        rig.server.send_to(&[0u8, 9], client).expect("send probe");

        let mut buf = [0u8; 64];
        let (n, _) = rig.server.recv_from(&mut buf).expect("echo");
        assert_eq!(&buf[..n], &[0u8, 9]);
        rig.transport.stop();
    }

    #[test]
    fn test_stop_is_idempotent() {
        let mut rig = rig();
        expect_registration(&rig.server);
        rig.transport.stop();
        rig.transport.stop();
    }
}
