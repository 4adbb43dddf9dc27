//! Microphone capture
//!
//! A dedicated capture thread drives the input device through a 4-slot
//! round-robin: arm a frame, wait for the one armed three cycles earlier
//! to complete, copy it out, hand the copy to the transport, re-arm.
//! Push-to-talk runs the rotation only while the key is held and drains
//! the in-flight frames on release; talk-activated runs it continuously
//! and gates transmission on peak level with a hangover so a single quiet
//! frame inside ongoing speech does not clip words.
//!
//! Frame hand-off to the transport is fire-and-forget over a bounded
//! queue: under overload a frame is dropped, never queued behind a
//! backlog. Device errors abort only the current utterance.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::mpsc::SyncSender;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parley_common::voice::{CAPTURE_SLOTS, VAD_HANGOVER_FRAMES, VOICE_FRAME_SAMPLES};

use crate::audio::device::{
    AudioBackend, CaptureStream, DEVICE_POLL_INTERVAL, PlaybackStream,
};
use crate::audio::level::{peak_dbfs, scale_frame};
use crate::audio::ptt::{KEY_POLL_INTERVAL, TalkKey};
use crate::audio::slots::FrameRing;
use crate::config::{Settings, VoiceMode};
use crate::ui::PresentationSink;

// =============================================================================
// Constants
// =============================================================================

/// Outbound hand-off queue depth in frames
///
/// Small on purpose: when the transport falls behind, frames are dropped
/// rather than delayed.
pub const OUTBOUND_QUEUE_FRAMES: usize = 8;

/// How long to poll for one frame completion before calling the device
/// stalled
const FILL_TIMEOUT: Duration = Duration::from_millis(500);

// =============================================================================
// Outbound Hand-off
// =============================================================================

/// One unit of work handed from the capture loop to the voice transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundVoice {
    /// A finished, gain-adjusted PCM frame
    Frame(Vec<i16>),
    /// End-of-utterance marker
    Last,
}

// =============================================================================
// Capture Config
// =============================================================================

/// Capture parameters, fixed for the lifetime of one engine
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// How transmission is gated
    pub voice_mode: VoiceMode,
    /// Input device name (empty = system default)
    pub input_device: String,
    /// Output device for the self-monitoring loopback
    pub output_device: String,
    /// Input gain factor (1.0 = unity)
    pub input_gain: f32,
    /// Voice-activation threshold in dBFS
    pub vad_threshold_dbfs: f32,
    /// Whether the loopback monitor starts enabled
    pub hear_test_voice: bool,
}

impl CaptureConfig {
    /// Derive capture parameters from a settings snapshot
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            voice_mode: settings.voice_mode,
            input_device: settings.input_device.clone(),
            output_device: settings.output_device.clone(),
            input_gain: settings.input_gain_factor(),
            vad_threshold_dbfs: settings.vad_threshold_dbfs,
            hear_test_voice: settings.hear_test_voice,
        }
    }
}

// =============================================================================
// Capture Engine
// =============================================================================

/// Owns the capture thread and its liveness flags
pub struct CaptureEngine {
    backend: Arc<dyn AudioBackend>,
    sink: Arc<dyn PresentationSink>,
    config: CaptureConfig,
    key: Arc<dyn TalkKey>,
    outbound: SyncSender<OutboundVoice>,
    muted: Arc<AtomicBool>,
    monitor_enabled: Arc<AtomicBool>,
    alive: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl CaptureEngine {
    /// Create a stopped engine
    pub fn new(
        backend: Arc<dyn AudioBackend>,
        sink: Arc<dyn PresentationSink>,
        config: CaptureConfig,
        key: Arc<dyn TalkKey>,
        outbound: SyncSender<OutboundVoice>,
    ) -> Self {
        let monitor_enabled = Arc::new(AtomicBool::new(config.hear_test_voice));
        Self {
            backend,
            sink,
            config,
            key,
            outbound,
            muted: Arc::new(AtomicBool::new(false)),
            monitor_enabled,
            alive: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    /// Open the input device and start the capture thread
    ///
    /// Returns false when the device cannot be opened; the error has been
    /// reported to the presentation sink and no state was left open.
    /// Voice is then simply disabled for the session; text continues.
    pub fn start(&mut self) -> bool {
        if self.worker.is_some() {
            return true;
        }
        self.alive.store(true, Ordering::SeqCst);

        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<(), String>>();
        let backend = self.backend.clone();
        let sink = self.sink.clone();
        let config = self.config.clone();
        let key = self.key.clone();
        let outbound = self.outbound.clone();
        let muted = self.muted.clone();
        let monitor_enabled = self.monitor_enabled.clone();
        let alive = self.alive.clone();

        // The capture stream is not Send; it is opened and driven here
        let handle = thread::spawn(move || {
            let stream = match backend.open_capture(&config.input_device) {
                Ok(s) => {
                    let _ = ready_tx.send(Ok(()));
                    s
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            // The loopback monitor opens once and is paused/resumed on
            // toggle, never reopened, to avoid device churn.
            let monitor = match backend.open_playback(&config.output_device) {
                Ok(mut m) => {
                    if !config.hear_test_voice {
                        m.pause();
                    }
                    Some(m)
                }
                Err(e) => {
                    sink.status_text(&format!("Voice monitor unavailable: {}", e));
                    None
                }
            };

            let mut worker = CaptureWorker {
                stream,
                monitor,
                monitor_on: config.hear_test_voice,
                ring: FrameRing::new(CAPTURE_SLOTS, VOICE_FRAME_SAMPLES),
                gain: config.input_gain,
                vad_threshold_dbfs: config.vad_threshold_dbfs,
                sink,
                outbound,
                key,
                muted,
                monitor_enabled,
                alive,
            };
            match config.voice_mode {
                VoiceMode::PushToTalk => worker.run_push_to_talk(),
                VoiceMode::TalkActivated => worker.run_talk_activated(),
            }
        });

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.worker = Some(handle);
                true
            }
            Ok(Err(e)) => {
                self.sink.notice(&format!("Voice disabled: {}", e));
                self.alive.store(false, Ordering::SeqCst);
                let _ = handle.join();
                false
            }
            Err(_) => {
                self.sink.notice("Voice disabled: capture thread failed to start");
                self.alive.store(false, Ordering::SeqCst);
                false
            }
        }
    }

    /// Stop recording and release the device; idempotent
    pub fn stop(&mut self) {
        self.alive.store(false, Ordering::SeqCst);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }

    /// Whether the capture thread is running
    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Mute or unmute the microphone
    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::SeqCst);
    }

    /// Toggle the self-monitoring loopback
    pub fn set_monitor(&self, enabled: bool) {
        self.monitor_enabled.store(enabled, Ordering::SeqCst);
    }
}

impl Drop for CaptureEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

// =============================================================================
// Capture Worker
// =============================================================================

/// State owned by the capture thread
struct CaptureWorker {
    stream: Box<dyn CaptureStream>,
    monitor: Option<Box<dyn PlaybackStream>>,
    monitor_on: bool,
    ring: FrameRing,
    gain: f32,
    vad_threshold_dbfs: f32,
    sink: Arc<dyn PresentationSink>,
    outbound: SyncSender<OutboundVoice>,
    key: Arc<dyn TalkKey>,
    muted: Arc<AtomicBool>,
    monitor_enabled: Arc<AtomicBool>,
    alive: Arc<AtomicBool>,
}

impl CaptureWorker {
    fn alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }

    // =========================================================================
    // Push-to-Talk
    // =========================================================================

    /// Poll the key every [`KEY_POLL_INTERVAL`]; record while held
    fn run_push_to_talk(&mut self) {
        while self.alive() {
            if self.key.is_held() && !self.muted() {
                if let Err(e) = self.press_cycle() {
                    // Non-fatal: the utterance is lost, the session is not
                    self.sink.status_text(&format!("Microphone error: {}", e));
                    self.ring.force_reset();
                    self.stream.stop();
                }
            }
            thread::sleep(KEY_POLL_INTERVAL);
        }
    }

    /// One press: rotate the ring while held, drain on release
    fn press_cycle(&mut self) -> Result<(), String> {
        self.stream.start()?;
        for _ in 0..self.ring.len() {
            self.ring.arm_next().map_err(|e| e.to_string())?;
        }

        while self.alive() && self.key.is_held() && !self.muted() {
            let idx = self
                .ring
                .oldest_in_flight()
                .ok_or_else(|| "capture ring empty mid-press".to_string())?;
            self.wait_fill(idx, true)?;
            let (frame, _) = self.finish_slot(idx)?;
            self.send_frame(frame);
            self.ring.arm_next().map_err(|e| e.to_string())?;
        }

        // Key released (or engine stopping): the in-flight frames drain in
        // arm order before the utterance closes.
        while let Some(idx) = self.ring.oldest_in_flight() {
            self.wait_fill(idx, true)?;
            let (frame, _) = self.finish_slot(idx)?;
            self.send_frame(frame);
        }
        self.send_last();
        self.stream.stop();
        Ok(())
    }

    // =========================================================================
    // Talk-Activated
    // =========================================================================

    /// Continuous rotation gated by peak level with hangover
    fn run_talk_activated(&mut self) {
        if let Err(e) = self.stream.start() {
            self.sink.status_text(&format!("Microphone error: {}", e));
            return;
        }

        let mut talking = false;
        let mut hold = 0u32;

        while self.alive() {
            while self.ring.in_flight() < self.ring.len() {
                if self.ring.arm_next().is_err() {
                    break;
                }
            }
            let Some(idx) = self.ring.oldest_in_flight() else {
                break;
            };

            let (frame, level) = match self.wait_fill(idx, false) {
                Ok(true) => match self.finish_slot(idx) {
                    Ok(out) => out,
                    Err(e) => {
                        self.abort_utterance(&e, &mut talking, &mut hold);
                        if !self.alive() || self.stream.start().is_err() {
                            return;
                        }
                        continue;
                    }
                },
                Ok(false) => break,
                Err(e) => {
                    self.abort_utterance(&e, &mut talking, &mut hold);
                    if !self.alive() || self.stream.start().is_err() {
                        return;
                    }
                    continue;
                }
            };

            let loud = !self.muted() && level >= self.vad_threshold_dbfs;
            if loud {
                talking = true;
                hold = VAD_HANGOVER_FRAMES;
            }
            if talking {
                self.send_frame(frame);
                if !loud {
                    hold = hold.saturating_sub(1);
                    if hold == 0 {
                        talking = false;
                        self.send_last();
                    }
                }
            }
        }

        if talking {
            self.send_last();
        }
        self.ring.force_reset();
        self.stream.stop();
    }

    /// Device error mid-speech: lose the utterance, keep the session
    fn abort_utterance(&mut self, error: &str, talking: &mut bool, hold: &mut u32) {
        self.sink.status_text(&format!("Microphone error: {}", error));
        *talking = false;
        *hold = 0;
        self.ring.force_reset();
        self.stream.stop();
    }

    // =========================================================================
    // Shared Helpers
    // =========================================================================

    /// Poll until the armed slot completes
    ///
    /// With `must_drain` the wait ignores the liveness flag (an in-flight
    /// buffer is never abandoned); otherwise a stop request returns
    /// `Ok(false)`. A stall past [`FILL_TIMEOUT`] is a device error.
    fn wait_fill(&mut self, idx: usize, must_drain: bool) -> Result<bool, String> {
        let deadline = Instant::now() + FILL_TIMEOUT;
        loop {
            if !must_drain && !self.alive() {
                return Ok(false);
            }
            let buffer = self.ring.armed_buffer_mut(idx).map_err(|e| e.to_string())?;
            if self.stream.try_fill(buffer)? {
                self.ring.mark_filled(idx).map_err(|e| e.to_string())?;
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Err("input stream stalled".to_string());
            }
            thread::sleep(DEVICE_POLL_INTERVAL);
        }
    }

    /// Copy a filled slot out, apply gain, feed the meter and monitor
    ///
    /// Returns the gain-adjusted frame and its peak level in dBFS.
    fn finish_slot(&mut self, idx: usize) -> Result<(Vec<i16>, f32), String> {
        let mut frame = self.ring.begin_drain(idx).map_err(|e| e.to_string())?.to_vec();
        self.ring.retire(idx).map_err(|e| e.to_string())?;

        scale_frame(&mut frame, self.gain);
        let level = peak_dbfs(&frame);
        self.sink.mic_level(level);
        self.feed_monitor(&frame);
        Ok((frame, level))
    }

    /// Route the frame to the loopback monitor, honoring the toggle
    fn feed_monitor(&mut self, frame: &[i16]) {
        let Some(monitor) = &mut self.monitor else {
            return;
        };
        let want = self.monitor_enabled.load(Ordering::SeqCst);
        if want != self.monitor_on {
            if want {
                monitor.resume();
            } else {
                monitor.pause();
            }
            self.monitor_on = want;
        }
        if want {
            // Monitor failures are cosmetic; never interrupt capture
            let _ = monitor.submit(frame);
        }
    }

    /// Fire-and-forget frame hand-off; overload drops the frame
    fn send_frame(&self, frame: Vec<i16>) {
        let _ = self.outbound.try_send(OutboundVoice::Frame(frame));
    }

    /// End-of-utterance marker; must not be lost to overload
    fn send_last(&self) {
        let _ = self.outbound.send(OutboundVoice::Last);
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::sync::mpsc::{Receiver, sync_channel};
    use std::time::Duration;

    use super::*;
    use crate::audio::device::testing::MockBackend;
    use crate::audio::ptt::FlagTalkKey;
    use crate::ui::testing::{RecordingSink, SinkEvent};

    struct Rig {
        engine: CaptureEngine,
        backend: Arc<MockBackend>,
        sink: Arc<RecordingSink>,
        key: FlagTalkKey,
        rx: Receiver<OutboundVoice>,
    }

    fn rig(mode: VoiceMode) -> Rig {
        rig_with(|config| config.voice_mode = mode)
    }

    fn rig_with(tweak: impl FnOnce(&mut CaptureConfig)) -> Rig {
        let backend = Arc::new(MockBackend::new());
        let sink = Arc::new(RecordingSink::new());
        let key = FlagTalkKey::new();
        let (tx, rx) = sync_channel(OUTBOUND_QUEUE_FRAMES);
        let mut config = CaptureConfig {
            voice_mode: VoiceMode::PushToTalk,
            input_device: String::new(),
            output_device: String::new(),
            input_gain: 1.0,
            vad_threshold_dbfs: -38.0,
            hear_test_voice: false,
        };
        tweak(&mut config);
        let engine = CaptureEngine::new(
            backend.clone(),
            sink.clone(),
            config,
            Arc::new(key.clone()),
            tx,
        );
        Rig {
            engine,
            backend,
            sink,
            key,
            rx,
        }
    }

    fn numbered_frames(count: usize, value_of: impl Fn(usize) -> i16) -> Vec<Vec<i16>> {
        (0..count).map(|i| vec![value_of(i); 8]).collect()
    }

    /// Drain the channel until the first Last marker
    fn collect_utterance(rx: &Receiver<OutboundVoice>) -> Vec<Vec<i16>> {
        let mut frames = Vec::new();
        loop {
            match rx.recv_timeout(Duration::from_secs(2)) {
                Ok(OutboundVoice::Frame(f)) => frames.push(f),
                Ok(OutboundVoice::Last) => return frames,
                Err(e) => panic!("no end-of-utterance marker: {}", e),
            }
        }
    }

    #[test]
    fn test_open_failure_reports_and_returns_false() {
        let mut rig = rig(VoiceMode::PushToTalk);
        *rig.backend.fail_capture_open.lock().unwrap() = Some("mic busy".to_string());

        assert!(!rig.engine.start());
        assert!(!rig.engine.is_running());
        assert!(
            rig.sink
                .events()
                .iter()
                .any(|e| matches!(e, SinkEvent::Notice(text) if text.contains("mic busy")))
        );
    }

    #[test]
    fn test_ptt_press_transmits_and_sends_one_marker() {
        let mut rig = rig(VoiceMode::PushToTalk);
        rig.backend
            .script_frames(numbered_frames(400, |i| i as i16 + 1));

        assert!(rig.engine.start());
        rig.key.set_held(true);
        // Held across many frame intervals
        thread::sleep(Duration::from_millis(120));
        rig.key.set_held(false);

        let frames = collect_utterance(&rig.rx);
        assert!(!frames.is_empty());
        // FIFO: values strictly increase (drops under overload leave gaps)
        for pair in frames.windows(2) {
            assert!(pair[0][0] < pair[1][0]);
        }

        rig.engine.stop();
        // Exactly one marker for the whole press
        while let Ok(item) = rig.rx.try_recv() {
            assert!(!matches!(item, OutboundVoice::Last));
        }
    }

    #[test]
    fn test_ptt_device_error_aborts_press_without_marker() {
        let mut rig = rig(VoiceMode::PushToTalk);
        rig.backend
            .script_frames(numbered_frames(2, |i| i as i16 + 1));
        rig.backend.script_error("mic unplugged");

        assert!(rig.engine.start());
        rig.key.set_held(true);

        let mut got_frames = 0;
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            match rig.rx.try_recv() {
                Ok(OutboundVoice::Frame(_)) => got_frames += 1,
                Ok(OutboundVoice::Last) => panic!("marker sent despite aborted press"),
                Err(_) => {
                    if rig
                        .sink
                        .events()
                        .iter()
                        .any(|e| matches!(e, SinkEvent::Status(s) if s.contains("mic unplugged")))
                        && got_frames == 2
                    {
                        break;
                    }
                    thread::sleep(Duration::from_millis(5));
                }
            }
        }
        assert_eq!(got_frames, 2);

        rig.key.set_held(false);
        rig.engine.stop();
    }

    #[test]
    fn test_vad_hangover_and_single_marker() {
        let mut rig = rig(VoiceMode::TalkActivated);
        // 3 loud frames, then silence; -38 dBFS threshold, 5000 is loud
        let mut script = numbered_frames(3, |_| 5000);
        script.extend(numbered_frames(20, |_| 0));
        rig.backend.script_frames(script);

        assert!(rig.engine.start());
        let frames = collect_utterance(&rig.rx);
        rig.engine.stop();

        // 3 loud + 4 hangover frames, then exactly one marker
        assert_eq!(frames.len(), 3 + VAD_HANGOVER_FRAMES as usize);
        assert_eq!(frames[0][0], 5000);
        assert_eq!(frames[3][0], 0);
        while let Ok(item) = rig.rx.try_recv() {
            assert!(!matches!(item, OutboundVoice::Last));
        }
    }

    #[test]
    fn test_vad_retrigger_resets_hangover() {
        let mut rig = rig(VoiceMode::TalkActivated);
        // Speech with a single quiet frame inside: no marker in between
        let mut script = numbered_frames(2, |_| 5000);
        script.extend(numbered_frames(1, |_| 0));
        script.extend(numbered_frames(2, |_| 5000));
        script.extend(numbered_frames(10, |_| 0));
        rig.backend.script_frames(script);

        assert!(rig.engine.start());
        let frames = collect_utterance(&rig.rx);
        rig.engine.stop();

        // All 5 speech-window frames plus 4 hangover frames, one utterance
        assert_eq!(frames.len(), 5 + VAD_HANGOVER_FRAMES as usize);
    }

    #[test]
    fn test_gain_saturates() {
        let mut rig = rig_with(|config| {
            config.voice_mode = VoiceMode::TalkActivated;
            config.input_gain = 2.0;
        });
        let mut script = numbered_frames(1, |_| 20_000);
        script.extend(numbered_frames(10, |_| 0));
        rig.backend.script_frames(script);

        assert!(rig.engine.start());
        let frames = collect_utterance(&rig.rx);
        rig.engine.stop();

        // The scripted samples saturate; the zero padding stays zero
        assert!(frames[0][..8].iter().all(|&s| s == i16::MAX));
        assert!(frames[0][8..].iter().all(|&s| s == 0));
    }

    #[test]
    fn test_monitor_receives_loopback_frames() {
        let mut rig = rig_with(|config| {
            config.voice_mode = VoiceMode::TalkActivated;
            config.hear_test_voice = true;
        });
        let mut script = numbered_frames(2, |_| 5000);
        script.extend(numbered_frames(10, |_| 0));
        rig.backend.script_frames(script);

        assert!(rig.engine.start());
        let _ = collect_utterance(&rig.rx);
        rig.engine.stop();

        // Every captured frame went to the monitor, loud or quiet
        assert!(rig.backend.playback_log.submitted().len() >= 2);
    }

    #[test]
    fn test_mic_meter_reports_levels() {
        let mut rig = rig(VoiceMode::TalkActivated);
        let mut script = numbered_frames(1, |_| 5000);
        script.extend(numbered_frames(10, |_| 0));
        rig.backend.script_frames(script);

        assert!(rig.engine.start());
        let _ = collect_utterance(&rig.rx);
        rig.engine.stop();

        assert!(
            rig.sink
                .events()
                .iter()
                .any(|e| matches!(e, SinkEvent::MicLevel(level) if level.is_finite()))
        );
    }

    #[test]
    fn test_stop_is_idempotent() {
        let mut rig = rig(VoiceMode::TalkActivated);
        rig.backend.script_frames(numbered_frames(4, |_| 0));

        assert!(rig.engine.start());
        rig.engine.stop();
        rig.engine.stop();
        assert!(!rig.engine.is_running());
    }

    #[test]
    fn test_muted_ptt_does_not_transmit() {
        let mut rig = rig(VoiceMode::PushToTalk);
        rig.backend.script_frames(numbered_frames(50, |_| 1000));

        assert!(rig.engine.start());
        rig.engine.set_muted(true);
        rig.key.set_held(true);
        thread::sleep(Duration::from_millis(60));
        rig.key.set_held(false);
        rig.engine.stop();

        assert!(rig.rx.try_recv().is_err());
    }
}
