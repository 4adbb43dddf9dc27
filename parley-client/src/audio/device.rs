//! Audio device abstraction and cpal implementation
//!
//! The engines above this layer only need three things from a device:
//! open a stream at the fixed voice format, move frames through it, and
//! release it. [`AudioBackend`] is that seam; the cpal implementation is
//! the production backend and a scripted mock backs the tests.
//!
//! Completion waits are blocking polls against [`DEVICE_POLL_INTERVAL`],
//! not OS wait primitives. The interval is part of the latency contract.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Host, Sample, SampleFormat, StreamConfig};

use parley_common::voice::{VOICE_FRAME_SAMPLES, VOICE_SAMPLE_RATE};

// =============================================================================
// Constants
// =============================================================================

/// System default device display name
pub const SYSTEM_DEFAULT_DEVICE_NAME: &str = "System Default";

/// Poll interval while waiting for a hardware buffer to complete
pub const DEVICE_POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Maximum capture backlog in frames (prevents unbounded growth if the
/// capture loop stalls)
const MAX_CAPTURE_BUFFER_FRAMES: usize = 10;

// =============================================================================
// Backend Traits
// =============================================================================

/// Opens capture and playback streams at the fixed voice format
///
/// Implementations are shared across the capture thread, the network
/// receive path, and the roster, so the backend itself must be `Send +
/// Sync`. The streams it hands out are not: a capture stream stays on the
/// thread that opened it.
pub trait AudioBackend: Send + Sync {
    /// Open the input device, ready to record 16 kHz mono i16
    ///
    /// # Errors
    ///
    /// Returns a device error message if the device is missing or cannot
    /// be opened at the voice format.
    fn open_capture(&self, device_name: &str) -> Result<Box<dyn CaptureStream>, String>;

    /// Open a playback handle on the output device
    ///
    /// # Errors
    ///
    /// Returns a device error message if the device is missing or cannot
    /// be opened at the voice format.
    fn open_playback(&self, device_name: &str) -> Result<Box<dyn PlaybackStream>, String>;
}

/// A microphone stream recording into rotating frames
///
/// Not `Send`: the cpal stream must live on the thread that created it,
/// so the capture engine opens this on its own thread.
pub trait CaptureStream {
    /// Start recording
    fn start(&mut self) -> Result<(), String>;

    /// Stop recording and discard any partial frame
    fn stop(&mut self);

    /// Try to complete one armed frame
    ///
    /// Fills `frame` and returns `Ok(true)` once a full frame has been
    /// recorded; `Ok(false)` means the hardware has not delivered enough
    /// samples yet and the caller should poll again after
    /// [`DEVICE_POLL_INTERVAL`].
    fn try_fill(&mut self, frame: &mut [i16]) -> Result<bool, String>;
}

/// A playback handle accepting frames for one audio stream
///
/// `Send` so a handle opened at peer creation can move into that peer's
/// playback task.
pub trait PlaybackStream: Send {
    /// Queue one frame for rendering
    fn submit(&mut self, frame: &[i16]) -> Result<(), String>;

    /// Frames submitted but not yet fully rendered
    fn pending_frames(&self) -> Result<usize, String>;

    /// Stop rendering without releasing the device
    fn pause(&mut self);

    /// Resume rendering after a pause
    fn resume(&mut self);
}

// =============================================================================
// Device Enumeration
// =============================================================================

/// An audio device entry for pickers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioDeviceEntry {
    /// Device name for display
    pub name: String,
    /// Whether this represents the system default device
    pub is_default: bool,
}

impl AudioDeviceEntry {
    /// Create the system default entry
    pub fn system_default() -> Self {
        Self {
            name: SYSTEM_DEFAULT_DEVICE_NAME.to_string(),
            is_default: true,
        }
    }
}

impl std::fmt::Display for AudioDeviceEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

fn get_host() -> Host {
    cpal::default_host()
}

/// List available input devices, "System Default" first
pub fn list_input_devices() -> Vec<AudioDeviceEntry> {
    let mut devices = vec![AudioDeviceEntry::system_default()];
    if let Ok(inputs) = get_host().input_devices() {
        for device in inputs {
            if let Ok(desc) = device.description() {
                let name = desc.name().to_string();
                if !devices.iter().any(|d| d.name == name) {
                    devices.push(AudioDeviceEntry {
                        name,
                        is_default: false,
                    });
                }
            }
        }
    }
    devices
}

/// List available output devices, "System Default" first
pub fn list_output_devices() -> Vec<AudioDeviceEntry> {
    let mut devices = vec![AudioDeviceEntry::system_default()];
    if let Ok(outputs) = get_host().output_devices() {
        for device in outputs {
            if let Ok(desc) = device.description() {
                let name = desc.name().to_string();
                if !devices.iter().any(|d| d.name == name) {
                    devices.push(AudioDeviceEntry {
                        name,
                        is_default: false,
                    });
                }
            }
        }
    }
    devices
}

/// Find an input device by name, or fall back to the default
fn find_input_device(name: &str) -> Option<Device> {
    let host = get_host();
    if name.is_empty() || name == SYSTEM_DEFAULT_DEVICE_NAME {
        return host.default_input_device();
    }
    host.input_devices()
        .ok()?
        .find(|d| d.description().is_ok_and(|desc| desc.name() == name))
        .or_else(|| host.default_input_device())
}

/// Find an output device by name, or fall back to the default
fn find_output_device(name: &str) -> Option<Device> {
    let host = get_host();
    if name.is_empty() || name == SYSTEM_DEFAULT_DEVICE_NAME {
        return host.default_output_device();
    }
    host.output_devices()
        .ok()?
        .find(|d| d.description().is_ok_and(|desc| desc.name() == name))
        .or_else(|| host.default_output_device())
}

/// Pick channels and sample format supporting the voice rate
///
/// Prefers mono; falls back to stereo (capture downmixes, playback
/// duplicates).
fn pick_config<I>(configs: I) -> Option<(u16, SampleFormat)>
where
    I: Iterator<Item = cpal::SupportedStreamConfigRange> + Clone,
{
    let formats = [SampleFormat::F32, SampleFormat::I16, SampleFormat::U16];
    for channels in [1u16, 2] {
        if let Some(cfg) = configs.clone().find(|c| {
            c.channels() == channels
                && c.min_sample_rate() <= VOICE_SAMPLE_RATE
                && c.max_sample_rate() >= VOICE_SAMPLE_RATE
                && formats.contains(&c.sample_format())
        }) {
            return Some((channels, cfg.sample_format()));
        }
    }
    None
}

// =============================================================================
// Cpal Backend
// =============================================================================

/// Production backend built on cpal
///
/// Playback handles share one output stream per device: the render
/// thread owns the cpal stream (it is not `Send`) and the output callback
/// mixes every handle's queue with saturating adds. Capture streams own
/// their cpal stream directly and stay on the capture thread.
pub struct CpalBackend {
    renderers: Mutex<HashMap<String, Arc<Renderer>>>,
}

impl CpalBackend {
    /// Create the backend; render threads spawn lazily per output device
    pub fn new() -> Self {
        Self {
            renderers: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioBackend for CpalBackend {
    fn open_capture(&self, device_name: &str) -> Result<Box<dyn CaptureStream>, String> {
        CpalCaptureStream::open(device_name).map(|s| Box::new(s) as Box<dyn CaptureStream>)
    }

    fn open_playback(&self, device_name: &str) -> Result<Box<dyn PlaybackStream>, String> {
        let renderer = {
            let mut renderers = self.renderers.lock().expect("renderer table lock");
            match renderers.get(device_name) {
                Some(r) => r.clone(),
                None => {
                    let r = Renderer::spawn(device_name)?;
                    renderers.insert(device_name.to_string(), r.clone());
                    r
                }
            }
        };
        Ok(Box::new(renderer.open_handle()))
    }
}

// =============================================================================
// Cpal Capture
// =============================================================================

/// Microphone stream accumulating i16 samples into a shared buffer
///
/// The cpal callback appends; `try_fill` drains one frame at a time.
struct CpalCaptureStream {
    _stream: cpal::Stream,
    buffer: Arc<Mutex<Vec<i16>>>,
    active: Arc<AtomicBool>,
    error_rx: std_mpsc::Receiver<String>,
}

impl CpalCaptureStream {
    fn open(device_name: &str) -> Result<Self, String> {
        let device =
            find_input_device(device_name).ok_or_else(|| "Input device not found".to_string())?;

        let configs = device
            .supported_input_configs()
            .map_err(|e| format!("Failed to get supported configs: {}", e))?
            .collect::<Vec<_>>();
        let (channels, sample_format) = pick_config(configs.into_iter()).ok_or_else(|| {
            format!(
                "Input device doesn't support {} Hz (required for voice)",
                VOICE_SAMPLE_RATE
            )
        })?;

        let config = StreamConfig {
            channels,
            sample_rate: VOICE_SAMPLE_RATE,
            buffer_size: cpal::BufferSize::Default,
        };

        let buffer = Arc::new(Mutex::new(Vec::with_capacity(VOICE_FRAME_SAMPLES * 4)));
        let active = Arc::new(AtomicBool::new(false));
        let (error_tx, error_rx) = std_mpsc::channel();

        let stream = match sample_format {
            SampleFormat::F32 => build_capture_stream::<f32>(
                &device,
                &config,
                buffer.clone(),
                active.clone(),
                error_tx,
            ),
            SampleFormat::I16 => build_capture_stream::<i16>(
                &device,
                &config,
                buffer.clone(),
                active.clone(),
                error_tx,
            ),
            SampleFormat::U16 => build_capture_stream::<u16>(
                &device,
                &config,
                buffer.clone(),
                active.clone(),
                error_tx,
            ),
            other => return Err(format!("Unsupported sample format: {:?}", other)),
        }?;

        Ok(Self {
            _stream: stream,
            buffer,
            active,
            error_rx,
        })
    }
}

impl CaptureStream for CpalCaptureStream {
    fn start(&mut self) -> Result<(), String> {
        self.active.store(true, Ordering::SeqCst);
        self._stream
            .play()
            .map_err(|e| format!("Failed to start capture: {}", e))
    }

    fn stop(&mut self) {
        self.active.store(false, Ordering::SeqCst);
        if let Ok(mut buf) = self.buffer.lock() {
            buf.clear();
        }
    }

    fn try_fill(&mut self, frame: &mut [i16]) -> Result<bool, String> {
        if let Ok(err) = self.error_rx.try_recv() {
            return Err(err);
        }
        let mut buffer = self.buffer.lock().map_err(|_| "capture buffer poisoned")?;
        if buffer.len() < frame.len() {
            return Ok(false);
        }
        let frame_len = frame.len();
        for (slot, sample) in frame.iter_mut().zip(buffer.drain(..frame_len)) {
            *slot = sample;
        }
        Ok(true)
    }
}

/// Build an input stream converting to mono i16
///
/// Stereo input downmixes by averaging the channel pair.
fn build_capture_stream<T>(
    device: &Device,
    config: &StreamConfig,
    buffer: Arc<Mutex<Vec<i16>>>,
    active: Arc<AtomicBool>,
    error_tx: std_mpsc::Sender<String>,
) -> Result<cpal::Stream, String>
where
    T: Sample + cpal::SizedSample,
    i16: FromSample<T>,
{
    let channels = config.channels as usize;
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                if active.load(Ordering::SeqCst)
                    && let Ok(mut buf) = buffer.lock()
                {
                    if channels == 1 {
                        for sample in data {
                            buf.push(i16::from_sample(*sample));
                        }
                    } else {
                        for pair in data.chunks_exact(2) {
                            let left = i16::from_sample(pair[0]) as i32;
                            let right = i16::from_sample(pair[1]) as i32;
                            buf.push(((left + right) / 2) as i16);
                        }
                    }
                    // Cap the backlog so a stalled consumer doesn't grow it forever
                    let max = VOICE_FRAME_SAMPLES * MAX_CAPTURE_BUFFER_FRAMES;
                    if buf.len() > max {
                        let excess = buf.len() - max;
                        buf.drain(..excess);
                    }
                }
            },
            {
                move |err| {
                    let _ = error_tx.send(format!("Audio capture error: {}", err));
                }
            },
            None,
        )
        .map_err(|e| format!("Failed to build input stream: {}", e))
}

// =============================================================================
// Cpal Render Thread
// =============================================================================

/// Shared state between playback handles and the output callback
struct RenderShared {
    /// Per-handle sample queues
    queues: HashMap<u64, std::collections::VecDeque<i16>>,
    /// Handles whose queues the callback skips
    paused: std::collections::HashSet<u64>,
    /// First callback error, surfaced through `pending_frames`
    error: Option<String>,
}

/// One output device's render thread and mixing state
struct Renderer {
    shared: Arc<Mutex<RenderShared>>,
    next_id: AtomicU64,
    alive: Arc<AtomicBool>,
}

impl Renderer {
    /// Spawn the render thread and wait for the stream to open
    fn spawn(device_name: &str) -> Result<Arc<Self>, String> {
        let shared = Arc::new(Mutex::new(RenderShared {
            queues: HashMap::new(),
            paused: std::collections::HashSet::new(),
            error: None,
        }));
        let alive = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<(), String>>();

        let thread_shared = shared.clone();
        let thread_alive = alive.clone();
        let name = device_name.to_string();
        // The cpal stream is not Send, so it lives and dies on this thread
        thread::spawn(move || {
            let stream = match open_render_stream(&name, thread_shared.clone()) {
                Ok(s) => {
                    let _ = ready_tx.send(Ok(()));
                    s
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            if let Err(e) = stream.play() {
                if let Ok(mut s) = thread_shared.lock() {
                    s.error = Some(format!("Failed to start playback: {}", e));
                }
            }
            while thread_alive.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(50));
            }
        });

        ready_rx
            .recv()
            .map_err(|_| "Render thread exited before opening the device".to_string())??;

        Ok(Arc::new(Self {
            shared,
            next_id: AtomicU64::new(1),
            alive,
        }))
    }

    fn open_handle(self: &Arc<Self>) -> CpalPlaybackStream {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.shared
            .lock()
            .expect("render state lock")
            .queues
            .insert(id, std::collections::VecDeque::new());
        CpalPlaybackStream {
            shared: self.shared.clone(),
            id,
        }
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::SeqCst);
    }
}

/// Open the shared output stream for one device
fn open_render_stream(
    device_name: &str,
    shared: Arc<Mutex<RenderShared>>,
) -> Result<cpal::Stream, String> {
    let device =
        find_output_device(device_name).ok_or_else(|| "Output device not found".to_string())?;

    let configs = device
        .supported_output_configs()
        .map_err(|e| format!("Failed to get supported configs: {}", e))?
        .collect::<Vec<_>>();
    let (channels, sample_format) = pick_config(configs.into_iter()).ok_or_else(|| {
        format!(
            "Output device doesn't support {} Hz (required for voice)",
            VOICE_SAMPLE_RATE
        )
    })?;

    let config = StreamConfig {
        channels,
        sample_rate: VOICE_SAMPLE_RATE,
        buffer_size: cpal::BufferSize::Default,
    };

    match sample_format {
        SampleFormat::F32 => build_render_stream::<f32>(&device, &config, shared),
        SampleFormat::I16 => build_render_stream::<i16>(&device, &config, shared),
        SampleFormat::U16 => build_render_stream::<u16>(&device, &config, shared),
        other => Err(format!("Unsupported sample format: {:?}", other)),
    }
}

/// Build an output stream mixing every handle's queue
///
/// Mono devices get the mix directly; stereo devices get it duplicated
/// into both channels.
fn build_render_stream<T>(
    device: &Device,
    config: &StreamConfig,
    shared: Arc<Mutex<RenderShared>>,
) -> Result<cpal::Stream, String>
where
    T: Sample + cpal::SizedSample + FromSample<i16>,
{
    let channels = config.channels as usize;
    let callback_shared = shared.clone();
    device
        .build_output_stream(
            config,
            move |out: &mut [T], _: &cpal::OutputCallbackInfo| {
                let Ok(mut state) = callback_shared.lock() else {
                    return;
                };
                let RenderShared { queues, paused, .. } = &mut *state;
                let frames = out.len() / channels;
                for i in 0..frames {
                    let mut mixed: i32 = 0;
                    for (id, queue) in queues.iter_mut() {
                        if paused.contains(id) {
                            continue;
                        }
                        if let Some(sample) = queue.pop_front() {
                            mixed += sample as i32;
                        }
                    }
                    let sample = mixed.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
                    for ch in 0..channels {
                        out[i * channels + ch] = T::from_sample(sample);
                    }
                }
            },
            move |err| {
                if let Ok(mut state) = shared.lock() {
                    state.error.get_or_insert(format!("Audio playback error: {}", err));
                }
            },
            None,
        )
        .map_err(|e| format!("Failed to build output stream: {}", e))
}

/// One handle onto the shared render stream
///
/// `Send` by construction: it only carries the shared mixing state and an
/// id, never the cpal stream itself.
struct CpalPlaybackStream {
    shared: Arc<Mutex<RenderShared>>,
    id: u64,
}

impl PlaybackStream for CpalPlaybackStream {
    fn submit(&mut self, frame: &[i16]) -> Result<(), String> {
        let mut state = self.shared.lock().map_err(|_| "render state poisoned")?;
        if let Some(err) = state.error.clone() {
            return Err(err);
        }
        let queue = state
            .queues
            .get_mut(&self.id)
            .ok_or_else(|| "playback handle released".to_string())?;
        queue.extend(frame.iter().copied());
        Ok(())
    }

    fn pending_frames(&self) -> Result<usize, String> {
        let state = self.shared.lock().map_err(|_| "render state poisoned")?;
        if let Some(err) = state.error.clone() {
            return Err(err);
        }
        let queued = state.queues.get(&self.id).map_or(0, |q| q.len());
        Ok(queued.div_ceil(VOICE_FRAME_SAMPLES))
    }

    fn pause(&mut self) {
        if let Ok(mut state) = self.shared.lock() {
            state.paused.insert(self.id);
        }
    }

    fn resume(&mut self) {
        if let Ok(mut state) = self.shared.lock() {
            state.paused.remove(&self.id);
        }
    }
}

impl Drop for CpalPlaybackStream {
    fn drop(&mut self) {
        if let Ok(mut state) = self.shared.lock() {
            state.queues.remove(&self.id);
            state.paused.remove(&self.id);
        }
    }
}

// =============================================================================
// Mock Backend (tests)
// =============================================================================

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};

    use super::{AudioBackend, CaptureStream, PlaybackStream};

    /// Cadence at which the mock microphone delivers scripted frames
    ///
    /// Nonzero so capture-loop tests see hardware-like pacing instead of
    /// an instantly exhausted script.
    const MOCK_FRAME_INTERVAL: Duration = Duration::from_millis(5);

    /// Scripted backend: capture yields pre-loaded frames, playback
    /// records submissions and drains one frame per completion poll.
    pub struct MockBackend {
        /// Frames the next opened capture stream will yield, one per poll
        pub capture_script: Mutex<VecDeque<Result<Vec<i16>, String>>>,
        /// When set, opening any capture stream fails with this message
        pub fail_capture_open: Mutex<Option<String>>,
        /// When set, opening any playback stream fails with this message
        pub fail_playback_open: Mutex<Option<String>>,
        /// Recorder shared by every playback stream this backend opens
        pub playback_log: Arc<PlaybackLog>,
        /// Playback submissions fail once this many frames were accepted
        pub playback_fail_after: Mutex<Option<usize>>,
    }

    /// Frames observed at the (mock) playback device, in submit order
    #[derive(Default)]
    pub struct PlaybackLog {
        pub frames: Mutex<Vec<Vec<i16>>>,
    }

    impl PlaybackLog {
        pub fn submitted(&self) -> Vec<Vec<i16>> {
            self.frames.lock().expect("playback log lock").clone()
        }
    }

    impl MockBackend {
        pub fn new() -> Self {
            Self {
                capture_script: Mutex::new(VecDeque::new()),
                fail_capture_open: Mutex::new(None),
                fail_playback_open: Mutex::new(None),
                playback_log: Arc::new(PlaybackLog::default()),
                playback_fail_after: Mutex::new(None),
            }
        }

        pub fn script_frames(&self, frames: impl IntoIterator<Item = Vec<i16>>) {
            let mut script = self.capture_script.lock().expect("script lock");
            script.extend(frames.into_iter().map(Ok));
        }

        pub fn script_error(&self, message: &str) {
            self.capture_script
                .lock()
                .expect("script lock")
                .push_back(Err(message.to_string()));
        }
    }

    impl AudioBackend for MockBackend {
        fn open_capture(&self, _device_name: &str) -> Result<Box<dyn CaptureStream>, String> {
            if let Some(err) = self.fail_capture_open.lock().expect("lock").clone() {
                return Err(err);
            }
            let script =
                std::mem::take(&mut *self.capture_script.lock().expect("script lock"));
            Ok(Box::new(MockCaptureStream {
                script,
                started: false,
                last_fill: None,
            }))
        }

        fn open_playback(&self, _device_name: &str) -> Result<Box<dyn PlaybackStream>, String> {
            if let Some(err) = self.fail_playback_open.lock().expect("lock").clone() {
                return Err(err);
            }
            Ok(Box::new(MockPlaybackStream {
                log: self.playback_log.clone(),
                fail_after: *self.playback_fail_after.lock().expect("lock"),
                accepted: 0,
                pending: AtomicUsize::new(0),
                paused: AtomicBool::new(false),
            }))
        }
    }

    /// Capture stream yielding scripted entries at a fixed cadence
    pub struct MockCaptureStream {
        script: VecDeque<Result<Vec<i16>, String>>,
        started: bool,
        last_fill: Option<Instant>,
    }

    impl CaptureStream for MockCaptureStream {
        fn start(&mut self) -> Result<(), String> {
            self.started = true;
            self.last_fill = None;
            Ok(())
        }

        fn stop(&mut self) {
            self.started = false;
        }

        fn try_fill(&mut self, frame: &mut [i16]) -> Result<bool, String> {
            if !self.started {
                return Ok(false);
            }
            if let Some(last) = self.last_fill
                && last.elapsed() < MOCK_FRAME_INTERVAL
            {
                return Ok(false);
            }
            match self.script.pop_front() {
                Some(Ok(samples)) => {
                    let n = frame.len().min(samples.len());
                    frame[..n].copy_from_slice(&samples[..n]);
                    for slot in frame[n..].iter_mut() {
                        *slot = 0;
                    }
                    self.last_fill = Some(Instant::now());
                    Ok(true)
                }
                Some(Err(e)) => Err(e),
                None => Ok(false),
            }
        }
    }

    /// Playback stream draining one pending frame per `pending_frames` poll
    pub struct MockPlaybackStream {
        log: Arc<PlaybackLog>,
        fail_after: Option<usize>,
        accepted: usize,
        pending: AtomicUsize,
        paused: AtomicBool,
    }

    impl PlaybackStream for MockPlaybackStream {
        fn submit(&mut self, frame: &[i16]) -> Result<(), String> {
            if let Some(limit) = self.fail_after
                && self.accepted >= limit
            {
                return Err("mock device write failure".to_string());
            }
            self.accepted += 1;
            self.pending.fetch_add(1, Ordering::SeqCst);
            self.log
                .frames
                .lock()
                .expect("playback log lock")
                .push(frame.to_vec());
            Ok(())
        }

        fn pending_frames(&self) -> Result<usize, String> {
            // Each poll models one frame interval of hardware progress
            let pending = self.pending.load(Ordering::SeqCst);
            if !self.paused.load(Ordering::SeqCst) && pending > 0 {
                self.pending.store(pending - 1, Ordering::SeqCst);
            }
            Ok(pending)
        }

        fn pause(&mut self) {
            self.paused.store(true, Ordering::SeqCst);
        }

        fn resume(&mut self) {
            self.paused.store(false, Ordering::SeqCst);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::testing::MockBackend;
    use super::*;

    #[test]
    fn test_poll_interval_is_tight() {
        // The completion poll must stay in the low single-digit milliseconds
        assert!(DEVICE_POLL_INTERVAL >= Duration::from_millis(2));
        assert!(DEVICE_POLL_INTERVAL <= Duration::from_millis(3));
    }

    #[test]
    fn test_mock_capture_scripted_frames() {
        let backend = MockBackend::new();
        backend.script_frames(vec![vec![1i16; VOICE_FRAME_SAMPLES]]);

        let mut stream = backend.open_capture("").expect("open");
        let mut frame = vec![0i16; VOICE_FRAME_SAMPLES];

        // Not started yet: no frames
        assert!(!stream.try_fill(&mut frame).expect("poll"));

        stream.start().expect("start");
        assert!(stream.try_fill(&mut frame).expect("poll"));
        assert_eq!(frame[0], 1);

        // Script exhausted
        assert!(!stream.try_fill(&mut frame).expect("poll"));
    }

    #[test]
    fn test_mock_capture_scripted_error() {
        let backend = MockBackend::new();
        backend.script_error("device unplugged");

        let mut stream = backend.open_capture("").expect("open");
        stream.start().expect("start");
        let mut frame = vec![0i16; VOICE_FRAME_SAMPLES];
        assert!(stream.try_fill(&mut frame).is_err());
    }

    #[test]
    fn test_mock_playback_drains_per_poll() {
        let backend = MockBackend::new();
        let mut stream = backend.open_playback("").expect("open");

        stream.submit(&[1i16; 4]).expect("submit");
        stream.submit(&[2i16; 4]).expect("submit");

        assert_eq!(stream.pending_frames().expect("poll"), 2);
        assert_eq!(stream.pending_frames().expect("poll"), 1);
        assert_eq!(stream.pending_frames().expect("poll"), 0);

        let log = backend.playback_log.submitted();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0], vec![1i16; 4]);
    }

    #[test]
    fn test_mock_playback_fail_after() {
        let backend = MockBackend::new();
        *backend.playback_fail_after.lock().expect("lock") = Some(1);
        let mut stream = backend.open_playback("").expect("open");

        assert!(stream.submit(&[0i16; 4]).is_ok());
        assert!(stream.submit(&[0i16; 4]).is_err());
    }

    #[test]
    fn test_open_failures_scripted() {
        let backend = MockBackend::new();
        *backend.fail_capture_open.lock().expect("lock") = Some("no mic".to_string());
        *backend.fail_playback_open.lock().expect("lock") = Some("no speakers".to_string());

        assert!(backend.open_capture("").is_err());
        assert!(backend.open_playback("").is_err());
    }

    // The enumeration tests talk to the real audio host; serialize them so
    // concurrent host setup doesn't trip platform audio backends.

    #[test]
    #[serial_test::serial]
    fn test_input_enumeration_lists_default_first() {
        let devices = list_input_devices();
        assert!(!devices.is_empty());
        assert_eq!(devices[0].name, SYSTEM_DEFAULT_DEVICE_NAME);
        assert!(devices[0].is_default);
    }

    #[test]
    #[serial_test::serial]
    fn test_output_enumeration_lists_default_first() {
        let devices = list_output_devices();
        assert!(!devices.is_empty());
        assert_eq!(devices[0].name, SYSTEM_DEFAULT_DEVICE_NAME);
        assert!(devices[0].is_default);
    }
}
