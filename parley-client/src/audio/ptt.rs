//! Push-to-talk key state
//!
//! The capture loop polls the key every [`KEY_POLL_INTERVAL`] through the
//! [`TalkKey`] trait. The production implementation registers a global
//! hotkey and pumps its event receiver on a dedicated thread into an
//! atomic held flag; tests and embedders that drive the key themselves
//! use [`FlagTalkKey`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::TryRecvError;
use global_hotkey::hotkey::{Code, HotKey, Modifiers};
use global_hotkey::{GlobalHotKeyEvent, GlobalHotKeyManager, HotKeyState};

// =============================================================================
// Constants
// =============================================================================

/// How often the capture loop samples the key state
pub const KEY_POLL_INTERVAL: Duration = Duration::from_millis(15);

// =============================================================================
// Talk Key
// =============================================================================

/// Source of the "is the talk key currently held" signal
pub trait TalkKey: Send + Sync {
    /// Whether the key is held right now
    fn is_held(&self) -> bool;
}

/// Talk key driven by the embedder instead of a global hotkey
///
/// Useful in tests and on platforms where global hotkey registration is
/// unavailable.
#[derive(Clone, Default)]
pub struct FlagTalkKey {
    held: Arc<AtomicBool>,
}

impl FlagTalkKey {
    /// Create a released key
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the held state
    pub fn set_held(&self, held: bool) {
        self.held.store(held, Ordering::SeqCst);
    }
}

impl TalkKey for FlagTalkKey {
    fn is_held(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Global Hotkey Talk Key
// =============================================================================

/// Talk key backed by a system-wide hotkey
///
/// The hotkey manager and its event receiver live on a dedicated thread
/// (the manager is not portable across threads on every platform); the
/// thread folds press/release events into the shared held flag.
pub struct HotkeyTalkKey {
    held: Arc<AtomicBool>,
    alive: Arc<AtomicBool>,
}

impl HotkeyTalkKey {
    /// Register `key` as the push-to-talk hotkey
    ///
    /// # Errors
    ///
    /// Returns an error if the key string is unknown or the hotkey system
    /// rejects the registration.
    pub fn new(key: &str) -> Result<Self, String> {
        let code = parse_key_code(key)?;
        let held = Arc::new(AtomicBool::new(false));
        let alive = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<(), String>>();

        let thread_held = held.clone();
        let thread_alive = alive.clone();
        thread::spawn(move || {
            let manager = match GlobalHotKeyManager::new() {
                Ok(m) => m,
                Err(e) => {
                    let _ = ready_tx.send(Err(format!("Failed to initialize hotkeys: {}", e)));
                    return;
                }
            };
            let hotkey = HotKey::new(Some(Modifiers::empty()), code);
            if let Err(e) = manager.register(hotkey) {
                let _ = ready_tx.send(Err(format!("Failed to register hotkey: {}", e)));
                return;
            }
            let _ = ready_tx.send(Ok(()));

            let receiver = GlobalHotKeyEvent::receiver();
            while thread_alive.load(Ordering::SeqCst) {
                match receiver.try_recv() {
                    Ok(event) => {
                        if event.id() == hotkey.id() {
                            let pressed = event.state() == HotKeyState::Pressed;
                            thread_held.store(pressed, Ordering::SeqCst);
                        }
                    }
                    Err(TryRecvError::Empty) => thread::sleep(KEY_POLL_INTERVAL),
                    Err(TryRecvError::Disconnected) => break,
                }
            }
            let _ = manager.unregister(hotkey);
        });

        ready_rx
            .recv()
            .map_err(|_| "Hotkey thread exited during setup".to_string())??;

        Ok(Self { held, alive })
    }
}

impl TalkKey for HotkeyTalkKey {
    fn is_held(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }
}

impl Drop for HotkeyTalkKey {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::SeqCst);
    }
}

// =============================================================================
// Key Code Parsing
// =============================================================================

const LETTER_CODES: [Code; 26] = [
    Code::KeyA,
    Code::KeyB,
    Code::KeyC,
    Code::KeyD,
    Code::KeyE,
    Code::KeyF,
    Code::KeyG,
    Code::KeyH,
    Code::KeyI,
    Code::KeyJ,
    Code::KeyK,
    Code::KeyL,
    Code::KeyM,
    Code::KeyN,
    Code::KeyO,
    Code::KeyP,
    Code::KeyQ,
    Code::KeyR,
    Code::KeyS,
    Code::KeyT,
    Code::KeyU,
    Code::KeyV,
    Code::KeyW,
    Code::KeyX,
    Code::KeyY,
    Code::KeyZ,
];

const DIGIT_CODES: [Code; 10] = [
    Code::Digit0,
    Code::Digit1,
    Code::Digit2,
    Code::Digit3,
    Code::Digit4,
    Code::Digit5,
    Code::Digit6,
    Code::Digit7,
    Code::Digit8,
    Code::Digit9,
];

const FUNCTION_CODES: [Code; 12] = [
    Code::F1,
    Code::F2,
    Code::F3,
    Code::F4,
    Code::F5,
    Code::F6,
    Code::F7,
    Code::F8,
    Code::F9,
    Code::F10,
    Code::F11,
    Code::F12,
];

const NAMED_CODES: &[(&str, Code)] = &[
    ("`", Code::Backquote),
    ("backquote", Code::Backquote),
    ("grave", Code::Backquote),
    ("-", Code::Minus),
    ("=", Code::Equal),
    ("[", Code::BracketLeft),
    ("]", Code::BracketRight),
    ("\\", Code::Backslash),
    (";", Code::Semicolon),
    ("'", Code::Quote),
    (",", Code::Comma),
    (".", Code::Period),
    ("/", Code::Slash),
    ("space", Code::Space),
    ("enter", Code::Enter),
    ("return", Code::Enter),
    ("tab", Code::Tab),
    ("escape", Code::Escape),
    ("esc", Code::Escape),
    ("backspace", Code::Backspace),
    ("delete", Code::Delete),
    ("insert", Code::Insert),
    ("home", Code::Home),
    ("end", Code::End),
    ("pageup", Code::PageUp),
    ("pagedown", Code::PageDown),
    ("up", Code::ArrowUp),
    ("down", Code::ArrowDown),
    ("left", Code::ArrowLeft),
    ("right", Code::ArrowRight),
];

/// Parse a key binding string into a key code
///
/// Accepts single characters ("`", "a", "5"), function keys ("F1"), and
/// the common named keys ("Space", "Escape"). Case-insensitive.
///
/// # Errors
///
/// Returns an error naming the unrecognized key string.
pub fn parse_key_code(key: &str) -> Result<Code, String> {
    let k = key.trim().to_lowercase();

    if k.len() == 1 {
        let ch = k.chars().next().expect("one char");
        if ch.is_ascii_lowercase() {
            return Ok(LETTER_CODES[(ch as u8 - b'a') as usize]);
        }
        if ch.is_ascii_digit() {
            return Ok(DIGIT_CODES[(ch as u8 - b'0') as usize]);
        }
    }

    if let Some(rest) = k.strip_prefix('f')
        && let Ok(n) = rest.parse::<usize>()
        && (1..=12).contains(&n)
    {
        return Ok(FUNCTION_CODES[n - 1]);
    }

    NAMED_CODES
        .iter()
        .find(|(name, _)| *name == k)
        .map(|(_, code)| *code)
        .ok_or_else(|| format!("Unknown key code: {}", key))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_letters_and_digits() {
        assert_eq!(parse_key_code("a").expect("parse"), Code::KeyA);
        assert_eq!(parse_key_code("Z").expect("parse"), Code::KeyZ);
        assert_eq!(parse_key_code("0").expect("parse"), Code::Digit0);
        assert_eq!(parse_key_code("9").expect("parse"), Code::Digit9);
    }

    #[test]
    fn test_parse_function_keys() {
        assert_eq!(parse_key_code("F1").expect("parse"), Code::F1);
        assert_eq!(parse_key_code("f12").expect("parse"), Code::F12);
        assert!(parse_key_code("F13").is_err());
        assert!(parse_key_code("F0").is_err());
    }

    #[test]
    fn test_parse_named_keys() {
        assert_eq!(parse_key_code("`").expect("parse"), Code::Backquote);
        assert_eq!(parse_key_code("Space").expect("parse"), Code::Space);
        assert_eq!(parse_key_code("ESC").expect("parse"), Code::Escape);
        assert_eq!(parse_key_code(" enter ").expect("parse"), Code::Enter);
    }

    #[test]
    fn test_parse_unknown_key() {
        let err = parse_key_code("hyperkey").expect_err("should fail");
        assert!(err.contains("hyperkey"));
    }

    #[test]
    fn test_flag_talk_key() {
        let key = FlagTalkKey::new();
        assert!(!key.is_held());
        key.set_held(true);
        assert!(key.is_held());
        key.set_held(false);
        assert!(!key.is_held());
    }

    #[test]
    fn test_key_poll_interval() {
        // The press/release sampling cadence the capture loop relies on
        assert_eq!(KEY_POLL_INTERVAL, Duration::from_millis(15));
    }
}
