//! Settings snapshot
//!
//! The core reads configuration from this snapshot and never writes it.
//! Where settings live between runs (file, registry, nowhere) is the
//! embedding application's business.

use serde::{Deserialize, Serialize};

use parley_common::DEFAULT_PORT;

// =============================================================================
// Constants
// =============================================================================

/// Default push-to-talk key (backtick)
pub const DEFAULT_PTT_KEY: &str = "`";

/// System default device identifier
pub const SYSTEM_DEFAULT_DEVICE: &str = "";

/// Default voice-activation threshold in dBFS
///
/// Roughly normal speech into a consumer microphone at arm's length.
pub const DEFAULT_VAD_THRESHOLD_DBFS: f32 = -38.0;

// =============================================================================
// Voice Mode
// =============================================================================

/// How outgoing voice transmission is gated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VoiceMode {
    /// Transmit only while the push-to-talk key is held
    #[default]
    PushToTalk,
    /// Transmit whenever the input level crosses the activation threshold
    TalkActivated,
}

impl VoiceMode {
    /// All voice modes for a picker
    pub const ALL: &'static [VoiceMode] = &[VoiceMode::PushToTalk, VoiceMode::TalkActivated];
}

impl std::fmt::Display for VoiceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VoiceMode::PushToTalk => write!(f, "push-to-talk"),
            VoiceMode::TalkActivated => write!(f, "talk-activated"),
        }
    }
}

// =============================================================================
// Settings
// =============================================================================

/// Read-only configuration snapshot consumed by the core
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Nickname presented during the handshake
    #[serde(default)]
    pub nickname: String,

    /// Server host name or address
    #[serde(default)]
    pub server: String,

    /// Server port (TCP control and UDP voice share it)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Server password, empty when none
    #[serde(default)]
    pub password: String,

    /// Push-to-talk key binding
    #[serde(default = "default_ptt_key")]
    pub ptt_key: String,

    /// Input device name (empty string = system default)
    #[serde(default)]
    pub input_device: String,

    /// Output device name (empty string = system default)
    #[serde(default)]
    pub output_device: String,

    /// Master playback volume in percent (100 = unity)
    #[serde(default = "default_percent")]
    pub master_volume: u16,

    /// Input gain in percent (100 = unity)
    #[serde(default = "default_percent")]
    pub input_gain: u16,

    /// Voice-activation threshold in dBFS (negative; closer to 0 is louder)
    #[serde(default = "default_vad_threshold")]
    pub vad_threshold_dbfs: f32,

    /// How outgoing voice is gated
    #[serde(default)]
    pub voice_mode: VoiceMode,

    /// Route the local microphone to the speakers for self-monitoring
    #[serde(default)]
    pub hear_test_voice: bool,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_ptt_key() -> String {
    DEFAULT_PTT_KEY.to_string()
}

fn default_percent() -> u16 {
    100
}

fn default_vad_threshold() -> f32 {
    DEFAULT_VAD_THRESHOLD_DBFS
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            nickname: String::new(),
            server: String::new(),
            port: DEFAULT_PORT,
            password: String::new(),
            ptt_key: default_ptt_key(),
            input_device: SYSTEM_DEFAULT_DEVICE.to_string(),
            output_device: SYSTEM_DEFAULT_DEVICE.to_string(),
            master_volume: 100,
            input_gain: 100,
            vad_threshold_dbfs: DEFAULT_VAD_THRESHOLD_DBFS,
            voice_mode: VoiceMode::default(),
            hear_test_voice: false,
        }
    }
}

impl Settings {
    /// Check if using the system default input device
    pub fn is_default_input(&self) -> bool {
        self.input_device.is_empty()
    }

    /// Check if using the system default output device
    pub fn is_default_output(&self) -> bool {
        self.output_device.is_empty()
    }

    /// Master volume as a scaling factor
    pub fn master_volume_factor(&self) -> f32 {
        f32::from(self.master_volume) / 100.0
    }

    /// Input gain as a scaling factor
    pub fn input_gain_factor(&self) -> f32 {
        f32::from(self.input_gain) / 100.0
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert!(settings.is_default_input());
        assert!(settings.is_default_output());
        assert_eq!(settings.port, DEFAULT_PORT);
        assert_eq!(settings.ptt_key, DEFAULT_PTT_KEY);
        assert_eq!(settings.master_volume, 100);
        assert_eq!(settings.input_gain, 100);
        assert_eq!(settings.voice_mode, VoiceMode::PushToTalk);
        assert!(!settings.hear_test_voice);
        assert!(settings.vad_threshold_dbfs < 0.0);
    }

    #[test]
    fn test_volume_factors() {
        let mut settings = Settings::default();
        assert_eq!(settings.master_volume_factor(), 1.0);
        assert_eq!(settings.input_gain_factor(), 1.0);

        settings.master_volume = 50;
        settings.input_gain = 200;
        assert_eq!(settings.master_volume_factor(), 0.5);
        assert_eq!(settings.input_gain_factor(), 2.0);
    }

    #[test]
    fn test_serialization_roundtrip() {
        let settings = Settings {
            nickname: "alice".to_string(),
            server: "chat.example.net".to_string(),
            port: 7000,
            password: "hunter2".to_string(),
            ptt_key: "F1".to_string(),
            input_device: "USB Microphone".to_string(),
            output_device: "Headphones".to_string(),
            master_volume: 80,
            input_gain: 120,
            vad_threshold_dbfs: -45.0,
            voice_mode: VoiceMode::TalkActivated,
            hear_test_voice: true,
        };

        let json = serde_json::to_string(&settings).expect("serialize");
        let decoded: Settings = serde_json::from_str(&json).expect("deserialize");

        assert_eq!(decoded.nickname, settings.nickname);
        assert_eq!(decoded.server, settings.server);
        assert_eq!(decoded.port, settings.port);
        assert_eq!(decoded.ptt_key, settings.ptt_key);
        assert_eq!(decoded.master_volume, settings.master_volume);
        assert_eq!(decoded.voice_mode, settings.voice_mode);
        assert!(decoded.hear_test_voice);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let decoded: Settings = serde_json::from_str(r#"{"nickname":"bob"}"#).expect("deserialize");
        assert_eq!(decoded.nickname, "bob");
        assert_eq!(decoded.port, DEFAULT_PORT);
        assert_eq!(decoded.ptt_key, DEFAULT_PTT_KEY);
        assert_eq!(decoded.voice_mode, VoiceMode::PushToTalk);
    }

    #[test]
    fn test_voice_mode_all() {
        assert_eq!(VoiceMode::ALL.len(), 2);
        assert!(VoiceMode::ALL.contains(&VoiceMode::PushToTalk));
        assert!(VoiceMode::ALL.contains(&VoiceMode::TalkActivated));
    }
}
