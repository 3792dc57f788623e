//! Application settings structs, defaults and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through TOML files and handed to the live
//! session, the chat path and the relay without sharing references.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::AppPaths;

/// Environment variable that overrides [`LiveConfig::api_key`].
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are the Virtual Floor Assistant at HNB Priority Banking, Sri Lanka.
Help customers with directions, queue numbers, and banking services.
Be warm, professional, and concise (1-3 sentences).
Respond in the same language the customer uses.
IMPORTANT: You must output both AUDIO and the exact transcript of that audio as TEXT.
DO NOT OUTPUT ANY INTERNAL THOUGHTS OR DESCRIPTIONS.
ONLY OUTPUT WHAT YOU ARE SPEAKING.";

// ---------------------------------------------------------------------------
// Modality
// ---------------------------------------------------------------------------

/// Response modality requested from the live model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Modality {
    Text,
    Audio,
}

// ---------------------------------------------------------------------------
// LiveConfig
// ---------------------------------------------------------------------------

/// Settings for the bidirectional live session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    /// Websocket endpoint of the `BidiGenerateContent` service, without the
    /// `key` query parameter.
    pub endpoint: String,
    /// Model identifier, without the `models/` prefix.
    pub model: String,
    /// Prebuilt voice name.  Treated as an opaque string.
    pub voice_name: String,
    /// System instruction sent in the setup message.
    pub system_instruction: String,
    /// Modalities the model should answer with.
    pub response_modalities: Vec<Modality>,
    /// Ask the server to transcribe the microphone stream.
    pub input_transcription: bool,
    /// Ask the server to transcribe its own audio answers.
    pub output_transcription: bool,
    /// API key.  `GEMINI_API_KEY` takes precedence when set.
    pub api_key: Option<String>,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            endpoint: "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent".into(),
            model: "gemini-2.5-flash-native-audio-latest".into(),
            voice_name: "Aoede".into(),
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.into(),
            response_modalities: vec![Modality::Audio],
            input_transcription: true,
            output_transcription: true,
            api_key: None,
        }
    }
}

// ---------------------------------------------------------------------------
// AudioConfig
// ---------------------------------------------------------------------------

/// Settings for capture and playback.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Rate of the microphone stream sent to the model (must be 16 000).
    pub input_sample_rate: u32,
    /// Rate of the assistant audio received from the model (24 000).
    pub output_sample_rate: u32,
    /// Samples per captured frame.
    pub frame_samples: usize,
    /// How often the session checks for finished playback units.
    pub playback_poll_ms: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_sample_rate: 16_000,
            output_sample_rate: 24_000,
            frame_samples: 256,
            playback_poll_ms: 20,
        }
    }
}

// ---------------------------------------------------------------------------
// ChatConfig
// ---------------------------------------------------------------------------

/// Settings for the one-shot (non-live) chat path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Whether typed messages are answered by the model at all.
    pub enabled: bool,
    /// Base URL of the REST API.
    pub base_url: String,
    /// Model used for `generateContent`.
    pub model: String,
    /// Maximum seconds to wait for a completion.
    pub timeout_secs: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "https://generativelanguage.googleapis.com".into(),
            model: "gemini-3-flash-preview".into(),
            timeout_secs: 30,
        }
    }
}

// ---------------------------------------------------------------------------
// RelayConfig
// ---------------------------------------------------------------------------

/// Settings for the broadcast relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Sender name used for assistant events on the relay.
    pub assistant_name: String,
    /// Number of events buffered per subscriber before it starts lagging.
    pub capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            assistant_name: "gemini".into(),
            capacity: 64,
        }
    }
}

// ---------------------------------------------------------------------------
// AppConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level application configuration, serialised as `settings.toml`.
///
/// # Persistence
///
/// ```rust,no_run
/// use live_relay::config::AppConfig;
///
/// // Load (returns Default when file is missing)
/// let config = AppConfig::load().unwrap();
///
/// // Modify and save
/// // config.save().unwrap();
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Live session settings.
    pub live: LiveConfig,
    /// Capture / playback settings.
    pub audio: AudioConfig,
    /// One-shot chat settings.
    pub chat: ChatConfig,
    /// Relay settings.
    pub relay: RelayConfig,
}

impl AppConfig {
    /// Load configuration from the platform-appropriate `settings.toml`.
    ///
    /// Returns `Ok(AppConfig::default())` when the file does not exist yet
    /// (first-run scenario) so callers never need to special-case a missing
    /// file.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    /// Load from an explicit path (useful for tests).
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the platform-appropriate `settings.toml`,
    /// creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    /// Save to an explicit path (useful for tests).
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Resolve the API key: the environment wins over the file.
    ///
    /// Empty strings count as unset.
    pub fn api_key(&self) -> Option<String> {
        resolve_api_key(std::env::var(API_KEY_ENV).ok(), self.live.api_key.clone())
    }
}

fn resolve_api_key(from_env: Option<String>, from_file: Option<String>) -> Option<String> {
    from_env
        .filter(|k| !k.trim().is_empty())
        .or(from_file.filter(|k| !k.trim().is_empty()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    /// Verify that a default `AppConfig` can be serialised to TOML and
    /// deserialised back without any data loss.
    #[test]
    fn round_trip_toml() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("settings.toml");

        let original = AppConfig::default();
        original.save_to(&path).expect("save");

        let loaded = AppConfig::load_from(&path).expect("load");

        // LiveConfig
        assert_eq!(original.live.endpoint, loaded.live.endpoint);
        assert_eq!(original.live.model, loaded.live.model);
        assert_eq!(original.live.voice_name, loaded.live.voice_name);
        assert_eq!(
            original.live.system_instruction,
            loaded.live.system_instruction
        );
        assert_eq!(
            original.live.response_modalities,
            loaded.live.response_modalities
        );
        assert_eq!(original.live.api_key, loaded.live.api_key);

        // AudioConfig
        assert_eq!(
            original.audio.input_sample_rate,
            loaded.audio.input_sample_rate
        );
        assert_eq!(
            original.audio.output_sample_rate,
            loaded.audio.output_sample_rate
        );
        assert_eq!(original.audio.frame_samples, loaded.audio.frame_samples);

        // ChatConfig / RelayConfig
        assert_eq!(original.chat.model, loaded.chat.model);
        assert_eq!(original.chat.timeout_secs, loaded.chat.timeout_secs);
        assert_eq!(original.relay.assistant_name, loaded.relay.assistant_name);
    }

    /// `load_from` on a non-existent path must return `Default` without error.
    #[test]
    fn load_missing_returns_default() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("nonexistent.toml");

        let config = AppConfig::load_from(&path).expect("should not error");
        let default = AppConfig::default();

        assert_eq!(config.live.model, default.live.model);
        assert_eq!(config.audio.frame_samples, default.audio.frame_samples);
        assert_eq!(config.chat.base_url, default.chat.base_url);
    }

    #[test]
    fn default_values() {
        let cfg = AppConfig::default();

        assert_eq!(cfg.live.model, "gemini-2.5-flash-native-audio-latest");
        assert_eq!(cfg.live.voice_name, "Aoede");
        assert_eq!(cfg.live.response_modalities, vec![Modality::Audio]);
        assert!(cfg.live.api_key.is_none());
        assert_eq!(cfg.audio.input_sample_rate, 16_000);
        assert_eq!(cfg.audio.output_sample_rate, 24_000);
        assert_eq!(cfg.audio.frame_samples, 256);
        assert_eq!(cfg.chat.model, "gemini-3-flash-preview");
        assert_eq!(cfg.relay.assistant_name, "gemini");
    }

    /// Voice names are opaque; any string must survive a round trip.
    #[test]
    fn round_trip_modified_values() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("modified.toml");

        let mut cfg = AppConfig::default();
        cfg.live.voice_name = "Puck".into();
        cfg.live.api_key = Some("test-key".into());
        cfg.live.response_modalities = vec![Modality::Text, Modality::Audio];
        cfg.audio.frame_samples = 512;
        cfg.chat.enabled = false;
        cfg.relay.assistant_name = "assistant".into();

        cfg.save_to(&path).expect("save");
        let loaded = AppConfig::load_from(&path).expect("load");

        assert_eq!(loaded.live.voice_name, "Puck");
        assert_eq!(loaded.live.api_key, Some("test-key".into()));
        assert_eq!(
            loaded.live.response_modalities,
            vec![Modality::Text, Modality::Audio]
        );
        assert_eq!(loaded.audio.frame_samples, 512);
        assert!(!loaded.chat.enabled);
        assert_eq!(loaded.relay.assistant_name, "assistant");
    }

    /// A hand-written file with only some keys keeps them and fills the rest
    /// from defaults.
    #[test]
    fn partial_file_keeps_given_keys() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("partial.toml");
        std::fs::write(&path, "[live]\napi_key = \"k\"\n\n[audio]\nframe_samples = 512\n")
            .expect("write");

        let cfg = AppConfig::load_from(&path).expect("partial file should load");
        let default = AppConfig::default();

        assert_eq!(cfg.live.api_key, Some("k".into()));
        assert_eq!(cfg.live.endpoint, default.live.endpoint);
        assert_eq!(cfg.live.voice_name, "Aoede");
        assert_eq!(cfg.audio.frame_samples, 512);
        assert_eq!(cfg.audio.input_sample_rate, 16_000);
        assert_eq!(cfg.chat.model, default.chat.model);
        assert_eq!(cfg.relay.capacity, 64);
    }

    #[test]
    fn env_key_takes_precedence() {
        assert_eq!(
            resolve_api_key(Some("env".into()), Some("file".into())),
            Some("env".into())
        );
        assert_eq!(
            resolve_api_key(None, Some("file".into())),
            Some("file".into())
        );
        assert_eq!(
            resolve_api_key(Some("  ".into()), Some("file".into())),
            Some("file".into())
        );
        assert_eq!(resolve_api_key(None, Some(String::new())), None);
    }
}
