//! Provisioning configuration and install paths.

pub mod paths;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

pub use paths::AppPaths;

use crate::platform::PlatformProfile;

/// Piper release whose binaries are provisioned.
pub const PIPER_RELEASE: &str = "2023.11.14-2";
pub const DEFAULT_RELEASE_URL: &str =
    "https://github.com/rhasspy/piper/releases/download/2023.11.14-2";
pub const DEFAULT_VOICES_URL: &str = "https://huggingface.co/rhasspy/piper-voices/resolve/v1.0.0";
pub const DEFAULT_VOICE: &str = "en_US-amy-medium";
pub const DEFAULT_SPEED: f32 = 1.0;
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const MIN_SPEED: f32 = 0.5;
pub const MAX_SPEED: f32 = 2.0;

/// Where binaries and voices are downloaded from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadSources {
    /// Base URL holding `piper_<archive_key>.<ext>` release assets.
    pub release_url: String,
    /// Release tag recorded in the `.version` marker.
    pub release_tag: String,
    /// Base URL of the voice repository.
    pub voices_url: String,
}

impl Default for DownloadSources {
    fn default() -> Self {
        Self {
            release_url: DEFAULT_RELEASE_URL.into(),
            release_tag: PIPER_RELEASE.into(),
            voices_url: DEFAULT_VOICES_URL.into(),
        }
    }
}

/// Defaults supplied by the environment.
///
/// Env overrides:
/// - PIPER_KIT_VOICE, PIPER_KIT_SPEED, PIPER_KIT_TIMEOUT_MS
/// - PIPER_KIT_RELEASE_URL, PIPER_KIT_VOICES_URL
#[derive(Debug, Clone)]
pub struct EnvSettings {
    pub default_voice: String,
    pub default_speed: f32,
    pub timeout_ms: u64,
    pub sources: DownloadSources,
}

impl Default for EnvSettings {
    fn default() -> Self {
        Self {
            default_voice: DEFAULT_VOICE.into(),
            default_speed: DEFAULT_SPEED,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            sources: DownloadSources::default(),
        }
    }
}

impl EnvSettings {
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        if let Ok(voice) = std::env::var("PIPER_KIT_VOICE") {
            settings.default_voice = voice;
        }
        if let Some(speed) = env_parse::<f32>("PIPER_KIT_SPEED") {
            if validate_speed(speed).is_ok() {
                settings.default_speed = speed;
            } else {
                warn!(speed, "PIPER_KIT_SPEED out of range, using default");
            }
        }
        if let Some(ms) = env_parse::<u64>("PIPER_KIT_TIMEOUT_MS") {
            settings.timeout_ms = ms;
        }
        if let Ok(url) = std::env::var("PIPER_KIT_RELEASE_URL") {
            settings.sources.release_url = url;
        }
        if let Ok(url) = std::env::var("PIPER_KIT_VOICES_URL") {
            settings.sources.voices_url = url;
        }
        settings
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(key, value = %raw, "Ignoring unparseable environment override");
            None
        }
    }
}

/// Configuration owned by the engine.
///
/// `binary_path` and `models_dir` are fixed at construction; the rest can be
/// changed through [`ProvisionConfig::apply`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionConfig {
    binary_path: PathBuf,
    models_dir: PathBuf,
    pub default_voice: String,
    pub default_speed: f32,
    pub synthesis_timeout_ms: u64,
    pub sources: DownloadSources,
}

impl ProvisionConfig {
    pub fn new(paths: &AppPaths, profile: &PlatformProfile, settings: EnvSettings) -> Self {
        Self {
            binary_path: paths.bin.join("piper").join(profile.binary_name()),
            models_dir: paths.models.clone(),
            default_voice: settings.default_voice,
            default_speed: settings.default_speed,
            synthesis_timeout_ms: settings.timeout_ms,
            sources: settings.sources,
        }
    }

    pub fn binary_path(&self) -> &Path {
        &self.binary_path
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    pub fn synthesis_timeout(&self) -> Duration {
        Duration::from_millis(self.synthesis_timeout_ms)
    }

    /// Apply a single validated change.
    pub fn apply(&mut self, update: ConfigUpdate) -> Result<(), ConfigError> {
        match update {
            ConfigUpdate::DefaultVoice(voice) => {
                if voice.trim().is_empty() {
                    return Err(ConfigError::InvalidValue {
                        key: "defaultVoice".into(),
                        reason: "must not be empty".into(),
                    });
                }
                self.default_voice = voice;
            }
            ConfigUpdate::DefaultSpeed(speed) => {
                validate_speed(speed).map_err(|reason| ConfigError::InvalidValue {
                    key: "defaultSpeed".into(),
                    reason,
                })?;
                self.default_speed = speed;
            }
            ConfigUpdate::SynthesisTimeoutMs(ms) => {
                if ms == 0 {
                    return Err(ConfigError::InvalidValue {
                        key: "synthesisTimeoutMs".into(),
                        reason: "must be greater than zero".into(),
                    });
                }
                self.synthesis_timeout_ms = ms;
            }
        }
        Ok(())
    }
}

/// The keys callers are allowed to change at runtime.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigUpdate {
    DefaultVoice(String),
    DefaultSpeed(f32),
    SynthesisTimeoutMs(u64),
}

impl ConfigUpdate {
    /// Parse a `key`/JSON `value` pair as sent over IPC.
    pub fn from_key_value(key: &str, value: &serde_json::Value) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidValue {
            key: key.to_string(),
            reason: reason.to_string(),
        };
        match key {
            "defaultVoice" => value
                .as_str()
                .map(|s| Self::DefaultVoice(s.to_string()))
                .ok_or_else(|| invalid("expected a string")),
            "defaultSpeed" => value
                .as_f64()
                .map(|v| Self::DefaultSpeed(v as f32))
                .ok_or_else(|| invalid("expected a number")),
            "synthesisTimeoutMs" => value
                .as_u64()
                .map(Self::SynthesisTimeoutMs)
                .ok_or_else(|| invalid("expected a positive integer")),
            other => Err(ConfigError::UnknownKey(other.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown config key: {0}")]
    UnknownKey(String),
    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
}

/// Check that a speed multiplier is finite and within 0.5–2.0.
pub fn validate_speed(speed: f32) -> Result<(), String> {
    if !speed.is_finite() || !(MIN_SPEED..=MAX_SPEED).contains(&speed) {
        return Err(format!(
            "speed must be between {} and {}, got {}",
            MIN_SPEED, MAX_SPEED, speed
        ));
    }
    Ok(())
}

/// Generic helper: read a JSON file and deserialize it.
pub fn read_json_file<T: serde::de::DeserializeOwned>(path: &Path) -> Option<T> {
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str(&contents) {
            Ok(val) => Some(val),
            Err(e) => {
                warn!("Failed to parse {}: {}", path.display(), e);
                None
            }
        },
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to read {}: {}", path.display(), e);
            }
            None
        }
    }
}

/// Subset of a voice's `.onnx.json` sidecar that synthesis cares about.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub audio: ModelAudioConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelAudioConfig {
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
}

impl Default for ModelAudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
        }
    }
}

fn default_sample_rate() -> u32 {
    crate::wav::DEFAULT_SAMPLE_RATE
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform;

    fn config() -> ProvisionConfig {
        let paths = AppPaths::from_base("/tmp/pk");
        let profile = platform::resolve_for("linux", "x86_64").unwrap();
        ProvisionConfig::new(&paths, &profile, EnvSettings::default())
    }

    #[test]
    fn test_binary_path_layout() {
        let cfg = config();
        assert_eq!(cfg.binary_path(), Path::new("/tmp/pk/bin/piper/piper"));
        assert_eq!(cfg.models_dir(), Path::new("/tmp/pk/models"));
        assert_eq!(cfg.synthesis_timeout(), Duration::from_millis(30_000));
    }

    #[test]
    fn test_apply_updates() {
        let mut cfg = config();
        cfg.apply(ConfigUpdate::DefaultSpeed(1.5)).unwrap();
        cfg.apply(ConfigUpdate::DefaultVoice("en_GB-alba-medium".into()))
            .unwrap();
        cfg.apply(ConfigUpdate::SynthesisTimeoutMs(5_000)).unwrap();
        assert_eq!(cfg.default_speed, 1.5);
        assert_eq!(cfg.default_voice, "en_GB-alba-medium");
        assert_eq!(cfg.synthesis_timeout_ms, 5_000);
    }

    #[test]
    fn test_apply_rejects_out_of_range_speed() {
        let mut cfg = config();
        assert!(cfg.apply(ConfigUpdate::DefaultSpeed(2.5)).is_err());
        assert!(cfg.apply(ConfigUpdate::DefaultSpeed(f32::NAN)).is_err());
        assert!(cfg.apply(ConfigUpdate::SynthesisTimeoutMs(0)).is_err());
        assert_eq!(cfg.default_speed, DEFAULT_SPEED);
    }

    #[test]
    fn test_from_key_value() {
        let update =
            ConfigUpdate::from_key_value("defaultSpeed", &serde_json::json!(0.75)).unwrap();
        assert_eq!(update, ConfigUpdate::DefaultSpeed(0.75));
        assert!(matches!(
            ConfigUpdate::from_key_value("binaryPath", &serde_json::json!("/x")),
            Err(ConfigError::UnknownKey(_))
        ));
        assert!(matches!(
            ConfigUpdate::from_key_value("synthesisTimeoutMs", &serde_json::json!("soon")),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_model_config_defaults_sample_rate() {
        let cfg: ModelConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.audio.sample_rate, 22050);
        let cfg: ModelConfig =
            serde_json::from_str(r#"{"audio": {"sample_rate": 16000, "quality": "low"}}"#).unwrap();
        assert_eq!(cfg.audio.sample_rate, 16000);
    }

    #[test]
    fn test_read_json_file_missing_is_none() {
        let missing = std::env::temp_dir().join("piper_kit_missing_config.json");
        let parsed: Option<ModelConfig> = read_json_file(&missing);
        assert!(parsed.is_none());
    }
}
