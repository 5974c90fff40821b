//! TOML configuration file loading
//!
//! Supports `~/.config/kitsune/config.toml` as a persistent config source.
//! All fields are optional: the file is a partial overlay on top of defaults.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct KitsuneConfigFile {
    /// Companion identity
    #[serde(default)]
    pub persona: PersonaFileConfig,

    /// Reply generation
    #[serde(default)]
    pub chat: ChatFileConfig,

    /// Speech-to-text
    #[serde(default)]
    pub stt: SttFileConfig,

    /// Text-to-speech
    #[serde(default)]
    pub tts: TtsFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,

    /// Local relay server
    #[serde(default)]
    pub relay: RelayFileConfig,

    /// Deadline for each provider call, in seconds
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PersonaFileConfig {
    pub name: Option<String>,

    /// System prompt template; `{name}` is replaced with the name
    pub prompt: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChatFileConfig {
    /// "openai" or "offline"
    pub provider: Option<String>,

    /// Model identifier (e.g. "gpt-4")
    pub model: Option<String>,
    pub max_tokens: Option<u32>,

    /// Utterances kept as prompt history
    pub memory_limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SttFileConfig {
    /// "whisper" or "relay"
    pub provider: Option<String>,

    /// STT model (e.g. "whisper-1")
    pub model: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TtsFileConfig {
    /// "openai", "kokoro", "coqui" or "relay"
    pub provider: Option<String>,

    /// `OpenAI` TTS model (e.g. "tts-1")
    pub model: Option<String>,

    /// Voice identifier (e.g. "`ff_siwis`", "alloy")
    pub voice: Option<String>,
    pub language: Option<String>,

    /// Speed multiplier
    pub speed: Option<f32>,

    /// Ask Kokoro for a streamed body
    pub stream: Option<bool>,
    pub kokoro_url: Option<String>,
    pub coqui_url: Option<String>,

    /// Pitch factor per voice id, applied after synthesis
    #[serde(default)]
    pub pitch: HashMap<String, f32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub openai: Option<String>,
    pub deepinfra: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RelayFileConfig {
    /// Base URL clients use to reach the relay
    pub url: Option<String>,

    /// Port `kitsune serve` listens on
    pub port: Option<u16>,
}

/// Load the TOML config file from the standard path
///
/// Returns `KitsuneConfigFile::default()` if the file doesn't exist or can't be parsed.
#[must_use]
pub fn load_config_file() -> KitsuneConfigFile {
    config_file_path().map_or_else(KitsuneConfigFile::default, |path| load_config_file_from(&path))
}

/// Load the TOML config file at `path`
#[must_use]
pub fn load_config_file_from(path: &Path) -> KitsuneConfigFile {
    if !path.exists() {
        return KitsuneConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                KitsuneConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            KitsuneConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/kitsune/config.toml`
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("kitsune").join("config.toml"))
}
