//! Configuration management for Kitsune
//!
//! Precedence, highest first: environment, saved user settings, the TOML
//! file, built-in defaults. CLI flags are applied on top by the binary.

pub mod file;

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::chat::{ChatProvider, OfflineChat, OpenAiChat, ReplyOptions};
use crate::memory::DEFAULT_MEMORY_LIMIT;
use crate::settings::{Settings, SettingsStore};
use crate::voice::tts::KOKORO_URL;
use crate::voice::{SpeechToText, SttBackend, TextToSpeech, TtsBackend, VoiceSelection};
use crate::{Error, Persona, Result};

use self::file::KitsuneConfigFile;

/// Default deadline for each provider call
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

/// Default relay port
pub const DEFAULT_RELAY_PORT: u16 = 3001;

/// Default Coqui `tts-server` address
pub const DEFAULT_COQUI_URL: &str = "http://localhost:5002";

/// Reply generation backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatBackend {
    OpenAI,

    /// Keyword and canned replies, no network
    Offline,
}

impl FromStr for ChatBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "offline" => Ok(Self::Offline),
            other => Err(Error::Config(format!("unknown chat provider: {other}"))),
        }
    }
}

/// Transcription provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SttProvider {
    Whisper,
    Relay,
}

impl FromStr for SttProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "whisper" | "openai" => Ok(Self::Whisper),
            "relay" => Ok(Self::Relay),
            other => Err(Error::Config(format!("unknown STT provider: {other}"))),
        }
    }
}

/// Speech synthesis provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtsProvider {
    OpenAI,
    Kokoro,
    Coqui,
    Relay,
}

impl FromStr for TtsProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "kokoro" | "deepinfra" => Ok(Self::Kokoro),
            "coqui" => Ok(Self::Coqui),
            "relay" => Ok(Self::Relay),
            other => Err(Error::Config(format!("unknown TTS provider: {other}"))),
        }
    }
}

impl TtsProvider {
    /// Voice used when none is configured
    #[must_use]
    pub const fn default_voice(self) -> &'static str {
        match self {
            Self::OpenAI => "alloy",
            Self::Coqui => "",
            Self::Kokoro | Self::Relay => crate::settings::DEFAULT_VOICE,
        }
    }
}

/// Kitsune configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Active persona
    pub persona: Persona,

    /// API keys
    pub api_keys: ApiKeys,

    /// Reply generation
    pub chat: ChatConfig,

    /// Speech-to-text
    pub stt: SttConfig,

    /// Text-to-speech
    pub tts: TtsConfig,

    /// Local relay server
    pub relay: RelayConfig,

    /// Deadline for each provider call
    pub timeout: Duration,

    /// Where user settings are saved
    pub settings_path: PathBuf,
}

/// API keys for external services
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    /// `OpenAI` API key (Whisper, chat, TTS)
    pub openai: Option<String>,

    /// `DeepInfra` API key (Kokoro TTS)
    pub deepinfra: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub backend: ChatBackend,
    pub model: String,
    pub max_tokens: u32,
    pub memory_limit: usize,
}

#[derive(Debug, Clone)]
pub struct SttConfig {
    pub provider: SttProvider,
    pub model: String,
}

#[derive(Debug, Clone)]
pub struct TtsConfig {
    pub provider: TtsProvider,

    /// `OpenAI` TTS model
    pub model: String,
    pub voice: VoiceSelection,

    /// Speed multiplier (0.25 to 4.0)
    pub speed: f32,
    pub stream: bool,
    pub kokoro_url: String,
    pub coqui_url: String,

    /// Pitch factor per voice id
    pub pitch: HashMap<String, f32>,
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Base URL clients use to reach the relay
    pub url: String,

    /// Port to listen on
    pub port: u16,
}

impl Config {
    /// Load configuration from the process environment, saved settings and
    /// the config file
    ///
    /// # Errors
    ///
    /// Returns error if a setting has an invalid value
    pub fn load() -> Result<Self> {
        let fc = file::load_config_file();
        let store = SettingsStore::open_default();
        let settings = store.load().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "ignoring unreadable settings file");
            Settings::default()
        });

        Self::resolve(fc, &settings, store.path().to_path_buf(), |key| {
            std::env::var(key).ok()
        })
    }

    /// Combine the configuration sources
    ///
    /// `env` looks up an environment variable; empty values count as unset.
    ///
    /// # Errors
    ///
    /// Returns error if a setting has an invalid value
    pub fn resolve(
        fc: KitsuneConfigFile,
        settings: &Settings,
        settings_path: PathBuf,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let env = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        // Load API keys (env > settings > toml > None)
        let api_keys = ApiKeys {
            openai: env("OPENAI_API_KEY")
                .or_else(|| settings.api_key.clone())
                .or(fc.api_keys.openai),
            deepinfra: env("DEEPINFRA_API_KEY").or(fc.api_keys.deepinfra),
        };

        let persona = {
            let defaults = Persona::default();
            Persona::new(
                env("KITSUNE_NAME")
                    .or(fc.persona.name)
                    .unwrap_or(defaults.name),
                fc.persona.prompt.unwrap_or(defaults.prompt),
            )
        };

        // Without an OpenAI key everything falls back to keyless backends
        let has_openai = api_keys.openai.is_some();

        let chat = ChatConfig {
            backend: env("KITSUNE_CHAT_PROVIDER")
                .or(fc.chat.provider)
                .map(|p| p.parse::<ChatBackend>())
                .transpose()?
                .unwrap_or(if has_openai {
                    ChatBackend::OpenAI
                } else {
                    ChatBackend::Offline
                }),
            model: env("KITSUNE_CHAT_MODEL")
                .or(fc.chat.model)
                .unwrap_or_else(|| "gpt-4".to_string()),
            max_tokens: parse_env(&env, "KITSUNE_MAX_TOKENS")?
                .or(fc.chat.max_tokens)
                .unwrap_or(300),
            memory_limit: parse_env(&env, "KITSUNE_MEMORY_LIMIT")?
                .or(fc.chat.memory_limit)
                .unwrap_or(DEFAULT_MEMORY_LIMIT),
        };
        if chat.memory_limit == 0 {
            return Err(Error::Config("memory limit must be at least 1".to_string()));
        }

        let stt = SttConfig {
            provider: env("KITSUNE_STT_PROVIDER")
                .or(fc.stt.provider)
                .map(|p| p.parse::<SttProvider>())
                .transpose()?
                .unwrap_or(if has_openai {
                    SttProvider::Whisper
                } else {
                    SttProvider::Relay
                }),
            model: env("KITSUNE_STT_MODEL")
                .or(fc.stt.model)
                .unwrap_or_else(|| "whisper-1".to_string()),
        };

        // Kokoro when a DeepInfra key is around, then OpenAI, then the relay
        let tts_provider = env("KITSUNE_TTS_PROVIDER")
            .or(fc.tts.provider)
            .map(|p| p.parse::<TtsProvider>())
            .transpose()?
            .unwrap_or(if api_keys.deepinfra.is_some() {
                TtsProvider::Kokoro
            } else if has_openai {
                TtsProvider::OpenAI
            } else {
                TtsProvider::Relay
            });

        let voice_id = env("KITSUNE_VOICE")
            .or_else(|| settings.voice.clone())
            .or(fc.tts.voice)
            .unwrap_or_else(|| tts_provider.default_voice().to_string());
        let language = env("KITSUNE_LANGUAGE")
            .or(fc.tts.language)
            .unwrap_or_else(|| "en".to_string());

        let speed = parse_env(&env, "KITSUNE_TTS_SPEED")?
            .or(fc.tts.speed)
            .unwrap_or(1.0);
        if !(0.25..=4.0).contains(&speed) {
            return Err(Error::Config(format!(
                "TTS speed {speed} out of range (0.25 to 4.0)"
            )));
        }

        if let Some((voice, factor)) = fc
            .tts
            .pitch
            .iter()
            .find(|(_, f)| !(0.25..=4.0).contains(*f))
        {
            return Err(Error::Config(format!(
                "pitch {factor} for voice {voice} out of range (0.25 to 4.0)"
            )));
        }

        let tts = TtsConfig {
            provider: tts_provider,
            model: env("KITSUNE_TTS_MODEL")
                .or(fc.tts.model)
                .unwrap_or_else(|| "tts-1".to_string()),
            voice: VoiceSelection::new(voice_id, language),
            speed,
            stream: fc.tts.stream.unwrap_or(true),
            kokoro_url: env("KITSUNE_KOKORO_URL")
                .or(fc.tts.kokoro_url)
                .unwrap_or_else(|| KOKORO_URL.to_string()),
            coqui_url: env("KITSUNE_COQUI_URL")
                .or(fc.tts.coqui_url)
                .unwrap_or_else(|| DEFAULT_COQUI_URL.to_string()),
            pitch: fc.tts.pitch,
        };

        let port = match parse_env(&env, "KITSUNE_PORT")? {
            Some(port) => Some(port),
            None => parse_env(&env, "PORT")?,
        }
        .or(fc.relay.port)
        .unwrap_or(DEFAULT_RELAY_PORT);
        let relay = RelayConfig {
            url: env("KITSUNE_RELAY_URL")
                .or(fc.relay.url)
                .unwrap_or_else(|| format!("http://localhost:{port}")),
            port,
        };

        let timeout = parse_env(&env, "KITSUNE_TIMEOUT_SECS")?
            .or(fc.timeout_secs)
            .map_or(DEFAULT_TIMEOUT, Duration::from_secs);
        if timeout.is_zero() {
            return Err(Error::Config("timeout must be greater than zero".to_string()));
        }

        tracing::debug!(
            chat = ?chat.backend,
            stt = ?stt.provider,
            tts = ?tts.provider,
            voice = %tts.voice.provider_voice_id,
            timeout_secs = timeout.as_secs(),
            "configuration resolved"
        );

        Ok(Self {
            persona,
            api_keys,
            chat,
            stt,
            tts,
            relay,
            timeout,
            settings_path,
        })
    }

    /// Options for the reply generator
    #[must_use]
    pub fn reply_options(&self) -> ReplyOptions {
        ReplyOptions {
            model: self.chat.model.clone(),
            max_tokens: self.chat.max_tokens,
            timeout: self.timeout,
            memory_limit: self.chat.memory_limit,
        }
    }

    /// Chat completion client for the selected backend
    ///
    /// # Errors
    ///
    /// Returns error if the `OpenAI` backend is selected without a key
    pub fn chat_provider(&self) -> Result<Arc<dyn ChatProvider>> {
        Ok(match self.chat.backend {
            ChatBackend::OpenAI => Arc::new(OpenAiChat::new(self.require_openai("chat")?)?),
            ChatBackend::Offline => Arc::new(OfflineChat::new(self.persona.name.clone())),
        })
    }

    /// Selected transcription backend
    ///
    /// # Errors
    ///
    /// Returns error if the backend's key is missing
    pub fn stt_backend(&self) -> Result<SttBackend> {
        Ok(match self.stt.provider {
            SttProvider::Whisper => SttBackend::Whisper {
                api_key: self.require_openai("Whisper")?,
                base_url: crate::chat::OPENAI_BASE_URL.to_string(),
            },
            SttProvider::Relay => SttBackend::Relay {
                base_url: self.relay.url.clone(),
            },
        })
    }

    /// Transcription client for the selected backend
    ///
    /// # Errors
    ///
    /// Returns error if the backend's key is missing
    pub fn transcriber(&self) -> Result<SpeechToText> {
        SpeechToText::new(self.stt_backend()?, self.stt.model.clone(), self.timeout)
    }

    /// Selected speech synthesis backend
    ///
    /// # Errors
    ///
    /// Returns error if the backend's key is missing
    pub fn tts_backend(&self) -> Result<TtsBackend> {
        Ok(match self.tts.provider {
            TtsProvider::OpenAI => TtsBackend::OpenAI {
                api_key: self.require_openai("TTS")?,
                model: self.tts.model.clone(),
                base_url: crate::chat::OPENAI_BASE_URL.to_string(),
            },
            TtsProvider::Kokoro => TtsBackend::Kokoro {
                api_key: self.api_keys.deepinfra.clone().ok_or_else(|| {
                    Error::Config("DEEPINFRA_API_KEY required for Kokoro TTS".to_string())
                })?,
                url: self.tts.kokoro_url.clone(),
                stream: self.tts.stream,
            },
            TtsProvider::Coqui => TtsBackend::Coqui {
                server_url: self.tts.coqui_url.clone(),
            },
            TtsProvider::Relay => TtsBackend::Relay {
                base_url: self.relay.url.clone(),
            },
        })
    }

    /// Speech synthesis client for the selected backend
    ///
    /// # Errors
    ///
    /// Returns error if the backend's key is missing
    pub fn speech_provider(&self) -> Result<TextToSpeech> {
        TextToSpeech::new(self.tts_backend()?, self.tts.speed)
    }

    /// Settings store at the configured path
    #[must_use]
    pub fn settings_store(&self) -> SettingsStore {
        SettingsStore::at(&self.settings_path)
    }

    fn require_openai(&self, what: &str) -> Result<String> {
        self.api_keys
            .openai
            .clone()
            .ok_or_else(|| Error::Config(format!("OPENAI_API_KEY required for {what}")))
    }
}

fn parse_env<T: FromStr>(env: impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>> {
    env(key)
        .map(|v| {
            v.trim()
                .parse()
                .map_err(|_| Error::Config(format!("invalid value for {key}: {v}")))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve(vars: &[(&str, &str)], fc: KitsuneConfigFile, settings: &Settings) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Config::resolve(fc, settings, PathBuf::from("settings.json"), |k| {
            vars.get(k).cloned()
        })
    }

    #[test]
    fn test_defaults() {
        let config = resolve(&[], KitsuneConfigFile::default(), &Settings::default()).unwrap();

        assert_eq!(config.timeout, DEFAULT_TIMEOUT);
        assert_eq!(config.chat.model, "gpt-4");
        assert_eq!(config.chat.memory_limit, 10);
        assert_eq!(config.chat.backend, ChatBackend::Offline);
        assert_eq!(config.stt.provider, SttProvider::Relay);
        assert_eq!(config.tts.provider, TtsProvider::Relay);
        assert_eq!(config.relay.port, 3001);
        assert_eq!(config.relay.url, "http://localhost:3001");
        assert!(config.api_keys.openai.is_none());
        assert_eq!(config.chat_provider().unwrap().name(), "offline");
        assert!(config.transcriber().is_ok());
        assert!(config.speech_provider().is_ok());
    }

    #[test]
    fn test_openai_key_selects_openai_backends() {
        let config = resolve(
            &[("OPENAI_API_KEY", "sk-test")],
            KitsuneConfigFile::default(),
            &Settings::default(),
        )
        .unwrap();

        assert_eq!(config.chat.backend, ChatBackend::OpenAI);
        assert_eq!(config.stt.provider, SttProvider::Whisper);
        assert_eq!(config.tts.provider, TtsProvider::OpenAI);
        assert_eq!(config.chat_provider().unwrap().name(), "openai-chat");
    }

    #[test]
    fn test_offline_chat_can_be_forced() {
        let mut fc = KitsuneConfigFile::default();
        fc.chat.provider = Some("offline".to_string());

        let config = resolve(&[("OPENAI_API_KEY", "sk-test")], fc, &Settings::default()).unwrap();
        assert_eq!(config.chat.backend, ChatBackend::Offline);
        assert_eq!(config.chat_provider().unwrap().name(), "offline");

        let config = resolve(
            &[("KITSUNE_CHAT_PROVIDER", "openai")],
            KitsuneConfigFile::default(),
            &Settings::default(),
        )
        .unwrap();
        assert!(config.chat_provider().is_err());
    }

    #[test]
    fn test_deepinfra_key_selects_kokoro() {
        let config = resolve(
            &[("DEEPINFRA_API_KEY", "di-key")],
            KitsuneConfigFile::default(),
            &Settings::default(),
        )
        .unwrap();

        assert_eq!(config.tts.provider, TtsProvider::Kokoro);
        assert_eq!(config.tts.voice.provider_voice_id, "ff_siwis");
        assert!(matches!(config.tts_backend().unwrap(), TtsBackend::Kokoro { .. }));
    }

    #[test]
    fn test_env_beats_settings_beats_file() {
        let mut fc = KitsuneConfigFile::default();
        fc.api_keys.openai = Some("from-file".to_string());
        fc.tts.voice = Some("file-voice".to_string());
        let settings = Settings {
            api_key: Some("from-settings".to_string()),
            voice: Some("af_bella".to_string()),
        };

        let config = resolve(&[("OPENAI_API_KEY", "from-env")], fc, &settings).unwrap();

        assert_eq!(config.api_keys.openai.as_deref(), Some("from-env"));
        assert_eq!(config.tts.voice.provider_voice_id, "af_bella");
    }

    #[test]
    fn test_empty_env_counts_as_unset() {
        let settings = Settings {
            api_key: Some("from-settings".to_string()),
            voice: None,
        };
        let config = resolve(&[("OPENAI_API_KEY", "  ")], KitsuneConfigFile::default(), &settings).unwrap();
        assert_eq!(config.api_keys.openai.as_deref(), Some("from-settings"));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let bad = [
            ("KITSUNE_TIMEOUT_SECS", "soon"),
            ("KITSUNE_TIMEOUT_SECS", "0"),
            ("KITSUNE_TTS_SPEED", "9"),
            ("KITSUNE_STT_PROVIDER", "carrier-pigeon"),
            ("KITSUNE_CHAT_PROVIDER", "oracle"),
            ("KITSUNE_MEMORY_LIMIT", "0"),
        ];
        for var in bad {
            let result = resolve(&[var], KitsuneConfigFile::default(), &Settings::default());
            assert!(matches!(result, Err(Error::Config(_))), "{var:?} accepted");
        }
    }

    #[test]
    fn test_relay_port_and_url() {
        let config = resolve(&[("PORT", "8080")], KitsuneConfigFile::default(), &Settings::default()).unwrap();
        assert_eq!(config.relay.port, 8080);
        assert_eq!(config.relay.url, "http://localhost:8080");

        let config = resolve(
            &[("KITSUNE_PORT", "4000"), ("PORT", "8080"), ("KITSUNE_STT_PROVIDER", "relay")],
            KitsuneConfigFile::default(),
            &Settings::default(),
        )
        .unwrap();
        assert_eq!(config.relay.port, 4000);
        assert!(matches!(config.stt_backend().unwrap(), SttBackend::Relay { base_url } if base_url == "http://localhost:4000"));
    }

    #[test]
    fn test_reply_options_follow_config() {
        let mut fc = KitsuneConfigFile::default();
        fc.chat.memory_limit = Some(4);
        fc.timeout_secs = Some(3);

        let options = resolve(&[], fc, &Settings::default()).unwrap().reply_options();
        assert_eq!(options.memory_limit, 4);
        assert_eq!(options.timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_out_of_range_pitch_is_rejected() {
        let mut fc = KitsuneConfigFile::default();
        fc.tts.pitch.insert("ff_siwis".to_string(), 12.0);
        assert!(resolve(&[], fc, &Settings::default()).is_err());
    }
}
