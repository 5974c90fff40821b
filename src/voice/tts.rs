//! Text-to-speech (TTS) processing
//!
//! [`TextToSpeech`] talks to one of several providers, selected by
//! [`TtsBackend`]. [`SpeechSynthesizer`] wraps a provider together with an
//! audio sink and a text display and always ends in one of two outcomes:
//! the audio played, or the text was shown instead.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use super::{AudioClip, AudioFormat};
use crate::display::{TextDisplay, fallback_hold};
use crate::error::with_timeout;
use crate::{Error, Result};

/// Default Kokoro endpoint on `DeepInfra`
pub const KOKORO_URL: &str = "https://api.deepinfra.com/v1/inference/hexgrad/Kokoro-82M";

/// Upper bound on a single local playback
const PLAYBACK_LIMIT: Duration = Duration::from_secs(120);

/// How long to wait for the Coqui server health check
const COQUI_HEALTH_TIMEOUT: Duration = Duration::from_secs(2);

/// Voice chosen by the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceSelection {
    /// Provider-specific voice identifier (e.g. `ff_siwis`, `alloy`)
    pub provider_voice_id: String,

    /// Language code (e.g. `en`, `fr`)
    pub language: String,
}

impl Default for VoiceSelection {
    fn default() -> Self {
        Self {
            provider_voice_id: "ff_siwis".to_string(),
            language: "en".to_string(),
        }
    }
}

impl VoiceSelection {
    #[must_use]
    pub fn new(provider_voice_id: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            provider_voice_id: provider_voice_id.into(),
            language: language.into(),
        }
    }
}

/// A speech synthesis backend
#[async_trait]
pub trait SpeechProvider: Send + Sync {
    /// Synthesize `text` with `voice`
    ///
    /// # Errors
    ///
    /// Returns error if synthesis fails or returns no audio
    async fn synthesize(&self, text: &str, voice: &VoiceSelection) -> Result<AudioClip>;

    /// Synthesize at an explicit speed multiplier
    ///
    /// Providers without speed control ignore `speed`.
    ///
    /// # Errors
    ///
    /// Returns error if synthesis fails or returns no audio
    async fn synthesize_at(
        &self,
        text: &str,
        voice: &VoiceSelection,
        speed: f32,
    ) -> Result<AudioClip> {
        let _ = speed;
        self.synthesize(text, voice).await
    }

    /// Provider name for logging
    fn name(&self) -> &'static str;
}

/// Where synthesized audio goes
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Play `clip` to completion, shifting pitch by `pitch` (1.0 = unchanged)
    ///
    /// # Errors
    ///
    /// Returns error if the clip cannot be decoded or played
    async fn play(&self, clip: AudioClip, pitch: f32) -> Result<()>;
}

/// TTS provider backend
#[derive(Debug, Clone)]
pub enum TtsBackend {
    /// `OpenAI` `/audio/speech`
    OpenAI {
        api_key: String,
        model: String,
        base_url: String,
    },

    /// Kokoro-82M hosted on `DeepInfra`
    Kokoro {
        api_key: String,
        url: String,
        stream: bool,
    },

    /// Coqui TTS server (`tts-server`) running locally
    Coqui { server_url: String },

    /// Local relay server (`POST /speak`)
    Relay { base_url: String },
}

/// Synthesizes speech from text
pub struct TextToSpeech {
    client: reqwest::Client,
    backend: TtsBackend,
    speed: f32,
}

#[derive(Serialize)]
struct OpenAiSpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    speed: f32,
    response_format: &'a str,
}

/// Body shared by Kokoro and the relay's `/speak`
#[derive(Serialize)]
struct KokoroRequest<'a> {
    text: &'a str,
    output_format: &'a str,
    preset_voice: [&'a str; 1],
    speed: f32,
    stream: bool,
    return_timestamps: bool,
}

#[derive(Deserialize)]
struct KokoroResponse {
    audio: Option<String>,
}

impl TextToSpeech {
    /// Create a TTS client for `backend`
    ///
    /// # Errors
    ///
    /// Returns error if the backend is missing its key or URL
    pub fn new(backend: TtsBackend, speed: f32) -> Result<Self> {
        let missing = match &backend {
            TtsBackend::OpenAI { api_key, .. } if api_key.is_empty() => {
                Some("OpenAI API key required for TTS")
            }
            TtsBackend::Kokoro { api_key, .. } if api_key.is_empty() => {
                Some("DeepInfra API key required for Kokoro TTS")
            }
            TtsBackend::Coqui { server_url } if server_url.is_empty() => {
                Some("Coqui server URL required")
            }
            TtsBackend::Relay { base_url } if base_url.is_empty() => {
                Some("relay URL required for TTS")
            }
            _ => None,
        };
        if let Some(msg) = missing {
            return Err(Error::Config(msg.to_string()));
        }
        if !(0.25..=4.0).contains(&speed) {
            return Err(Error::Config(format!("TTS speed {speed} outside 0.25..=4.0")));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            backend,
            speed,
        })
    }

    async fn synthesize_openai(
        &self,
        api_key: &str,
        model: &str,
        base_url: &str,
        text: &str,
        voice: &VoiceSelection,
        speed: f32,
    ) -> Result<Vec<u8>> {
        let request = OpenAiSpeechRequest {
            model,
            input: text,
            voice: &voice.provider_voice_id,
            speed,
            response_format: "mp3",
        };

        let response = self
            .client
            .post(format!("{}/audio/speech", base_url.trim_end_matches('/')))
            .header("Authorization", format!("Bearer {api_key}"))
            .json(&request)
            .send()
            .await?;

        Ok(check(response, "OpenAI TTS").await?.bytes().await?.to_vec())
    }

    async fn synthesize_kokoro(
        &self,
        url: &str,
        api_key: Option<&str>,
        stream: bool,
        text: &str,
        voice: &VoiceSelection,
        speed: f32,
    ) -> Result<Vec<u8>> {
        let request = KokoroRequest {
            text,
            output_format: "mp3",
            preset_voice: [voice.provider_voice_id.as_str()],
            speed,
            stream,
            return_timestamps: false,
        };

        let mut builder = self.client.post(url).json(&request);
        if let Some(key) = api_key {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }
        builder = builder.header(
            "Accept",
            if stream { "application/x-ndjson" } else { "application/json" },
        );

        let response = check(builder.send().await?, "Kokoro TTS").await?;

        let is_json = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("application/json"));

        if stream && !is_json {
            return Ok(response.bytes().await?.to_vec());
        }

        let body: KokoroResponse = response.json().await?;
        let audio = body
            .audio
            .ok_or_else(|| Error::Tts("no audio data received".to_string()))?;
        decode_base64_audio(&audio)
    }

    async fn synthesize_coqui(
        &self,
        server_url: &str,
        text: &str,
        voice: &VoiceSelection,
    ) -> Result<Vec<u8>> {
        let base = server_url.trim_end_matches('/');

        self.client
            .get(base)
            .timeout(COQUI_HEALTH_TIMEOUT)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(url = %base, error = %e, "Coqui server not reachable");
                Error::Tts(format!("Coqui server not reachable at {base}"))
            })?;

        let response = self
            .client
            .get(format!("{base}/api/tts"))
            .query(&[
                ("text", text),
                ("speaker_id", voice.provider_voice_id.as_str()),
                ("language_id", voice.language.as_str()),
            ])
            .send()
            .await?;

        Ok(check(response, "Coqui TTS").await?.bytes().await?.to_vec())
    }
}

#[async_trait]
impl SpeechProvider for TextToSpeech {
    async fn synthesize(&self, text: &str, voice: &VoiceSelection) -> Result<AudioClip> {
        self.synthesize_at(text, voice, self.speed).await
    }

    async fn synthesize_at(
        &self,
        text: &str,
        voice: &VoiceSelection,
        speed: f32,
    ) -> Result<AudioClip> {
        if !(0.25..=4.0).contains(&speed) {
            return Err(Error::Tts(format!("speed {speed} outside 0.25..=4.0")));
        }

        tracing::debug!(
            provider = self.name(),
            voice = %voice.provider_voice_id,
            chars = text.len(),
            "synthesizing"
        );

        let data = match &self.backend {
            TtsBackend::OpenAI {
                api_key,
                model,
                base_url,
            } => {
                self.synthesize_openai(api_key, model, base_url, text, voice, speed)
                    .await?
            }
            TtsBackend::Kokoro {
                api_key,
                url,
                stream,
            } => {
                self.synthesize_kokoro(url, Some(api_key.as_str()), *stream, text, voice, speed)
                    .await?
            }
            TtsBackend::Coqui { server_url } => {
                self.synthesize_coqui(server_url, text, voice).await?
            }
            TtsBackend::Relay { base_url } => {
                let url = format!("{}/speak", base_url.trim_end_matches('/'));
                self.synthesize_kokoro(&url, None, true, text, voice, speed)
                    .await?
            }
        };

        if data.is_empty() {
            return Err(Error::Tts(format!("{} returned empty audio", self.name())));
        }

        let fallback = match self.backend {
            TtsBackend::Coqui { .. } => AudioFormat::Wav,
            _ => AudioFormat::Mp3,
        };
        let format = AudioFormat::sniff(&data).unwrap_or(fallback);
        Ok(AudioClip::new(data, format))
    }

    fn name(&self) -> &'static str {
        match self.backend {
            TtsBackend::OpenAI { .. } => "openai-tts",
            TtsBackend::Kokoro { .. } => "kokoro",
            TtsBackend::Coqui { .. } => "coqui",
            TtsBackend::Relay { .. } => "relay",
        }
    }
}

/// Fail on non-2xx, keeping the body in the error
async fn check(response: reqwest::Response, what: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    tracing::error!(status = %status, body = %body, "{what} error");
    Err(Error::Tts(format!("{what} error {status}: {body}")))
}

/// Decode base64 audio, accepting an optional `data:...;base64,` prefix
fn decode_base64_audio(encoded: &str) -> Result<Vec<u8>> {
    let payload = encoded
        .strip_prefix("data:")
        .and_then(|rest| rest.split_once(','))
        .map_or(encoded, |(_, data)| data);

    base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| Error::Tts(format!("invalid base64 audio: {e}")))
}

/// Terminal outcome of [`SpeechSynthesizer::speak`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechOutcome {
    /// Audio was synthesized and played
    Played,

    /// Synthesis or playback failed; the text was displayed instead
    DisplayedAsFallback,
}

/// Speech synthesis client: provider + playback + text fallback
pub struct SpeechSynthesizer {
    provider: Arc<dyn SpeechProvider>,
    sink: Arc<dyn AudioSink>,
    display: Arc<dyn TextDisplay>,
    voice: RwLock<VoiceSelection>,
    pitch: HashMap<String, f32>,
    timeout: Duration,
    playback: tokio::sync::Mutex<()>,
}

impl SpeechSynthesizer {
    #[must_use]
    pub fn new(
        provider: Arc<dyn SpeechProvider>,
        sink: Arc<dyn AudioSink>,
        display: Arc<dyn TextDisplay>,
        voice: VoiceSelection,
        timeout: Duration,
    ) -> Self {
        Self {
            provider,
            sink,
            display,
            voice: RwLock::new(voice),
            pitch: HashMap::new(),
            timeout,
            playback: tokio::sync::Mutex::new(()),
        }
    }

    /// Per-voice pitch factors applied after synthesis
    #[must_use]
    pub fn with_pitch(mut self, pitch: HashMap<String, f32>) -> Self {
        self.pitch = pitch;
        self
    }

    /// Replace the active voice
    pub fn set_voice(&self, voice: VoiceSelection) {
        tracing::info!(voice = %voice.provider_voice_id, language = %voice.language, "voice changed");
        *self.voice.write().unwrap_or_else(PoisonError::into_inner) = voice;
    }

    #[must_use]
    pub fn voice(&self) -> VoiceSelection {
        self.voice
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Speak `text`, falling back to displaying it
    ///
    /// Only one playback runs at a time; a second call waits for the first.
    pub async fn speak(&self, text: &str) -> SpeechOutcome {
        let _playback = self.playback.lock().await;
        let voice = self.voice();
        let pitch = self
            .pitch
            .get(&voice.provider_voice_id)
            .copied()
            .unwrap_or(1.0);

        let result = async {
            let clip = with_timeout(
                "speech synthesis",
                self.timeout,
                self.provider.synthesize(text, &voice),
            )
            .await?;
            with_timeout("playback", PLAYBACK_LIMIT, self.sink.play(clip, pitch)).await
        }
        .await;

        match result {
            Ok(()) => SpeechOutcome::Played,
            Err(e) => {
                tracing::warn!(provider = self.provider.name(), error = %e, "speech failed, displaying text");
                self.display.show(text, fallback_hold(text)).await;
                SpeechOutcome::DisplayedAsFallback
            }
        }
    }
}
