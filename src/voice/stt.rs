//! Speech-to-text (STT) processing
//!
//! One provider call per invocation. No retries and no caching: every call
//! is billed by the remote provider.

use std::time::Duration;

use async_trait::async_trait;

use super::AudioClip;
use crate::error::with_timeout;
use crate::{Error, Result};

/// Response from Whisper-style transcription endpoints (and the relay)
#[derive(serde::Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// Something that turns captured audio into text
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe `audio`
    ///
    /// # Errors
    ///
    /// Returns error if the provider fails or hears nothing
    async fn transcribe(&self, audio: &AudioClip) -> Result<String>;

    /// Provider name for logging
    fn name(&self) -> &'static str;
}

/// STT provider backend
#[derive(Debug, Clone)]
pub enum SttBackend {
    /// `OpenAI` Whisper, called directly
    Whisper { api_key: String, base_url: String },

    /// Local relay server (`POST /transcribe`)
    Relay { base_url: String },
}

/// Transcribes speech to text
pub struct SpeechToText {
    client: reqwest::Client,
    backend: SttBackend,
    model: String,
    timeout: Duration,
}

impl SpeechToText {
    /// Create a new STT instance using `OpenAI` Whisper
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_whisper(api_key: String, model: String, timeout: Duration) -> Result<Self> {
        Self::new(
            SttBackend::Whisper {
                api_key,
                base_url: crate::chat::OPENAI_BASE_URL.to_string(),
            },
            model,
            timeout,
        )
    }

    /// Create a new STT instance that goes through the local relay
    ///
    /// # Errors
    ///
    /// Returns error if the relay URL is empty
    pub fn new_relay(base_url: String, timeout: Duration) -> Result<Self> {
        Self::new(SttBackend::Relay { base_url }, "whisper-1".to_string(), timeout)
    }

    /// Create a new STT instance for an explicit backend
    ///
    /// # Errors
    ///
    /// Returns error if the backend is missing its key or URL
    pub fn new(backend: SttBackend, model: String, timeout: Duration) -> Result<Self> {
        match &backend {
            SttBackend::Whisper { api_key, .. } if api_key.is_empty() => {
                return Err(Error::Config(
                    "OpenAI API key required for Whisper".to_string(),
                ));
            }
            SttBackend::Relay { base_url } if base_url.is_empty() => {
                return Err(Error::Config("relay URL required for STT".to_string()));
            }
            _ => {}
        }

        Ok(Self {
            client: reqwest::Client::new(),
            backend,
            model,
            timeout,
        })
    }

    async fn request(&self, audio: &AudioClip) -> Result<String> {
        let part = reqwest::multipart::Part::bytes(audio.data.clone())
            .file_name(audio.file_name())
            .mime_str(audio.format.mime())
            .map_err(|e| Error::Stt(e.to_string()))?;

        let request = match &self.backend {
            SttBackend::Whisper { api_key, base_url } => {
                let form = reqwest::multipart::Form::new()
                    .part("file", part)
                    .text("model", self.model.clone());
                self.client
                    .post(format!("{}/audio/transcriptions", base_url.trim_end_matches('/')))
                    .header("Authorization", format!("Bearer {api_key}"))
                    .multipart(form)
            }
            SttBackend::Relay { base_url } => {
                let form = reqwest::multipart::Form::new().part("audio", part);
                self.client
                    .post(format!("{}/transcribe", base_url.trim_end_matches('/')))
                    .multipart(form)
            }
        };

        let response = request.send().await.map_err(|e| {
            tracing::error!(error = %e, "transcription request failed");
            e
        })?;

        let status = response.status();
        tracing::debug!(status = %status, "received response");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "transcription API error");
            return Err(Error::Stt(format!("transcription API error {status}: {body}")));
        }

        let result: TranscriptionResponse = response.json().await?;
        Ok(result.text)
    }
}

#[async_trait]
impl Transcriber for SpeechToText {
    async fn transcribe(&self, audio: &AudioClip) -> Result<String> {
        if audio.is_empty() {
            return Err(Error::Stt("no audio captured".to_string()));
        }

        tracing::debug!(
            audio_bytes = audio.data.len(),
            provider = self.name(),
            "starting transcription"
        );

        let text = with_timeout("transcription", self.timeout, self.request(audio)).await?;
        let text = text.trim();

        if text.is_empty() {
            return Err(Error::Stt("no speech detected".to_string()));
        }

        tracing::info!(transcript = %text, "transcription complete");
        Ok(text.to_string())
    }

    fn name(&self) -> &'static str {
        match self.backend {
            SttBackend::Whisper { .. } => "whisper",
            SttBackend::Relay { .. } => "relay",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whisper_requires_key() {
        let err = SpeechToText::new_whisper(String::new(), "whisper-1".to_string(), Duration::from_secs(1));
        assert!(matches!(err, Err(Error::Config(_))));
    }

    #[test]
    fn test_relay_requires_url() {
        assert!(SpeechToText::new_relay(String::new(), Duration::from_secs(1)).is_err());
        let stt = SpeechToText::new_relay("http://localhost:3001".to_string(), Duration::from_secs(1)).unwrap();
        assert_eq!(stt.name(), "relay");
    }

    #[tokio::test]
    async fn test_empty_audio_is_rejected_without_a_call() {
        let stt = SpeechToText::new_relay("http://127.0.0.1:9".to_string(), Duration::from_secs(1)).unwrap();
        let clip = AudioClip::new(Vec::new(), super::super::AudioFormat::Wav);
        let err = stt.transcribe(&clip).await.unwrap_err();
        assert!(err.to_string().contains("no audio"));
    }
}
