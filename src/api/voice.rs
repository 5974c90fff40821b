//! Relay endpoints for speech-to-text and text-to-speech

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Multipart, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::post,
};
use serde::{Deserialize, Serialize};

use super::RelayState;
use crate::voice::{AudioClip, AudioFormat, VoiceSelection};

/// Build voice router
pub fn router(state: Arc<RelayState>) -> Router {
    Router::new()
        .route("/transcribe", post(transcribe))
        .route("/speak", post(speak))
        .with_state(state)
}

/// Transcription response
#[derive(Debug, Serialize)]
pub struct TranscribeResponse {
    pub text: String,
}

/// Transcribe the multipart field `audio`
///
/// Accepts WAV, MP3 or `WebM`; the container is taken from the part's
/// content type, then sniffed.
async fn transcribe(
    State(state): State<Arc<RelayState>>,
    mut multipart: Multipart,
) -> Result<Json<TranscribeResponse>, VoiceError> {
    let mut clip = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| VoiceError::BadRequest(e.body_text()))?
    {
        if field.name() != Some("audio") {
            continue;
        }

        let declared = field.content_type().and_then(AudioFormat::from_mime);
        let data = field
            .bytes()
            .await
            .map_err(|e| VoiceError::BadRequest(e.body_text()))?;
        let format = declared
            .or_else(|| AudioFormat::sniff(&data))
            .unwrap_or(AudioFormat::Wav);
        clip = Some(AudioClip::new(data.to_vec(), format));
        break;
    }

    let clip = clip
        .filter(|c| !c.is_empty())
        .ok_or_else(|| VoiceError::BadRequest("No audio file provided".to_string()))?;

    tracing::debug!(bytes = clip.data.len(), format = ?clip.format, "relay transcription");

    let text = state
        .transcriber
        .transcribe(&clip)
        .await
        .map_err(|e| VoiceError::TranscriptionFailed(e.to_string()))?;

    Ok(Json(TranscribeResponse { text }))
}

/// Synthesis request, Kokoro-shaped
#[derive(Debug, Default, Deserialize)]
pub struct SpeakRequest {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub output_format: Option<String>,
    #[serde(default)]
    pub preset_voice: Option<Vec<String>>,
    #[serde(default)]
    pub speed: Option<f32>,

    /// Accepted for compatibility; the body is always sent in one piece
    #[serde(default)]
    pub stream: Option<bool>,
}

/// Synthesize text to speech
///
/// Returns audio in MP3 format (or whatever the provider produced)
async fn speak(
    State(state): State<Arc<RelayState>>,
    Json(request): Json<SpeakRequest>,
) -> Result<Response, VoiceError> {
    let text = request
        .text
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| VoiceError::BadRequest("Text is required".to_string()))?;

    if let Some(format) = request.output_format.as_deref().filter(|f| *f != "mp3") {
        return Err(VoiceError::BadRequest(format!(
            "Unsupported output format: {format}"
        )));
    }

    let speed = request.speed.unwrap_or(state.default_speed);
    if !(0.25..=4.0).contains(&speed) {
        return Err(VoiceError::BadRequest(format!(
            "Speed {speed} out of range (0.25 to 4.0)"
        )));
    }

    let voice = request
        .preset_voice
        .as_ref()
        .and_then(|voices| voices.first())
        .map_or_else(
            || state.default_voice.clone(),
            |id| VoiceSelection::new(id.as_str(), state.default_voice.language.as_str()),
        );

    tracing::info!(
        voice = %voice.provider_voice_id,
        chars = text.len(),
        stream = request.stream.unwrap_or(true),
        "relay synthesis"
    );

    let clip = state
        .speech
        .synthesize_at(text, &voice, speed)
        .await
        .map_err(|e| VoiceError::SynthesisFailed(e.to_string()))?;

    let disposition = format!("inline; filename=tts_output.{}", clip.format.extension());
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, clip.format.mime().to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        clip.data,
    )
        .into_response())
}

/// Voice API errors
#[derive(Debug)]
pub enum VoiceError {
    BadRequest(String),
    TranscriptionFailed(String),
    SynthesisFailed(String),
}

impl IntoResponse for VoiceError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: String,
        }

        let (status, error) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::TranscriptionFailed(msg) | Self::SynthesisFailed(msg) => {
                tracing::error!(error = %msg, "relay request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        (status, Json(ErrorResponse { error })).into_response()
    }
}
