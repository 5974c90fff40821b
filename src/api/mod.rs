//! Local relay server
//!
//! A thin HTTP front for the transcription and speech providers, so that a
//! companion without API keys of its own can go through one machine that
//! holds them.

pub mod health;
pub mod voice;

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::voice::{SpeechProvider, Transcriber, VoiceSelection};
use crate::{Error, Result};

/// Largest upload accepted by `/transcribe` (the Whisper limit)
const MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

/// Shared state for relay handlers
pub struct RelayState {
    pub transcriber: Arc<dyn Transcriber>,
    pub speech: Arc<dyn SpeechProvider>,

    /// Used when a request names no voice
    pub default_voice: VoiceSelection,

    /// Used when a request gives no speed
    pub default_speed: f32,
}

/// Build the relay router
pub fn router(state: Arc<RelayState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(voice::router(state))
        .merge(health::router())
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Relay HTTP server
pub struct RelayServer {
    state: Arc<RelayState>,
    port: u16,
}

impl RelayServer {
    #[must_use]
    pub fn new(state: RelayState, port: u16) -> Self {
        Self {
            state: Arc::new(state),
            port,
        }
    }

    /// Run the relay until `shutdown` resolves
    ///
    /// # Errors
    ///
    /// Returns error if server fails to bind or run
    pub async fn run(self, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<()> {
        let addr = format!("0.0.0.0:{}", self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| Error::Config(format!("failed to bind relay server: {e}")))?;

        tracing::info!(port = self.port, "relay server listening");

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| Error::Config(format!("relay server error: {e}")))?;

        tracing::info!("relay server stopped");
        Ok(())
    }
}
