//! Error types for Kitsune

use thiserror::Error;

/// Result type alias for Kitsune operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the companion
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device or codec error
    #[error("audio error: {0}")]
    Audio(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Reply generation error
    #[error("chat error: {0}")]
    Chat(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// A provider call exceeded its deadline
    #[error("{0} timed out after {1:?}")]
    Timeout(&'static str, std::time::Duration),

    /// Settings store error
    #[error("settings error: {0}")]
    Settings(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Run `fut` with a deadline, mapping expiry to [`Error::Timeout`]
///
/// # Errors
///
/// Returns the future's own error, or `Error::Timeout` if it did not
/// finish within `limit`
pub async fn with_timeout<T, F>(what: &'static str, limit: std::time::Duration, fut: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| Error::Timeout(what, limit))?
}
