//! Error types for Parley

use thiserror::Error;

/// Result type alias for Parley operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur inside the voice pipeline
///
/// None of these cross the [`Session`](crate::Session) boundary; the session
/// turns them into state transitions and log entries.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device error
    #[error("audio error: {0}")]
    Audio(String),

    /// Microphone capture error
    #[error("capture error: {0}")]
    Capture(String),

    /// Playback output error
    #[error("playback error: {0}")]
    Playback(String),

    /// Malformed WAV/PCM segment
    #[error("wav error: {0}")]
    Wav(String),

    /// Channel could not be opened
    #[error("connect error: {0}")]
    Connect(String),

    /// Credential exchange failed
    #[error("credentials error: {0}")]
    Credentials(String),

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

    /// WebSocket error
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// WAV encoding error
    #[error("wav encode error: {0}")]
    WavEncode(#[from] hound::Error),
}
