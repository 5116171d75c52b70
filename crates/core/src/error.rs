//! Error types shared across the workspace

use thiserror::Error;

/// Result alias used by adapter traits
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by backend adapters and turn plumbing
#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("Transcription error: {0}")]
    Transcription(String),

    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Synthesis error: {0}")]
    Synthesis(String),

    #[error("Coordinator error: {0}")]
    Coordinator(String),

    /// A deadline elapsed; the payload names the guarded operation
    #[error("Timed out: {0}")]
    Timeout(&'static str),

    #[error("Audio error: {0}")]
    Audio(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

/// Failure taxonomy of a speech-to-speech turn.
///
/// Each variant maps to a stable tag (see [`SpeechTurnError::kind`]) used in
/// logs and metrics labels. A caller-initiated abort is not a failure and has
/// no variant here.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SpeechTurnError {
    #[error("speech-to-speech server busy: {0}")]
    Busy(String),

    #[error("handshake timed out after {0} ms")]
    HandshakeTimeout(u64),

    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("connection closed without audio")]
    NoAudio,

    #[error("turn timed out after {0} ms")]
    TurnTimeout(u64),

    #[error("audio decode failed: {0}")]
    Decode(String),

    #[error("send failed: {0}")]
    Send(String),

    #[error("websocket error: {0}")]
    WebSocket(String),

    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl SpeechTurnError {
    /// Stable wire tag for this failure
    pub fn kind(&self) -> &'static str {
        match self {
            SpeechTurnError::Busy(_) => "busy",
            SpeechTurnError::HandshakeTimeout(_) => "handshake_timeout",
            SpeechTurnError::HandshakeFailed(_) => "handshake_failed",
            SpeechTurnError::NoAudio => "no_audio",
            SpeechTurnError::TurnTimeout(_) => "turn_timeout",
            SpeechTurnError::Decode(_) => "decode_error",
            SpeechTurnError::Send(_) => "send_error",
            SpeechTurnError::WebSocket(_) => "ws_error",
            SpeechTurnError::Unexpected(_) => "unexpected_error",
        }
    }

    /// Malformed audio ends the turn outright instead of falling back
    pub fn is_fatal(&self) -> bool {
        matches!(self, SpeechTurnError::Decode(_))
    }
}
