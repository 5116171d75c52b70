//! Speech-to-speech transport
//!
//! WebSocket client for full-duplex speech-to-speech backends:
//! - Binary framing (handshake, Opus audio, text fragments)
//! - Opus codec at 24kHz
//! - Per-endpoint capacity guard

pub mod capacity;
pub mod codec;
pub mod protocol;
pub mod speech_to_speech;

pub use capacity::{CapacityGuard, CapacityPermit};
pub use codec::{OpusDecoder, OpusEncoder, OPUS_FRAME_SAMPLES};
pub use protocol::ServerMessage;
pub use speech_to_speech::{SpeechToSpeechClient, SpeechToSpeechClientConfig};

use thiserror::Error;

/// Transport errors
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    #[error("Codec error: {0}")]
    Codec(String),
}
