//! Core traits for the co-host engine
//!
//! The orchestrator depends only on these seams. Concrete providers are
//! selected once at startup and handed in as trait objects:
//!
//! ```text
//! Speech Processing:
//!   - Transcriber: Audio → Text, optionally as a streaming session
//!   - Synthesizer: Text → stream of PCM16 chunks
//!
//! Language Models:
//!   - LanguageModel: Chat completion, optionally streamed
//!
//! Speech-to-Speech:
//!   - SpeechToSpeech: One full-duplex turn over a binary protocol
//! ```

mod llm;
mod speech;
mod speech_to_speech;

pub use llm::{ChatOptions, ChatResponse, LanguageModel, TextStream};
pub use speech::{
    AudioChunkStream, AudioFormatHint, StreamingOptions, StreamingSession, Synthesizer,
    Transcriber, TranscriptionEvent, VoiceOptions,
};
pub use speech_to_speech::{
    SpeechAudioStream, SpeechToSpeech, SpeechTurn, SpeechTurnRequest, TurnAbort,
};
