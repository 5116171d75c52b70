//! Core traits and types for the co-host engine
//!
//! This crate provides foundational types used across all other crates:
//! - Audio frame types and PCM16 utilities
//! - Conversation and transcript types
//! - Turn Coordinator wire types and the request-id digest
//! - Core traits for pluggable backends (transcription, generation,
//!   synthesis, speech-to-speech)
//! - Error types

pub mod audio;
pub mod conversation;
pub mod coordination;
pub mod error;
pub mod traits;
pub mod transcript;

pub use audio::{AudioFrame, SampleRate, StreamResampler, UtteranceSegment, FRAME_MS};
pub use conversation::{ConversationTurn, Exchange, Message, Role};
pub use coordination::{
    request_id, Bid, BidIntent, TurnCoordination, TurnGrant, TurnReport, WinnerSelectionReason,
};
pub use error::{Error, Result, SpeechTurnError};
pub use transcript::{TranscriptResult, WordTimestamp};

pub use traits::{
    AudioChunkStream, AudioFormatHint, ChatOptions, ChatResponse, LanguageModel,
    SpeechAudioStream, SpeechToSpeech, SpeechTurn, SpeechTurnRequest, StreamingOptions,
    StreamingSession, Synthesizer, TextStream, Transcriber, TranscriptionEvent, TurnAbort,
    VoiceOptions,
};
