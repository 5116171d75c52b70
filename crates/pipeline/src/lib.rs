//! Turn-taking pipeline for the co-host engine
//!
//! This crate provides the agent-side runtime:
//! - Frame segmentation (energy VAD with a pluggable classifier)
//! - Orchestrator: transcription, coordination, reply and barge-in
//! - Streaming sentence detection for LLM output
//! - Safety gate, audience feedback and filler clips
//! - HTTP client for the Turn Coordinator

pub mod coordination;
pub mod feedback;
pub mod filler;
pub mod memory;
pub mod metrics;
pub mod orchestrator;
pub mod processors;
pub mod safety;
pub mod vad;

// VAD exports
pub use vad::{EnergyClassifier, FrameSegmenter, SegmenterConfig, SegmenterOutput, VadClassifier};

// Orchestrator exports
pub use orchestrator::{Orchestrator, OrchestratorConfig, OrchestratorEvent, TurnPhase};

pub use coordination::{CoordinatorClient, CoordinatorClientConfig};
pub use feedback::{BehaviorLevel, FeedbackCollector, FeedbackThresholds, Reaction, Sentiment};
pub use filler::{FillerClip, FillerLibrary};
pub use memory::SessionMemory;
pub use processors::SentenceDetector;
pub use safety::{SafetyGate, SafetyReason, SafetyVerdict};

use thiserror::Error;

/// Pipeline errors
#[derive(Error, Debug, Clone)]
pub enum PipelineError {
    #[error("Transcription error: {0}")]
    Transcription(String),

    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Synthesis error: {0}")]
    Synthesis(String),

    #[error("Coordinator error: {0}")]
    Coordinator(String),

    #[error("Speech-to-speech error: {0}")]
    SpeechToSpeech(String),

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Timed out: {0}")]
    Timeout(&'static str),

    #[error("Audio error: {0}")]
    Audio(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl PipelineError {
    /// Short tag used as a metric label
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Transcription(_) => "transcription",
            Self::Generation(_) => "generation",
            Self::Synthesis(_) => "synthesis",
            Self::Coordinator(_) => "coordinator",
            Self::SpeechToSpeech(_) => "speech_to_speech",
            Self::ChannelClosed => "channel_closed",
            Self::Timeout(_) => "timeout",
            Self::Audio(_) => "audio",
            Self::Io(_) => "io",
        }
    }
}

impl From<PipelineError> for cohost_core::Error {
    fn from(err: PipelineError) -> Self {
        use cohost_core::Error as CoreError;

        match err {
            PipelineError::Transcription(msg) => CoreError::Transcription(msg),
            PipelineError::Generation(msg) => CoreError::Generation(msg),
            PipelineError::Synthesis(msg) => CoreError::Synthesis(msg),
            PipelineError::Coordinator(msg) => CoreError::Coordinator(msg),
            PipelineError::SpeechToSpeech(msg) => CoreError::Audio(msg),
            PipelineError::ChannelClosed => CoreError::Io("channel closed".to_string()),
            PipelineError::Timeout(what) => CoreError::Timeout(what),
            PipelineError::Audio(msg) => CoreError::Audio(msg),
            PipelineError::Io(msg) => CoreError::Io(msg),
        }
    }
}

impl From<cohost_core::Error> for PipelineError {
    fn from(err: cohost_core::Error) -> Self {
        use cohost_core::Error as CoreError;

        match err {
            CoreError::Transcription(msg) => PipelineError::Transcription(msg),
            CoreError::Generation(msg) => PipelineError::Generation(msg),
            CoreError::Synthesis(msg) => PipelineError::Synthesis(msg),
            CoreError::Coordinator(msg) => PipelineError::Coordinator(msg),
            CoreError::Timeout(what) => PipelineError::Timeout(what),
            CoreError::Audio(msg) => PipelineError::Audio(msg),
            CoreError::Io(msg) => PipelineError::Io(msg),
        }
    }
}
