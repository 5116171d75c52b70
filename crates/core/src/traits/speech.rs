//! Speech processing traits

use async_trait::async_trait;
use bytes::Bytes;
use futures::channel::mpsc::UnboundedSender;
use futures::Stream;
use std::pin::Pin;

use crate::audio::SampleRate;
use crate::transcript::TranscriptResult;
use crate::Result;

/// Stream of synthesized PCM16 chunks
pub type AudioChunkStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Container of the bytes handed to [`Transcriber::transcribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormatHint {
    /// WAV container around PCM16
    Wav,
    /// Raw little-endian PCM16
    Pcm16,
}

/// Out-of-band notifications from a streaming transcription session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptionEvent {
    /// Interim hypothesis
    Partial(String),
    /// The provider believes the speaker has finished
    TurnPredicted,
}

/// Options for opening a streaming session
#[derive(Debug, Clone, Default)]
pub struct StreamingOptions {
    pub sample_rate: SampleRate,
    pub language: Option<String>,
    /// Where the session reports partials and turn predictions
    pub events: Option<UnboundedSender<TranscriptionEvent>>,
}

/// An open incremental transcription session
#[async_trait]
pub trait StreamingSession: Send {
    /// Feed more PCM16 audio
    async fn push(&mut self, pcm: &[u8]) -> Result<()>;

    /// Finish the session and return the final transcript
    async fn end(self: Box<Self>) -> Result<TranscriptResult>;
}

/// Speech-to-text interface
///
/// Implementations wrap a provider (hosted API, local worker, stub).
/// `create_streaming_session` returns `Ok(None)` when the provider only
/// supports one-shot transcription.
#[async_trait]
pub trait Transcriber: Send + Sync + 'static {
    /// Transcribe a complete utterance
    async fn transcribe(&self, audio: &[u8], format: AudioFormatHint) -> Result<TranscriptResult>;

    /// Open an incremental session, if supported
    async fn create_streaming_session(
        &self,
        _options: StreamingOptions,
    ) -> Result<Option<Box<dyn StreamingSession>>> {
        Ok(None)
    }

    /// Provider name for logging
    fn name(&self) -> &str;
}

/// Voice selection for synthesis
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceOptions {
    pub voice_name: String,
    pub language_code: String,
    pub sample_rate: SampleRate,
}

impl Default for VoiceOptions {
    fn default() -> Self {
        Self {
            voice_name: String::new(),
            language_code: "en-US".to_string(),
            sample_rate: SampleRate::Hz48000,
        }
    }
}

/// Text-to-speech interface
///
/// Providers that return a single buffer yield a one-item stream.
#[async_trait]
pub trait Synthesizer: Send + Sync + 'static {
    async fn synthesize(&self, text: &str, voice: &VoiceOptions) -> Result<AudioChunkStream>;

    /// Provider name for logging
    fn name(&self) -> &str;
}
