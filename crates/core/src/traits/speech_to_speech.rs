//! Speech-to-speech backend contract
//!
//! One call runs one full-duplex turn: caller audio goes out, reply audio
//! streams back. Capacity, handshake and timeouts are the implementation's
//! concern; failures arrive as [`SpeechTurnError`].

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::SpeechTurnError;

/// Reply audio as room-rate PCM16 chunks. A trailing `Err` reports how the
/// turn failed; an aborted turn simply ends.
pub type SpeechAudioStream =
    Pin<Box<dyn Stream<Item = std::result::Result<Bytes, SpeechTurnError>> + Send>>;

/// Input for one speech-to-speech turn
#[derive(Debug, Clone, Default)]
pub struct SpeechTurnRequest {
    /// Correlates logs with the coordinator lease
    pub turn_id: Option<String>,
    /// Caller audio, 16kHz mono PCM16
    pub user_pcm: Bytes,
    pub text_prompt: String,
    pub voice_prompt: Option<String>,
    pub seed: Option<u64>,
}

/// Cancels an in-flight turn
pub trait TurnAbort: Send + Sync {
    /// Close the connection. Not reported as a failure; idempotent.
    fn abort(&self);
}

/// A running turn
pub struct SpeechTurn {
    pub audio: SpeechAudioStream,
    /// Best-effort transcript of the reply, resolved when the socket closes
    pub text: BoxFuture<'static, String>,
    pub abort: Arc<dyn TurnAbort>,
}

#[async_trait]
pub trait SpeechToSpeech: Send + Sync + 'static {
    /// Start a turn. Fails immediately with `Busy` if the endpoint already
    /// has a turn in flight from this process.
    async fn start_turn(
        &self,
        request: SpeechTurnRequest,
    ) -> std::result::Result<SpeechTurn, SpeechTurnError>;

    /// Endpoint identity (the capacity key)
    fn endpoint(&self) -> &str;
}
