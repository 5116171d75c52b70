//! Speech-to-speech WebSocket client
//!
//! One socket per turn:
//!
//! 1. claim the endpoint (one turn in flight per server URL)
//! 2. connect to `<server>/api/chat` and wait for the `0x00` handshake
//! 3. send the caller audio as 24kHz Opus frames plus a silence tail
//! 4. stream decoded reply audio (48kHz) while collecting text fragments
//! 5. close once the reply goes idle, the turn times out or the caller aborts

use async_trait::async_trait;
use bytes::Bytes;
use futures::channel::mpsc::{unbounded, UnboundedSender};
use futures::stream::{SplitSink, SplitStream};
use futures::{FutureExt, Sink, SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Notify};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{Connector, MaybeTlsStream, WebSocketStream};

use cohost_config::constants::speech_to_speech::{IDLE_CLOSE_MS, IDLE_POLL_MS};
use cohost_config::SpeechToSpeechConfig;
use cohost_core::{
    audio, SampleRate, SpeechToSpeech, SpeechTurn, SpeechTurnError, SpeechTurnRequest,
    StreamResampler, TurnAbort,
};

use crate::capacity::{CapacityGuard, CapacityPermit};
use crate::codec::{OpusDecoder, OpusEncoder};
use crate::protocol::{self, ServerMessage};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type SocketSink = SplitSink<Socket, Message>;
type SocketStream = SplitStream<Socket>;

/// Never close sooner than this after the last frame is sent
const MAX_MIN_IDLE_WAIT: Duration = Duration::from_millis(300);

/// Client configuration
#[derive(Debug, Clone)]
pub struct SpeechToSpeechClientConfig {
    pub server_url: String,
    pub voice_prompt: String,
    pub seed: Option<u64>,
    /// Accept invalid TLS certificates
    pub ssl_insecure: bool,
    pub turn_timeout: Duration,
    pub handshake_timeout: Duration,
    /// Reply idleness that closes the socket
    pub idle_close: Duration,
    pub idle_poll: Duration,
}

impl SpeechToSpeechClientConfig {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self::from_config(&SpeechToSpeechConfig {
            server_url: server_url.into(),
            ..Default::default()
        })
    }

    /// `None` when the backend is disabled or has no URL
    pub fn from_settings(settings: &SpeechToSpeechConfig) -> Option<Self> {
        if !settings.enabled || settings.server_url.trim().is_empty() {
            return None;
        }
        Some(Self::from_config(settings))
    }

    fn from_config(settings: &SpeechToSpeechConfig) -> Self {
        let turn_timeout = Duration::from_millis(settings.turn_timeout_ms);
        Self {
            server_url: settings.server_url.trim().to_string(),
            voice_prompt: settings.voice_prompt.clone(),
            seed: settings.seed,
            ssl_insecure: settings.ssl_insecure,
            turn_timeout,
            handshake_timeout: protocol::handshake_timeout(turn_timeout),
            idle_close: Duration::from_millis(IDLE_CLOSE_MS),
            idle_poll: Duration::from_millis(IDLE_POLL_MS),
        }
    }

    fn min_idle_wait(&self) -> Duration {
        MAX_MIN_IDLE_WAIT.min(self.idle_close / 3)
    }
}

/// Speech-to-speech client
pub struct SpeechToSpeechClient {
    config: SpeechToSpeechClientConfig,
    capacity: CapacityGuard,
}

impl SpeechToSpeechClient {
    /// Client sharing the process-wide capacity guard
    pub fn new(config: SpeechToSpeechClientConfig) -> Self {
        Self {
            config,
            capacity: CapacityGuard::global(),
        }
    }

    pub fn with_capacity(mut self, capacity: CapacityGuard) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn config(&self) -> &SpeechToSpeechClientConfig {
        &self.config
    }

    async fn connect(&self, url: &str) -> Result<Socket, SpeechTurnError> {
        let result = if self.config.ssl_insecure {
            let tls = native_tls::TlsConnector::builder()
                .danger_accept_invalid_certs(true)
                .danger_accept_invalid_hostnames(true)
                .build()
                .map_err(|e| SpeechTurnError::HandshakeFailed(e.to_string()))?;
            tokio_tungstenite::connect_async_tls_with_config(
                url,
                None,
                false,
                Some(Connector::NativeTls(tls)),
            )
            .await
        } else {
            tokio_tungstenite::connect_async(url).await
        };

        result
            .map(|(socket, _response)| socket)
            .map_err(|e| SpeechTurnError::HandshakeFailed(e.to_string()))
    }

    async fn open(&self, url: &str) -> Result<(SocketSink, SocketStream), SpeechTurnError> {
        let socket = self.connect(url).await?;
        let (sink, mut stream) = socket.split();
        wait_for_handshake(&mut stream).await?;
        Ok((sink, stream))
    }
}

/// Read until the `0x00` handshake; anything before it is ignored
async fn wait_for_handshake(stream: &mut SocketStream) -> Result<(), SpeechTurnError> {
    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Binary(data)) => {
                if ServerMessage::parse(&data) == Some(ServerMessage::Handshake) {
                    return Ok(());
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {},
            Err(e) => return Err(SpeechTurnError::WebSocket(e.to_string())),
        }
    }
    Err(SpeechTurnError::HandshakeFailed(
        "socket closed before handshake".to_string(),
    ))
}

#[async_trait]
impl SpeechToSpeech for SpeechToSpeechClient {
    async fn start_turn(&self, request: SpeechTurnRequest) -> Result<SpeechTurn, SpeechTurnError> {
        let started = Instant::now();
        let endpoint = self.config.server_url.clone();

        let permit = self
            .capacity
            .try_acquire(&endpoint)
            .ok_or_else(|| SpeechTurnError::Busy(endpoint.clone()))?;

        let voice_prompt = request
            .voice_prompt
            .as_deref()
            .unwrap_or(&self.config.voice_prompt);
        let seed = request.seed.or(self.config.seed);
        let url = protocol::chat_url(&endpoint, voice_prompt, &request.text_prompt, seed);

        tracing::info!(
            endpoint = %endpoint,
            turn_id = ?request.turn_id,
            user_bytes = request.user_pcm.len(),
            "Starting speech-to-speech turn"
        );

        let handshake_ms = self.config.handshake_timeout.as_millis() as u64;
        let (sink, stream) = tokio::time::timeout(self.config.handshake_timeout, self.open(&url))
            .await
            .map_err(|_| SpeechTurnError::HandshakeTimeout(handshake_ms))??;

        let encoder = OpusEncoder::new().map_err(|e| SpeechTurnError::Unexpected(e.to_string()))?;
        let packets = protocol::prepare_frames(&request.user_pcm)
            .iter()
            .map(|frame| encoder.encode(frame).map(|p| protocol::audio_message(&p)))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| SpeechTurnError::Unexpected(e.to_string()))?;
        let decoder = OpusDecoder::new().map_err(|e| SpeechTurnError::Unexpected(e.to_string()))?;

        let (audio_tx, audio_rx) = unbounded();
        let (text_tx, text_rx) = oneshot::channel();
        let abort = Arc::new(SessionAbort::default());

        let session = Session {
            endpoint,
            deadline: started + self.config.turn_timeout,
            turn_timeout_ms: self.config.turn_timeout.as_millis() as u64,
            idle_close: self.config.idle_close,
            idle_poll: self.config.idle_poll,
            min_idle_wait: self.config.min_idle_wait(),
            decoder,
            audio_tx,
            abort: abort.clone(),
            permit,
        };
        tokio::spawn(session.run(sink, stream, packets, text_tx));

        Ok(SpeechTurn {
            audio: Box::pin(audio_rx),
            text: async move { text_rx.await.unwrap_or_default() }.boxed(),
            abort,
        })
    }

    fn endpoint(&self) -> &str {
        &self.config.server_url
    }
}

#[derive(Default)]
struct SessionAbort {
    notify: Notify,
}

impl TurnAbort for SessionAbort {
    fn abort(&self) {
        // Stores a permit when the session is not waiting yet
        self.notify.notify_one();
    }
}

/// One open turn after the handshake
struct Session {
    endpoint: String,
    deadline: Instant,
    turn_timeout_ms: u64,
    idle_close: Duration,
    idle_poll: Duration,
    min_idle_wait: Duration,
    decoder: OpusDecoder,
    audio_tx: UnboundedSender<Result<Bytes, SpeechTurnError>>,
    abort: Arc<SessionAbort>,
    permit: CapacityPermit,
}

impl Session {
    async fn run(
        self,
        sink: SocketSink,
        mut stream: SocketStream,
        packets: Vec<Vec<u8>>,
        text_tx: oneshot::Sender<String>,
    ) {
        let (sent_tx, mut sent_rx) = oneshot::channel();
        let (close_tx, close_rx) = oneshot::channel::<()>();
        let writer = tokio::spawn(write_frames(sink, packets, sent_tx, close_rx));

        let mut text = String::new();
        let mut saw_audio = false;
        let mut aborted = false;
        let mut last_audio_at = Instant::now();
        let mut send_done_at: Option<Instant> = None;
        let mut ticker = tokio::time::interval(self.idle_poll);
        // One resampler for the whole reply keeps packet boundaries continuous
        let mut resampler = StreamResampler::new(SampleRate::Hz24000, SampleRate::Hz48000);

        let timeout = tokio::time::sleep_until(self.deadline);
        tokio::pin!(timeout);

        let outcome: Result<(), SpeechTurnError> = loop {
            tokio::select! {
                _ = self.abort.notify.notified() => {
                    aborted = true;
                    break Ok(());
                },
                _ = &mut timeout => break Err(SpeechTurnError::TurnTimeout(self.turn_timeout_ms)),
                sent = &mut sent_rx, if send_done_at.is_none() => match sent {
                    Ok(Ok(())) => send_done_at = Some(Instant::now()),
                    Ok(Err(e)) => break Err(e),
                    Err(_) => break Err(SpeechTurnError::Unexpected("frame writer stopped".to_string())),
                },
                message = stream.next() => match message {
                    Some(Ok(Message::Binary(data))) => match ServerMessage::parse(&data) {
                        Some(ServerMessage::Audio(packet)) if !packet.is_empty() => {
                            let samples = match self.decoder.decode(packet) {
                                Ok(samples) => samples,
                                Err(e) => break Err(SpeechTurnError::Decode(e.to_string())),
                            };
                            saw_audio = true;
                            last_audio_at = Instant::now();

                            let pcm48 = resampler.process(&audio::samples_to_pcm16(&samples));
                            if !pcm48.is_empty() {
                                // Receiver may be gone; keep draining until close
                                let _ = self.audio_tx.unbounded_send(Ok(Bytes::from(pcm48)));
                            }
                        },
                        Some(ServerMessage::Text(piece)) => text.push_str(&String::from_utf8_lossy(piece)),
                        _ => {},
                    },
                    Some(Ok(Message::Close(_))) | None => break Ok(()),
                    Some(Ok(_)) => {},
                    Some(Err(e)) => break Err(SpeechTurnError::WebSocket(e.to_string())),
                },
                _ = ticker.tick(), if send_done_at.is_some() => {
                    let now = Instant::now();
                    let since_send = send_done_at
                        .map(|done| now.saturating_duration_since(done))
                        .unwrap_or_default();
                    if since_send < self.min_idle_wait {
                        continue;
                    }
                    let idle = if saw_audio {
                        now.saturating_duration_since(last_audio_at)
                    } else {
                        since_send
                    };
                    if idle > self.idle_close {
                        break Ok(());
                    }
                },
            }
        };

        // Dropping the sender tells the writer to close the socket
        drop(close_tx);
        self.permit.release();

        let outcome = match outcome {
            Ok(()) if !saw_audio && !aborted => Err(SpeechTurnError::NoAudio),
            other => other,
        };

        match &outcome {
            Ok(()) => {
                let tail = resampler.flush();
                if !aborted && !tail.is_empty() {
                    let _ = self.audio_tx.unbounded_send(Ok(Bytes::from(tail)));
                }
                tracing::info!(
                    endpoint = %self.endpoint,
                    aborted,
                    text_chars = text.len(),
                    "Speech-to-speech turn finished"
                );
                metrics::counter!(
                    "cohost_speech_to_speech_turns_total",
                    "outcome" => if aborted { "aborted" } else { "ok" }
                )
                .increment(1);
            },
            Err(e) => {
                tracing::warn!(
                    endpoint = %self.endpoint,
                    kind = e.kind(),
                    error = %e,
                    "Speech-to-speech turn failed"
                );
                metrics::counter!("cohost_speech_to_speech_turns_total", "outcome" => e.kind())
                    .increment(1);
                let _ = self.audio_tx.unbounded_send(Err(e.clone()));
            },
        }

        let _ = text_tx.send(text);
        self.audio_tx.close_channel();
        let _ = writer.await;
    }
}

/// Send every frame, report completion, then close the socket when told to
/// (or immediately if told before sending finished)
async fn write_frames<S>(
    mut sink: S,
    packets: Vec<Vec<u8>>,
    sent_tx: oneshot::Sender<Result<(), SpeechTurnError>>,
    mut close_rx: oneshot::Receiver<()>,
) where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    let mut result = Ok(());
    let mut closed_early = false;

    for packet in packets {
        tokio::select! {
            biased;
            _ = &mut close_rx => {
                closed_early = true;
                break;
            },
            sent = sink.send(Message::Binary(packet)) => {
                if let Err(e) = sent {
                    result = Err(SpeechTurnError::Send(e.to_string()));
                    break;
                }
            },
        }
    }

    let _ = sent_tx.send(result);
    if !closed_early {
        let _ = close_rx.await;
    }
    let _ = sink.close().await;
}
