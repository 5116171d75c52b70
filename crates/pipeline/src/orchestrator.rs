//! Co-host Orchestrator
//!
//! Drives one agent through live room audio:
//!
//! ```text
//! audio ─► segmenter ─► transcript ─► safety ─► coordinator ─► reply ─► audio events
//!              │                                                  ▲
//!              └──── speech while speaking ── barge-in ───────────┘
//! ```
//!
//! At most one turn runs at a time. An utterance that finishes while a turn
//! is in progress lands in a single pending slot (newest wins) and starts
//! as soon as the current turn completes. Replies come from the
//! speech-to-speech backend when configured, otherwise from the
//! LLM → sentence detector → synthesizer chain.

use bytes::Bytes;
use futures::channel::mpsc::{unbounded, UnboundedReceiver};
use futures::StreamExt;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Notify};

use cohost_config::Settings;
use cohost_core::{
    audio, AudioFormatHint, ChatOptions, LanguageModel, Message, Role, SampleRate,
    SpeechToSpeech, SpeechTurnError, SpeechTurnRequest, StreamingOptions, StreamingSession,
    Synthesizer, Transcriber, TranscriptionEvent, TurnCoordination, TurnGrant, TurnReport,
    UtteranceSegment, VoiceOptions,
};

use crate::feedback::{BehaviorLevel, FeedbackCollector};
use crate::filler::{self, FillerLibrary};
use crate::memory::SessionMemory;
use crate::metrics;
use crate::processors::SentenceDetector;
use crate::safety::SafetyGate;
use crate::vad::{FrameSegmenter, SegmenterConfig, VadClassifier};
use crate::PipelineError;

/// Orchestrator events
#[derive(Debug, Clone)]
pub enum OrchestratorEvent {
    /// First speech frame of a new utterance
    SpeechStarted,
    /// Segmenter closed an utterance
    UtteranceEnded { bytes: usize },
    /// Filtered caller transcript
    Transcript { text: String },
    /// Coordinator gave the floor to someone else
    TurnDenied,
    /// Reply or filler audio, ready for the room
    Audio { pcm: Bytes, sample_rate: SampleRate },
    /// Caller spoke over the reply
    BargeIn,
    /// A turn that reached the reply stage finished
    Reply {
        user: String,
        assistant: String,
        cancelled: bool,
    },
    /// A turn failed; the agent stays silent
    TurnFailed { reason: String },
    /// A filler clip began playing
    FillerStarted,
}

/// Coarse turn phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TurnPhase {
    /// Waiting for an utterance
    #[default]
    Idle,
    /// Transcribing, coordinating or waiting on the backend
    Processing,
    /// Producing reply audio; caller speech is a barge-in
    Speaking,
}

impl TurnPhase {
    pub fn in_progress(&self) -> bool {
        !matches!(self, Self::Idle)
    }
}

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub persona_prompt: String,
    pub max_turns_in_memory: usize,
    pub segmenter: SegmenterConfig,
    pub energy_threshold: f64,
    pub max_user_chars: usize,
    pub max_assistant_chars: usize,
    pub max_sentence_chars: usize,
    pub transcription_timeout: Duration,
    pub llm_timeout: Duration,
    pub synthesis_timeout: Duration,
    /// Bound on the speech-to-speech transcript after the audio ends
    pub speech_turn_timeout: Duration,
    pub voice: VoiceOptions,
    pub language: Option<String>,
    /// Voice prompt and seed passed to the speech-to-speech backend
    pub speech_voice_prompt: Option<String>,
    pub speech_seed: Option<u64>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

impl OrchestratorConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        let p = &settings.pipeline;
        let output_rate = SampleRate::try_from(p.output_sample_rate).unwrap_or(SampleRate::Hz48000);
        let speech = &settings.speech_to_speech;

        Self {
            persona_prompt: settings.agent.persona_prompt.clone(),
            max_turns_in_memory: settings.agent.max_turns_in_memory,
            segmenter: SegmenterConfig::from_settings(&settings.vad),
            energy_threshold: settings.vad.energy_threshold,
            max_user_chars: p.max_user_chars,
            max_assistant_chars: p.max_assistant_chars,
            max_sentence_chars: p.max_sentence_chars,
            transcription_timeout: Duration::from_millis(p.transcription_timeout_ms),
            llm_timeout: Duration::from_millis(p.llm_timeout_ms),
            synthesis_timeout: Duration::from_millis(p.synthesis_timeout_ms),
            speech_turn_timeout: Duration::from_millis(speech.turn_timeout_ms),
            voice: VoiceOptions {
                voice_name: p.voice_name.clone(),
                language_code: p.language_code.clone(),
                sample_rate: output_rate,
            },
            language: Some(p.language_code.clone()).filter(|l| !l.is_empty()),
            speech_voice_prompt: Some(speech.voice_prompt.clone()).filter(|v| !v.is_empty()),
            speech_seed: speech.seed,
        }
    }
}

/// Per-turn cancellation.
///
/// Audio is only emitted through [`CancelToken::emit_if_live`], which holds
/// the same lock as [`CancelToken::cancel`]; once cancelled, nothing more
/// gets out.
pub(crate) struct CancelToken {
    cancelled: AtomicBool,
    timing: Mutex<CancelTiming>,
    notify: Notify,
}

#[derive(Default)]
struct CancelTiming {
    cancelled_at: Option<Instant>,
    last_audio_at: Option<Instant>,
}

impl CancelToken {
    fn new() -> Self {
        Self {
            cancelled: AtomicBool::new(false),
            timing: Mutex::new(CancelTiming::default()),
            notify: Notify::new(),
        }
    }

    /// Returns true for the first call only
    fn cancel(&self) -> bool {
        let mut timing = self.timing.lock();
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return false;
        }
        timing.cancelled_at = Some(Instant::now());
        self.notify.notify_waiters();
        true
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once the turn is cancelled
    async fn cancelled(&self) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }

    fn emit_if_live(&self, emit: impl FnOnce()) -> bool {
        let mut timing = self.timing.lock();
        if self.cancelled.load(Ordering::SeqCst) {
            return false;
        }
        emit();
        timing.last_audio_at = Some(Instant::now());
        true
    }

    /// Cancel signal to last audio chunk, zero if nothing followed the
    /// signal
    fn stop_latency(&self) -> Option<Duration> {
        let timing = self.timing.lock();
        let cancelled_at = timing.cancelled_at?;
        let last = timing.last_audio_at.unwrap_or(cancelled_at);
        Some(last.saturating_duration_since(cancelled_at))
    }
}

/// An utterance waiting to become a turn
struct PendingUtterance {
    segment: UtteranceSegment,
    session: Option<Box<dyn StreamingSession>>,
}

enum TurnInput {
    Utterance(PendingUtterance),
    Proactive(String),
}

struct TurnControl {
    phase: TurnPhase,
    pending: Option<PendingUtterance>,
    cancel: Option<Arc<CancelToken>>,
}

/// Streaming transcription session for the current speech run
struct OpenSession {
    session: Box<dyn StreamingSession>,
    events: UnboundedReceiver<TranscriptionEvent>,
}

/// State owned by `process_audio`
#[derive(Default)]
struct AudioIntake {
    buffer: Vec<u8>,
    /// Frames of the current speech run
    utterance: Vec<u8>,
    session: Option<OpenSession>,
    /// A predicted turn already consumed the current run
    predicted: bool,
}

/// Accumulated state of one reply
struct ReplyState {
    started: Instant,
    spoken: Vec<String>,
    audio_sent: bool,
    filler_abort: Option<Arc<AtomicBool>>,
}

impl ReplyState {
    fn new(started: Instant) -> Self {
        Self {
            started,
            spoken: Vec::new(),
            audio_sent: false,
            filler_abort: None,
        }
    }

    fn stop_filler(&self) {
        if let Some(abort) = &self.filler_abort {
            abort.store(true, Ordering::SeqCst);
        }
    }

    fn assistant_text(&self) -> String {
        self.spoken.join(" ")
    }
}

/// Co-host orchestrator
pub struct Orchestrator {
    config: OrchestratorConfig,
    segmenter: FrameSegmenter,
    transcriber: Arc<dyn Transcriber>,
    llm: Arc<dyn LanguageModel>,
    synthesizer: Arc<dyn Synthesizer>,
    speech_to_speech: Option<Arc<dyn SpeechToSpeech>>,
    coordination: Option<Arc<dyn TurnCoordination>>,
    feedback: Option<Arc<FeedbackCollector>>,
    fillers: Option<FillerLibrary>,
    safety: SafetyGate,
    memory: Mutex<SessionMemory>,
    control: Mutex<TurnControl>,
    intake: tokio::sync::Mutex<AudioIntake>,
    event_tx: broadcast::Sender<OrchestratorEvent>,
}

impl Orchestrator {
    /// Create an orchestrator with the energy classifier
    pub fn new(
        config: OrchestratorConfig,
        transcriber: Arc<dyn Transcriber>,
        llm: Arc<dyn LanguageModel>,
        synthesizer: Arc<dyn Synthesizer>,
    ) -> Self {
        let segmenter = FrameSegmenter::new(
            config.segmenter.clone(),
            Arc::new(crate::vad::EnergyClassifier::new(config.energy_threshold)),
        );
        let safety = SafetyGate::new(config.max_user_chars, config.max_assistant_chars);
        let memory = SessionMemory::new(config.max_turns_in_memory);

        // Use larger capacity to avoid lagging slow receivers
        let (event_tx, _) = broadcast::channel(1000);

        tracing::info!(
            transcriber = transcriber.name(),
            llm = llm.model_name(),
            synthesizer = synthesizer.name(),
            "Orchestrator created"
        );

        Self {
            config,
            segmenter,
            transcriber,
            llm,
            synthesizer,
            speech_to_speech: None,
            coordination: None,
            feedback: None,
            fillers: None,
            safety,
            memory: Mutex::new(memory),
            control: Mutex::new(TurnControl {
                phase: TurnPhase::Idle,
                pending: None,
                cancel: None,
            }),
            intake: tokio::sync::Mutex::new(AudioIntake::default()),
            event_tx,
        }
    }

    /// Swap the speech classifier
    pub fn with_classifier(mut self, classifier: Arc<dyn VadClassifier>) -> Self {
        self.segmenter = FrameSegmenter::new(self.config.segmenter.clone(), classifier);
        self
    }

    /// Prefer a speech-to-speech backend for replies
    pub fn with_speech_to_speech(mut self, backend: Arc<dyn SpeechToSpeech>) -> Self {
        self.speech_to_speech = Some(backend);
        self
    }

    /// Gate every turn through a Turn Coordinator
    pub fn with_coordination(mut self, coordination: Arc<dyn TurnCoordination>) -> Self {
        self.coordination = Some(coordination);
        self
    }

    /// Shape replies by audience reactions
    pub fn with_feedback(mut self, feedback: Arc<FeedbackCollector>) -> Self {
        self.feedback = Some(feedback);
        self
    }

    /// Play a filler clip while the reply is being produced
    pub fn with_fillers(mut self, fillers: FillerLibrary) -> Self {
        self.fillers = Some(fillers);
        self
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.event_tx.subscribe()
    }

    pub fn phase(&self) -> TurnPhase {
        self.control.lock().phase
    }

    /// Whether an utterance is waiting in the pending slot
    pub fn has_pending(&self) -> bool {
        self.control.lock().pending.is_some()
    }

    /// Snapshot of the rolling history
    pub fn history(&self) -> Vec<Message> {
        self.memory.lock().messages()
    }

    pub fn set_running_summary(&self, summary: Option<String>) {
        self.memory.lock().set_running_summary(summary);
    }

    fn emit(&self, event: OrchestratorEvent) {
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }

    /// Feed room audio (16kHz mono PCM16, any chunk size).
    ///
    /// Returns once the chunk is segmented; turns run on spawned tasks.
    pub async fn process_audio(self: &Arc<Self>, chunk: &[u8]) -> Result<(), PipelineError> {
        let mut intake = self.intake.lock().await;
        intake.buffer.extend_from_slice(chunk);

        let frame_bytes = self.segmenter.frame_bytes();
        let whole = intake.buffer.len() / frame_bytes * frame_bytes;
        if whole == 0 {
            return Ok(());
        }
        let frames: Vec<u8> = intake.buffer.drain(..whole).collect();

        for frame in frames.chunks_exact(frame_bytes) {
            self.process_frame(&mut intake, frame).await;
        }
        Ok(())
    }

    async fn process_frame(self: &Arc<Self>, intake: &mut AudioIntake, frame: &[u8]) {
        let output = self.segmenter.process_frame(frame);

        if output.is_speech {
            self.maybe_barge_in();
        }

        if output.speech_started {
            intake.utterance.clear();
            intake.predicted = false;
            self.emit(OrchestratorEvent::SpeechStarted);
            intake.session = self.open_session().await;
        }

        if self.segmenter.in_speech() || output.end_of_turn {
            intake.utterance.extend_from_slice(frame);
            if !intake.predicted {
                self.push_to_session(intake, frame).await;
            }
        }

        if !intake.predicted && self.turn_predicted(intake) {
            intake.predicted = true;
            if let Some(open) = intake.session.take() {
                let segment = UtteranceSegment::new(
                    Bytes::from(intake.utterance.clone()),
                    self.segmenter.config().sample_rate,
                );
                tracing::debug!(bytes = segment.len_bytes(), "Turn predicted by transcriber");
                self.submit(PendingUtterance {
                    segment,
                    session: Some(open.session),
                });
            }
        }

        if output.end_of_turn {
            let was_predicted = std::mem::take(&mut intake.predicted);
            let session = intake.session.take().map(|open| open.session);
            intake.utterance.clear();

            let Some(segment) = output.segment.filter(|s| !s.is_empty()) else {
                return;
            };
            self.emit(OrchestratorEvent::UtteranceEnded {
                bytes: segment.len_bytes(),
            });
            if was_predicted {
                return;
            }
            self.submit(PendingUtterance { segment, session });
        }
    }

    /// True when the streaming session predicted end of turn and no turn
    /// is in progress
    fn turn_predicted(&self, intake: &mut AudioIntake) -> bool {
        let Some(open) = intake.session.as_mut() else {
            return false;
        };
        let mut predicted = false;
        while let Ok(Some(event)) = open.events.try_next() {
            if event == TranscriptionEvent::TurnPredicted {
                predicted = true;
            }
        }
        predicted && !self.phase().in_progress()
    }

    async fn open_session(&self) -> Option<OpenSession> {
        let (tx, events) = unbounded();
        let options = StreamingOptions {
            sample_rate: self.segmenter.config().sample_rate,
            language: self.config.language.clone(),
            events: Some(tx),
        };
        match self.transcriber.create_streaming_session(options).await {
            Ok(Some(session)) => Some(OpenSession { session, events }),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, "Streaming transcription unavailable for this run");
                None
            },
        }
    }

    async fn push_to_session(&self, intake: &mut AudioIntake, frame: &[u8]) {
        let Some(open) = intake.session.as_mut() else {
            return;
        };
        if let Err(e) = open.session.push(frame).await {
            tracing::warn!(error = %e, "Streaming session push failed, will transcribe in one shot");
            intake.session = None;
        }
    }

    fn maybe_barge_in(&self) {
        let cancel = {
            let control = self.control.lock();
            if control.phase != TurnPhase::Speaking {
                return;
            }
            control.cancel.clone()
        };
        if let Some(cancel) = cancel {
            if cancel.cancel() {
                tracing::info!("Barge-in, stopping reply");
                metrics::turn_barged_in();
                self.emit(OrchestratorEvent::BargeIn);
            }
        }
    }

    /// Start a turn now, or park the utterance in the pending slot
    fn submit(self: &Arc<Self>, utterance: PendingUtterance) {
        let cancel = {
            let mut control = self.control.lock();
            if control.phase.in_progress() {
                if control.pending.is_some() {
                    tracing::debug!("Pending utterance superseded");
                }
                control.pending = Some(utterance);
                return;
            }
            let cancel = Arc::new(CancelToken::new());
            control.phase = TurnPhase::Processing;
            control.cancel = Some(cancel.clone());
            cancel
        };
        self.spawn_turns(TurnInput::Utterance(utterance), cancel);
    }

    /// Force out buffered speech, handled like an end of turn
    pub async fn flush(self: &Arc<Self>) {
        let mut intake = self.intake.lock().await;
        intake.buffer.clear();
        let was_predicted = std::mem::take(&mut intake.predicted);
        let session = intake.session.take().map(|open| open.session);
        intake.utterance.clear();

        if let Some(segment) = self.segmenter.flush() {
            self.emit(OrchestratorEvent::UtteranceEnded {
                bytes: segment.len_bytes(),
            });
            if !was_predicted {
                self.submit(PendingUtterance { segment, session });
            }
        }
    }

    /// Speak a line without a caller utterance (greeting, host prompt).
    ///
    /// Dropped, returning false, if a turn is already in progress. No
    /// coordinator turn is requested.
    pub fn speak_proactively(self: &Arc<Self>, text: &str) -> bool {
        let text = text.trim();
        if text.is_empty() {
            return false;
        }
        let cancel = {
            let mut control = self.control.lock();
            if control.phase.in_progress() {
                tracing::debug!("Proactive line dropped, turn in progress");
                return false;
            }
            let cancel = Arc::new(CancelToken::new());
            control.phase = TurnPhase::Processing;
            control.cancel = Some(cancel.clone());
            cancel
        };
        self.spawn_turns(TurnInput::Proactive(text.to_string()), cancel);
        true
    }

    fn spawn_turns(self: &Arc<Self>, input: TurnInput, cancel: Arc<CancelToken>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut next = Some((input, cancel));
            while let Some((input, cancel)) = next {
                match input {
                    TurnInput::Utterance(utterance) => this.run_turn(utterance, &cancel).await,
                    TurnInput::Proactive(text) => this.run_proactive(text, &cancel).await,
                }
                next = this.complete_turn();
            }
        });
    }

    /// Take the pending utterance or go idle, atomically
    fn complete_turn(&self) -> Option<(TurnInput, Arc<CancelToken>)> {
        let mut control = self.control.lock();
        match control.pending.take() {
            Some(utterance) => {
                let cancel = Arc::new(CancelToken::new());
                control.phase = TurnPhase::Processing;
                control.cancel = Some(cancel.clone());
                Some((TurnInput::Utterance(utterance), cancel))
            },
            None => {
                control.phase = TurnPhase::Idle;
                control.cancel = None;
                None
            },
        }
    }

    fn set_speaking(&self) {
        let mut control = self.control.lock();
        if control.phase == TurnPhase::Processing {
            control.phase = TurnPhase::Speaking;
        }
    }

    async fn run_turn(&self, utterance: PendingUtterance, cancel: &Arc<CancelToken>) {
        let started = Instant::now();
        metrics::turn_started();

        let transcript = match self.transcribe(utterance.segment.clone(), utterance.session).await {
            Ok(text) => text,
            Err(e) => return self.fail_turn(e),
        };

        let Some(user) = self.safety.sanitize_user(&transcript).into_text() else {
            tracing::debug!("Empty transcript, turn skipped");
            return;
        };
        self.emit(OrchestratorEvent::Transcript { text: user.clone() });

        let grant = match &self.coordination {
            Some(coordination) => match self.coordinate(coordination.as_ref(), &user).await {
                Some(grant) => Some(grant),
                None => {
                    metrics::turn_denied();
                    self.emit(OrchestratorEvent::TurnDenied);
                    return;
                },
            },
            None => None,
        };

        self.set_speaking();
        let mut reply = ReplyState::new(started);
        self.start_filler(&mut reply, cancel).await;

        let result = self
            .produce_reply(&user, &utterance.segment, grant.as_ref(), cancel, &mut reply)
            .await;
        reply.stop_filler();

        if let Err(e) = &result {
            tracing::warn!(error = %e, "Reply failed");
            metrics::turn_failed(e.tag());
            self.emit(OrchestratorEvent::TurnFailed {
                reason: e.to_string(),
            });
        }

        self.finish_reply(user, reply, cancel, grant).await;
    }

    async fn run_proactive(&self, text: String, cancel: &Arc<CancelToken>) {
        self.set_speaking();
        let mut reply = ReplyState::new(Instant::now());
        let mut detector = SentenceDetector::new(self.config.max_sentence_chars);

        let mut sentences = detector.push(&text);
        sentences.extend(detector.finish());

        let mut result = Ok(());
        for sentence in sentences {
            if cancel.is_cancelled() {
                break;
            }
            if let Err(e) = self.speak_sentence(&sentence, cancel, &mut reply).await {
                result = Err(e);
                break;
            }
        }

        if let Err(e) = &result {
            metrics::turn_failed(e.tag());
            self.emit(OrchestratorEvent::TurnFailed {
                reason: e.to_string(),
            });
        }
        self.finish_reply(String::new(), reply, cancel, None).await;
    }

    fn fail_turn(&self, err: PipelineError) {
        tracing::warn!(error = %err, "Turn failed before reply");
        metrics::turn_failed(err.tag());
        self.emit(OrchestratorEvent::TurnFailed {
            reason: err.to_string(),
        });
    }

    /// Finalize the streaming session, falling back to one-shot WAV
    async fn transcribe(
        &self,
        segment: UtteranceSegment,
        session: Option<Box<dyn StreamingSession>>,
    ) -> Result<String, PipelineError> {
        let asr_start = Instant::now();

        if let Some(session) = session {
            match tokio::time::timeout(self.config.transcription_timeout, session.end()).await {
                Ok(Ok(result)) if !result.is_empty() => {
                    metrics::record_asr_latency(asr_start.elapsed());
                    return Ok(result.text);
                },
                Ok(Ok(_)) => tracing::debug!("Streaming session returned nothing, retrying"),
                Ok(Err(e)) => tracing::warn!(error = %e, "Streaming session failed, retrying"),
                Err(_) => tracing::warn!("Streaming session timed out, retrying"),
            }
        }

        let wav = audio::pcm16_to_wav(&segment.pcm, segment.sample_rate)?;
        let result = tokio::time::timeout(
            self.config.transcription_timeout,
            self.transcriber.transcribe(&wav, AudioFormatHint::Wav),
        )
        .await
        .map_err(|_| PipelineError::Timeout("transcription"))??;

        metrics::record_asr_latency(asr_start.elapsed());
        Ok(result.text)
    }

    /// Sync shared history and ask for the floor
    async fn coordinate(
        &self,
        coordination: &dyn TurnCoordination,
        user: &str,
    ) -> Option<TurnGrant> {
        let shared = coordination.recent_turns().await;
        if !shared.is_empty() {
            self.memory.lock().replace_with(&shared);
        }
        coordination.request_turn(user).await
    }

    async fn start_filler(&self, reply: &mut ReplyState, cancel: &Arc<CancelToken>) {
        let Some(fillers) = &self.fillers else {
            return;
        };
        let Some(clip) = fillers.choose().await else {
            return;
        };

        let abort = Arc::new(AtomicBool::new(false));
        reply.filler_abort = Some(abort.clone());

        let event_tx = self.event_tx.clone();
        let cancel = Arc::clone(cancel);
        let sample_rate = self.config.voice.sample_rate;
        tracing::debug!(clip = %clip.id, "Playing filler");
        let _ = event_tx.send(OrchestratorEvent::FillerStarted);

        tokio::spawn(async move {
            let mut stream = filler::stream_clip(clip.path, abort.clone());
            while let Some(chunk) = stream.next().await {
                let pcm = match chunk {
                    Ok(pcm) => pcm,
                    Err(e) => {
                        tracing::debug!(error = %e, "Filler stream ended early");
                        break;
                    },
                };
                if abort.load(Ordering::SeqCst) {
                    break;
                }
                let sent = cancel.emit_if_live(|| {
                    let _ = event_tx.send(OrchestratorEvent::Audio { pcm, sample_rate });
                });
                if !sent {
                    break;
                }
            }
        });
    }

    async fn produce_reply(
        &self,
        user: &str,
        segment: &UtteranceSegment,
        grant: Option<&TurnGrant>,
        cancel: &Arc<CancelToken>,
        reply: &mut ReplyState,
    ) -> Result<(), PipelineError> {
        let level = self
            .feedback
            .as_ref()
            .map(|f| f.behavior_level())
            .unwrap_or_default();
        let system_prompt = self.system_prompt(level);

        if let Some(backend) = &self.speech_to_speech {
            let request = SpeechTurnRequest {
                turn_id: grant.and_then(|g| g.turn_id.clone()),
                user_pcm: segment.pcm.clone(),
                text_prompt: system_prompt.clone(),
                voice_prompt: self.config.speech_voice_prompt.clone(),
                seed: self.config.speech_seed,
            };
            match self.speech_turn(backend.as_ref(), request, cancel, reply).await {
                Ok(()) => return Ok(()),
                Err(e) if !e.is_fatal() && !reply.audio_sent && !cancel.is_cancelled() => {
                    tracing::warn!(
                        endpoint = backend.endpoint(),
                        kind = e.kind(),
                        error = %e,
                        "Speech-to-speech failed before audio, using default chain"
                    );
                    metrics::speech_to_speech_fallback(e.kind());
                },
                Err(e) => return Err(PipelineError::SpeechToSpeech(e.to_string())),
            }
        }

        self.default_reply(user, &system_prompt, level, cancel, reply)
            .await
    }

    fn system_prompt(&self, level: BehaviorLevel) -> String {
        let mut prompt = self.config.persona_prompt.trim().to_string();
        if let Some(summary) = self.memory.lock().running_summary() {
            prompt.push_str("\n\nSummary of the conversation so far: ");
            prompt.push_str(summary);
        }
        if let Some(hint) = level.prompt_hint() {
            prompt.push_str("\n\n");
            prompt.push_str(hint);
        }
        prompt
    }

    async fn speech_turn(
        &self,
        backend: &dyn SpeechToSpeech,
        request: SpeechTurnRequest,
        cancel: &Arc<CancelToken>,
        reply: &mut ReplyState,
    ) -> Result<(), SpeechTurnError> {
        let turn = backend.start_turn(request).await?;
        let mut audio = turn.audio;
        let mut failure = None;

        loop {
            let item = tokio::select! {
                _ = cancel.cancelled() => {
                    turn.abort.abort();
                    break;
                },
                item = audio.next() => item,
            };
            match item {
                None => break,
                Some(Ok(pcm)) if pcm.is_empty() => continue,
                Some(Ok(pcm)) => {
                    if !self.emit_audio(pcm, SampleRate::Hz48000, cancel, reply) {
                        turn.abort.abort();
                        break;
                    }
                },
                Some(Err(e)) => {
                    failure = Some(e);
                    break;
                },
            }
        }

        let text = match tokio::time::timeout(self.config.speech_turn_timeout, turn.text).await {
            Ok(text) => text,
            Err(_) => {
                turn.abort.abort();
                String::new()
            },
        };
        let text = text.trim();
        if !text.is_empty() {
            reply.spoken.push(text.to_string());
        }

        match failure {
            Some(e) => Err(e),
            None if !reply.audio_sent && !cancel.is_cancelled() => Err(SpeechTurnError::NoAudio),
            None => Ok(()),
        }
    }

    async fn default_reply(
        &self,
        user: &str,
        system_prompt: &str,
        level: BehaviorLevel,
        cancel: &Arc<CancelToken>,
        reply: &mut ReplyState,
    ) -> Result<(), PipelineError> {
        let mut messages = vec![Message::system(system_prompt)];
        messages.extend(self.memory.lock().messages());
        messages.push(Message::user(user));

        let options = ChatOptions {
            stream: true,
            max_tokens: level.max_tokens(),
        };

        let llm_start = Instant::now();
        let response = tokio::time::timeout(self.config.llm_timeout, self.llm.chat(&messages, &options))
            .await
            .map_err(|_| PipelineError::Timeout("generation"))??;

        let mut detector = SentenceDetector::new(self.config.max_sentence_chars);

        let Some(mut stream) = response.stream else {
            metrics::record_llm_first_token(llm_start.elapsed());
            let mut sentences = detector.push(&response.text);
            sentences.extend(detector.finish());
            for sentence in sentences {
                if cancel.is_cancelled() {
                    return Ok(());
                }
                self.speak_sentence(&sentence, cancel, reply).await?;
            }
            return Ok(());
        };

        let mut first = true;
        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }
            let next = tokio::time::timeout(self.config.llm_timeout, stream.next())
                .await
                .map_err(|_| PipelineError::Timeout("generation"))?;
            let fragment = match next {
                None => break,
                Some(fragment) => fragment?,
            };
            if first {
                first = false;
                metrics::record_llm_first_token(llm_start.elapsed());
            }
            for sentence in detector.push(&fragment) {
                if cancel.is_cancelled() {
                    return Ok(());
                }
                self.speak_sentence(&sentence, cancel, reply).await?;
            }
        }

        if let Some(rest) = detector.finish() {
            if !cancel.is_cancelled() {
                self.speak_sentence(&rest, cancel, reply).await?;
            }
        }
        Ok(())
    }

    /// Safety-filter and synthesize one sentence, forwarding chunks as they
    /// arrive
    async fn speak_sentence(
        &self,
        sentence: &str,
        cancel: &Arc<CancelToken>,
        reply: &mut ReplyState,
    ) -> Result<(), PipelineError> {
        let Some(text) = self.safety.sanitize_assistant(sentence).into_text() else {
            return Ok(());
        };

        let tts_start = Instant::now();
        let mut chunks = tokio::time::timeout(
            self.config.synthesis_timeout,
            self.synthesizer.synthesize(&text, &self.config.voice),
        )
        .await
        .map_err(|_| PipelineError::Timeout("synthesis"))??;
        reply.spoken.push(text);

        let mut first = true;
        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }
            let next = tokio::time::timeout(self.config.synthesis_timeout, chunks.next())
                .await
                .map_err(|_| PipelineError::Timeout("synthesis"))?;
            let pcm = match next {
                None => return Ok(()),
                Some(chunk) => chunk?,
            };
            if pcm.is_empty() {
                continue;
            }
            if first {
                first = false;
                metrics::record_tts_first_chunk(tts_start.elapsed());
            }
            if !self.emit_audio(pcm, self.config.voice.sample_rate, cancel, reply) {
                return Ok(());
            }
        }
    }

    /// Emit one reply chunk unless the turn was cancelled
    fn emit_audio(
        &self,
        pcm: Bytes,
        sample_rate: SampleRate,
        cancel: &CancelToken,
        reply: &mut ReplyState,
    ) -> bool {
        if !reply.audio_sent {
            reply.stop_filler();
        }
        let sent = cancel.emit_if_live(|| {
            self.emit(OrchestratorEvent::Audio { pcm, sample_rate });
        });
        if sent && !reply.audio_sent {
            reply.audio_sent = true;
            metrics::record_first_audio(reply.started.elapsed());
        }
        sent
    }

    /// Memory, `Reply` event and coordinator report
    async fn finish_reply(
        &self,
        user: String,
        reply: ReplyState,
        cancel: &CancelToken,
        grant: Option<TurnGrant>,
    ) {
        let assistant = reply.assistant_text();
        let cancelled = cancel.is_cancelled();

        if let Some(latency) = cancel.stop_latency() {
            metrics::record_barge_in_stop(latency);
        }

        {
            let mut memory = self.memory.lock();
            memory.append(Role::User, &user);
            memory.append(Role::Assistant, &assistant);
        }

        tracing::info!(
            user_chars = user.len(),
            assistant_chars = assistant.len(),
            cancelled,
            "Turn complete"
        );
        self.emit(OrchestratorEvent::Reply {
            user: user.clone(),
            assistant: assistant.clone(),
            cancelled,
        });

        if let (Some(coordination), Some(grant)) = (&self.coordination, grant) {
            coordination
                .end_turn(TurnReport {
                    user_message: user,
                    assistant_message: assistant,
                    turn_id: grant.turn_id,
                })
                .await;
        }
    }
}
