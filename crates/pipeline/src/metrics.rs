//! Pipeline latency and turn metrics
//!
//! Thin wrappers over the `metrics` facade. Nothing is recorded unless the
//! host process installs a recorder.

use std::time::Duration;

pub const ASR_LATENCY_MS: &str = "asr_latency_ms";
pub const LLM_FIRST_TOKEN_MS: &str = "llm_first_token_ms";
pub const TTS_FIRST_CHUNK_MS: &str = "tts_first_chunk_ms";
pub const END_OF_SPEECH_TO_FIRST_AUDIO_MS: &str = "end_of_speech_to_first_audio_ms";
pub const BARGE_IN_STOP_MS: &str = "barge_in_stop_ms";

pub const TURNS_STARTED: &str = "cohost_turns_started_total";
pub const TURNS_DENIED: &str = "cohost_turns_denied_total";
pub const TURNS_FAILED: &str = "cohost_turns_failed_total";
pub const TURNS_BARGED_IN: &str = "cohost_turns_barged_in_total";
pub const SPEECH_TO_SPEECH_FALLBACKS: &str = "cohost_speech_to_speech_fallbacks_total";

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

pub fn record_asr_latency(d: Duration) {
    metrics::histogram!(ASR_LATENCY_MS).record(millis(d));
}

pub fn record_llm_first_token(d: Duration) {
    metrics::histogram!(LLM_FIRST_TOKEN_MS).record(millis(d));
}

pub fn record_tts_first_chunk(d: Duration) {
    metrics::histogram!(TTS_FIRST_CHUNK_MS).record(millis(d));
}

pub fn record_first_audio(d: Duration) {
    metrics::histogram!(END_OF_SPEECH_TO_FIRST_AUDIO_MS).record(millis(d));
}

pub fn record_barge_in_stop(d: Duration) {
    metrics::histogram!(BARGE_IN_STOP_MS).record(millis(d));
}

pub fn turn_started() {
    metrics::counter!(TURNS_STARTED).increment(1);
}

pub fn turn_denied() {
    metrics::counter!(TURNS_DENIED).increment(1);
}

/// `reason` is a short static tag such as `transcription` or `generation`
pub fn turn_failed(reason: &'static str) {
    metrics::counter!(TURNS_FAILED, "reason" => reason).increment(1);
}

pub fn turn_barged_in() {
    metrics::counter!(TURNS_BARGED_IN).increment(1);
}

pub fn speech_to_speech_fallback(kind: &'static str) {
    metrics::counter!(SPEECH_TO_SPEECH_FALLBACKS, "kind" => kind).increment(1);
}
