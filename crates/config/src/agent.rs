//! Agent identity and reply pipeline configuration

use serde::{Deserialize, Serialize};

use crate::constants::{pipeline, vad};

/// Who this agent process is
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Stable id used with the coordinator
    #[serde(default)]
    pub id: String,

    /// Name listeners use to address the agent
    #[serde(default = "default_display_name")]
    pub display_name: String,

    /// Persona system prompt
    #[serde(default = "default_persona_prompt")]
    pub persona_prompt: String,

    /// Rolling history capacity
    #[serde(default = "default_max_turns")]
    pub max_turns_in_memory: usize,
}

fn default_display_name() -> String {
    "Co-host".to_string()
}
fn default_persona_prompt() -> String {
    "You are a friendly co-host in a live audio room. Keep replies short, warm and \
     conversational; they will be spoken aloud."
        .to_string()
}
fn default_max_turns() -> usize {
    pipeline::MAX_TURNS_IN_MEMORY
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            display_name: default_display_name(),
            persona_prompt: default_persona_prompt(),
            max_turns_in_memory: default_max_turns(),
        }
    }
}

/// Frame segmenter settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VadSettings {
    #[serde(default = "default_silence_ms")]
    pub silence_ms: u32,

    #[serde(default = "default_energy_threshold")]
    pub energy_threshold: f64,

    /// Only consulted by vendor classifiers
    #[serde(default = "default_aggressiveness")]
    pub aggressiveness: u8,
}

fn default_silence_ms() -> u32 {
    vad::SILENCE_MS
}
fn default_energy_threshold() -> f64 {
    vad::ENERGY_THRESHOLD
}
fn default_aggressiveness() -> u8 {
    vad::AGGRESSIVENESS
}

impl Default for VadSettings {
    fn default() -> Self {
        Self {
            silence_ms: default_silence_ms(),
            energy_threshold: default_energy_threshold(),
            aggressiveness: default_aggressiveness(),
        }
    }
}

/// Reply pipeline limits, deadlines and voice
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    #[serde(default = "default_max_user_chars")]
    pub max_user_chars: usize,

    #[serde(default = "default_max_assistant_chars")]
    pub max_assistant_chars: usize,

    #[serde(default = "default_max_sentence_chars")]
    pub max_sentence_chars: usize,

    #[serde(default = "default_transcription_timeout")]
    pub transcription_timeout_ms: u64,

    #[serde(default = "default_llm_timeout")]
    pub llm_timeout_ms: u64,

    #[serde(default = "default_synthesis_timeout")]
    pub synthesis_timeout_ms: u64,

    #[serde(default)]
    pub voice_name: String,

    #[serde(default = "default_language_code")]
    pub language_code: String,

    #[serde(default = "default_output_sample_rate")]
    pub output_sample_rate: u32,

    /// Persona directory holding `manifest.json` for filler clips
    #[serde(default)]
    pub filler_dir: Option<String>,
}

fn default_max_user_chars() -> usize {
    pipeline::MAX_USER_CHARS
}
fn default_max_assistant_chars() -> usize {
    pipeline::MAX_ASSISTANT_CHARS
}
fn default_max_sentence_chars() -> usize {
    pipeline::MAX_SENTENCE_CHARS
}
fn default_transcription_timeout() -> u64 {
    pipeline::TRANSCRIPTION_TIMEOUT_MS
}
fn default_llm_timeout() -> u64 {
    pipeline::LLM_TIMEOUT_MS
}
fn default_synthesis_timeout() -> u64 {
    pipeline::SYNTHESIS_TIMEOUT_MS
}
fn default_language_code() -> String {
    "en-US".to_string()
}
fn default_output_sample_rate() -> u32 {
    pipeline::OUTPUT_SAMPLE_RATE
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_user_chars: default_max_user_chars(),
            max_assistant_chars: default_max_assistant_chars(),
            max_sentence_chars: default_max_sentence_chars(),
            transcription_timeout_ms: default_transcription_timeout(),
            llm_timeout_ms: default_llm_timeout(),
            synthesis_timeout_ms: default_synthesis_timeout(),
            voice_name: String::new(),
            language_code: default_language_code(),
            output_sample_rate: default_output_sample_rate(),
            filler_dir: None,
        }
    }
}
