//! Centralized default values
//!
//! Single source of truth for timing constants and limits shared by the
//! settings defaults and the crates that consume them.

/// Frame segmenter defaults
pub mod vad {
    /// Silence that ends an utterance
    pub const SILENCE_MS: u32 = 500;

    /// RMS threshold over raw i16 samples
    pub const ENERGY_THRESHOLD: f64 = 500.0;

    /// Vendor classifier aggressiveness (0-3)
    pub const AGGRESSIVENESS: u8 = 1;
}

/// Turn Coordinator defaults
pub mod coordinator {
    pub const PORT: u16 = 3001;

    /// Bucket collection window
    pub const COLLECTION_MS: u64 = 300;
    pub const MAX_COLLECTION_MS: u64 = 60_000;

    /// Lease duration and its accepted range
    pub const LEASE_MS: u64 = 120_000;
    pub const MIN_LEASE_MS: u64 = 1_000;
    pub const MAX_LEASE_MS: u64 = 600_000;

    /// Shared history capacity
    pub const MAX_RECENT_TURNS: usize = 50;

    /// Resolved decisions kept for polling clients
    pub const MAX_RETAINED_DECISIONS: usize = 512;

    /// Client polling
    pub const POLL_INTERVAL_MS: u64 = 50;
    pub const DECISION_TIMEOUT_MS: u64 = 5_000;
    pub const HTTP_TIMEOUT_MS: u64 = 3_000;
}

/// Speech-to-speech protocol defaults
pub mod speech_to_speech {
    pub const VOICE_PROMPT: &str = "NATF2.pt";
    pub const CHAT_PATH: &str = "/api/chat";

    pub const TURN_TIMEOUT_MS: u64 = 60_000;

    /// Handshake wait is 80% of the turn timeout, clamped to this range
    pub const HANDSHAKE_FRACTION: f64 = 0.8;
    pub const MIN_HANDSHAKE_MS: u64 = 45_000;
    pub const MAX_HANDSHAKE_MS: u64 = 180_000;

    /// Silence appended after caller audio
    pub const TRAILING_SILENCE_MS: u32 = 400;

    /// Idle-close behavior after the last frame is sent
    pub const IDLE_CLOSE_MS: u64 = 900;
    pub const IDLE_POLL_MS: u64 = 25;
}

/// Reply pipeline defaults
pub mod pipeline {
    pub const MAX_USER_CHARS: usize = 1000;
    pub const MAX_ASSISTANT_CHARS: usize = 600;

    /// Sentence buffer flushes unconditionally at this length
    pub const MAX_SENTENCE_CHARS: usize = 250;

    pub const TRANSCRIPTION_TIMEOUT_MS: u64 = 10_000;
    pub const LLM_TIMEOUT_MS: u64 = 15_000;
    pub const SYNTHESIS_TIMEOUT_MS: u64 = 10_000;

    pub const MAX_TURNS_IN_MEMORY: usize = 50;
    pub const OUTPUT_SAMPLE_RATE: u32 = 48_000;
}
