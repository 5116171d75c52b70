//! Voice Activity Detection
//!
//! Splits a live 20ms PCM16 frame stream into utterances. Classification is
//! pluggable through [`VadClassifier`]; the segmenter state machine is the
//! same whichever classifier decides speech vs. silence.

mod energy;

pub use energy::EnergyClassifier;

use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;

use cohost_config::VadSettings;
use cohost_core::{AudioFrame, SampleRate, UtteranceSegment, FRAME_MS};

/// Speech/non-speech decision for one full frame
pub trait VadClassifier: Send + Sync {
    fn is_speech(&self, frame: &AudioFrame<'_>) -> bool;

    /// Classifier name for logging
    fn name(&self) -> &str;
}

/// Segmenter configuration
#[derive(Debug, Clone)]
pub struct SegmenterConfig {
    /// Silence that ends an utterance
    pub silence_ms: u32,
    /// Rate of the incoming frames
    pub sample_rate: SampleRate,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            silence_ms: cohost_config::constants::vad::SILENCE_MS,
            sample_rate: SampleRate::Hz16000,
        }
    }
}

impl SegmenterConfig {
    pub fn from_settings(settings: &VadSettings) -> Self {
        Self {
            silence_ms: settings.silence_ms,
            ..Default::default()
        }
    }

    /// Consecutive silent frames that close an utterance
    pub fn silence_frames(&self) -> usize {
        (self.silence_ms.div_ceil(FRAME_MS) as usize).max(1)
    }
}

/// Result of feeding one frame
#[derive(Debug, Clone, Default)]
pub struct SegmenterOutput {
    pub is_speech: bool,
    /// First speech frame of a new utterance
    pub speech_started: bool,
    pub end_of_turn: bool,
    pub segment: Option<UtteranceSegment>,
}

/// Mutable state behind a single lock
#[derive(Default)]
struct SegmenterState {
    buffer: Vec<u8>,
    had_speech: bool,
    silence_frames: usize,
}

impl SegmenterState {
    fn take_segment(&mut self, rate: SampleRate) -> UtteranceSegment {
        let pcm = std::mem::take(&mut self.buffer);
        self.had_speech = false;
        self.silence_frames = 0;
        UtteranceSegment::new(Bytes::from(pcm), rate)
    }
}

/// Silence-run segmenter
pub struct FrameSegmenter {
    config: SegmenterConfig,
    classifier: Arc<dyn VadClassifier>,
    state: Mutex<SegmenterState>,
}

impl FrameSegmenter {
    pub fn new(config: SegmenterConfig, classifier: Arc<dyn VadClassifier>) -> Self {
        tracing::debug!(
            classifier = classifier.name(),
            silence_ms = config.silence_ms,
            "Frame segmenter created"
        );
        Self {
            config,
            classifier,
            state: Mutex::new(SegmenterState::default()),
        }
    }

    /// Energy-classified segmenter from settings
    pub fn from_settings(settings: &VadSettings) -> Self {
        Self::new(
            SegmenterConfig::from_settings(settings),
            Arc::new(EnergyClassifier::new(settings.energy_threshold)),
        )
    }

    pub fn config(&self) -> &SegmenterConfig {
        &self.config
    }

    /// Byte length of one frame at the configured rate
    pub fn frame_bytes(&self) -> usize {
        self.config.sample_rate.frame_bytes()
    }

    /// Feed one frame.
    ///
    /// Anything but an exact frame is reported as non-speech and leaves the
    /// state untouched.
    pub fn process_frame(&self, bytes: &[u8]) -> SegmenterOutput {
        let Some(frame) = AudioFrame::new(bytes, self.config.sample_rate) else {
            return SegmenterOutput::default();
        };

        let is_speech = self.classifier.is_speech(&frame);
        let mut state = self.state.lock();

        if !state.had_speech {
            if !is_speech {
                return SegmenterOutput::default();
            }
            state.had_speech = true;
            state.silence_frames = 0;
            state.buffer.extend_from_slice(bytes);
            return SegmenterOutput {
                is_speech: true,
                speech_started: true,
                ..Default::default()
            };
        }

        state.buffer.extend_from_slice(bytes);

        if is_speech {
            state.silence_frames = 0;
            return SegmenterOutput {
                is_speech: true,
                ..Default::default()
            };
        }

        state.silence_frames += 1;
        if state.silence_frames < self.config.silence_frames() {
            return SegmenterOutput::default();
        }

        let segment = state.take_segment(self.config.sample_rate);
        SegmenterOutput {
            is_speech: false,
            speech_started: false,
            end_of_turn: true,
            segment: Some(segment),
        }
    }

    /// Walk the whole frames of `bytes`, returning every finished segment.
    /// A trailing partial frame is ignored.
    pub fn process_buffer(&self, bytes: &[u8]) -> Vec<UtteranceSegment> {
        bytes
            .chunks_exact(self.frame_bytes())
            .filter_map(|frame| self.process_frame(frame).segment)
            .collect()
    }

    /// Force out buffered speech (shutdown, explicit flush)
    pub fn flush(&self) -> Option<UtteranceSegment> {
        let mut state = self.state.lock();
        if !state.had_speech || state.buffer.is_empty() {
            return None;
        }
        Some(state.take_segment(self.config.sample_rate))
    }

    /// Whether an utterance is currently open
    pub fn in_speech(&self) -> bool {
        self.state.lock().had_speech
    }

    pub fn reset(&self) {
        *self.state.lock() = SegmenterState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME: usize = 640;

    fn tone(amplitude: i16) -> Vec<u8> {
        (0..FRAME / 2)
            .flat_map(|i| {
                let s = if i % 2 == 0 { amplitude } else { -amplitude };
                s.to_le_bytes()
            })
            .collect()
    }

    fn quiet() -> Vec<u8> {
        vec![0u8; FRAME]
    }

    fn segmenter() -> FrameSegmenter {
        FrameSegmenter::from_settings(&VadSettings::default())
    }

    #[test]
    fn test_silence_only_never_ends_turn() {
        let seg = segmenter();
        for _ in 0..200 {
            let out = seg.process_frame(&quiet());
            assert!(!out.is_speech);
            assert!(!out.end_of_turn);
            assert!(out.segment.is_none());
        }
        assert!(!seg.in_speech());
    }

    #[test]
    fn test_speech_then_silence_emits_one_segment() {
        let seg = segmenter();
        let first = seg.process_frame(&tone(3000));
        assert!(first.is_speech && first.speech_started);

        for _ in 0..9 {
            let out = seg.process_frame(&tone(3000));
            assert!(out.is_speech && !out.speech_started);
        }

        // 500ms = 25 frames of silence
        let mut ends = Vec::new();
        for _ in 0..40 {
            let out = seg.process_frame(&quiet());
            if out.end_of_turn {
                ends.push(out.segment.unwrap());
            }
        }
        assert_eq!(ends.len(), 1);
        assert_eq!(ends[0].frame_count(), 10 + 25);
        assert!(!seg.in_speech());
    }

    #[test]
    fn test_short_pause_does_not_split() {
        let seg = segmenter();
        seg.process_frame(&tone(3000));
        for _ in 0..10 {
            assert!(!seg.process_frame(&quiet()).end_of_turn);
        }
        seg.process_frame(&tone(3000));
        assert!(seg.in_speech());
    }

    #[test]
    fn test_partial_frame_is_ignored() {
        let seg = segmenter();
        let out = seg.process_frame(&tone(3000)[..100]);
        assert!(!out.is_speech);
        assert!(!seg.in_speech());
    }

    #[test]
    fn test_silence_frames_rounds_up() {
        let config = SegmenterConfig {
            silence_ms: 510,
            ..Default::default()
        };
        assert_eq!(config.silence_frames(), 26);
        assert_eq!(SegmenterConfig::default().silence_frames(), 25);
    }

    #[test]
    fn test_process_buffer_and_flush() {
        let seg = segmenter();
        let mut audio = Vec::new();
        for _ in 0..5 {
            audio.extend(tone(3000));
        }
        for _ in 0..25 {
            audio.extend(quiet());
        }
        audio.extend(tone(3000));
        audio.extend(&[0u8; 10]);

        let segments = seg.process_buffer(&audio);
        assert_eq!(segments.len(), 1);
        assert!(seg.in_speech());

        let flushed = seg.flush().unwrap();
        assert_eq!(flushed.frame_count(), 1);
        assert!(seg.flush().is_none());
    }

    struct AlwaysSpeech;

    impl VadClassifier for AlwaysSpeech {
        fn is_speech(&self, _frame: &AudioFrame<'_>) -> bool {
            true
        }

        fn name(&self) -> &str {
            "always"
        }
    }

    #[test]
    fn test_custom_classifier() {
        let seg = FrameSegmenter::new(SegmenterConfig::default(), Arc::new(AlwaysSpeech));
        assert!(seg.process_frame(&quiet()).is_speech);
        seg.reset();
        assert!(!seg.in_speech());
    }
}
