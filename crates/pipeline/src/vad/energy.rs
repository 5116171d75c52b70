//! RMS energy classifier

use cohost_core::AudioFrame;

use super::VadClassifier;

/// A frame is speech iff its RMS over raw i16 samples exceeds the threshold
#[derive(Debug, Clone, Copy)]
pub struct EnergyClassifier {
    threshold: f64,
}

impl EnergyClassifier {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }
}

impl Default for EnergyClassifier {
    fn default() -> Self {
        Self::new(cohost_config::constants::vad::ENERGY_THRESHOLD)
    }
}

impl VadClassifier for EnergyClassifier {
    fn is_speech(&self, frame: &AudioFrame<'_>) -> bool {
        frame.rms() > self.threshold
    }

    fn name(&self) -> &str {
        "energy"
    }
}
