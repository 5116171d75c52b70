//! Frame processors for streaming model output

mod sentence_detector;

pub use sentence_detector::SentenceDetector;
