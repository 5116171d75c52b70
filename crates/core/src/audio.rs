//! Audio frame types and PCM16 utilities
//!
//! Everything at the room and protocol boundaries is mono 16-bit
//! little-endian PCM cut into 20 ms frames. The helpers here convert between
//! byte buffers and samples, resample between the fixed rates, and wrap PCM
//! in a WAV container for one-shot transcription.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::time::Duration;

use crate::{Error, Result};

/// Frame duration used everywhere in the engine
pub const FRAME_MS: u32 = 20;

/// Supported audio sample rates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(try_from = "u32", into = "u32")]
pub enum SampleRate {
    /// 16kHz - speech recognition
    #[default]
    Hz16000,
    /// 24kHz - speech-to-speech protocol
    Hz24000,
    /// 48kHz - room boundary
    Hz48000,
}

impl SampleRate {
    /// Get sample rate as u32
    pub fn as_u32(&self) -> u32 {
        match self {
            SampleRate::Hz16000 => 16000,
            SampleRate::Hz24000 => 24000,
            SampleRate::Hz48000 => 48000,
        }
    }

    /// Samples in one 20ms frame
    pub fn frame_samples(&self) -> usize {
        (self.as_u32() * FRAME_MS / 1000) as usize
    }

    /// Bytes in one 20ms PCM16 frame (`rate * 0.02 * 2`)
    pub fn frame_bytes(&self) -> usize {
        self.frame_samples() * 2
    }

    /// Bytes of PCM16 covering `ms` milliseconds
    pub fn bytes_for_ms(&self, ms: u32) -> usize {
        (self.as_u32() as usize * ms as usize / 1000) * 2
    }
}

impl TryFrom<u32> for SampleRate {
    type Error = String;

    fn try_from(hz: u32) -> std::result::Result<Self, Self::Error> {
        match hz {
            16000 => Ok(SampleRate::Hz16000),
            24000 => Ok(SampleRate::Hz24000),
            48000 => Ok(SampleRate::Hz48000),
            other => Err(format!("unsupported sample rate: {}", other)),
        }
    }
}

impl From<SampleRate> for u32 {
    fn from(rate: SampleRate) -> Self {
        rate.as_u32()
    }
}

/// One complete 20ms frame of PCM16.
///
/// Construction fails for anything but an exact frame length, so a partial
/// frame can never reach a classifier.
#[derive(Debug, Clone, Copy)]
pub struct AudioFrame<'a> {
    bytes: &'a [u8],
    sample_rate: SampleRate,
}

impl<'a> AudioFrame<'a> {
    pub fn new(bytes: &'a [u8], sample_rate: SampleRate) -> Option<Self> {
        if bytes.len() == sample_rate.frame_bytes() {
            Some(Self { bytes, sample_rate })
        } else {
            None
        }
    }

    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    pub fn sample_rate(&self) -> SampleRate {
        self.sample_rate
    }

    /// Iterate over the little-endian i16 samples
    pub fn samples(&self) -> impl Iterator<Item = i16> + 'a {
        self.bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
    }

    /// Root mean square over the raw i16 sample values
    pub fn rms(&self) -> f64 {
        rms_pcm16(self.bytes)
    }
}

/// A finished utterance: every frame from speech onset through the
/// qualifying silence run. Moved, never shared.
#[derive(Debug, Clone)]
pub struct UtteranceSegment {
    pub pcm: Bytes,
    pub sample_rate: SampleRate,
}

impl UtteranceSegment {
    pub fn new(pcm: impl Into<Bytes>, sample_rate: SampleRate) -> Self {
        Self {
            pcm: pcm.into(),
            sample_rate,
        }
    }

    pub fn len_bytes(&self) -> usize {
        self.pcm.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pcm.is_empty()
    }

    pub fn frame_count(&self) -> usize {
        self.pcm.len() / self.sample_rate.frame_bytes()
    }

    pub fn duration(&self) -> Duration {
        let samples = self.pcm.len() / 2;
        Duration::from_secs_f64(samples as f64 / self.sample_rate.as_u32() as f64)
    }
}

/// Root mean square of PCM16 bytes (trailing odd byte ignored)
pub fn rms_pcm16(bytes: &[u8]) -> f64 {
    let count = bytes.len() / 2;
    if count == 0 {
        return 0.0;
    }
    let sum_squares: f64 = bytes
        .chunks_exact(2)
        .map(|pair| {
            let s = i16::from_le_bytes([pair[0], pair[1]]) as f64;
            s * s
        })
        .sum();
    (sum_squares / count as f64).sqrt()
}

/// Decode little-endian PCM16 bytes into samples
pub fn pcm16_to_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Encode samples as little-endian PCM16 bytes
pub fn samples_to_pcm16(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Silence of the given duration at `rate`
pub fn silence(rate: SampleRate, ms: u32) -> Vec<u8> {
    vec![0u8; rate.bytes_for_ms(ms)]
}

/// Split PCM16 into whole 20ms frames, zero-padding the final partial frame.
pub fn chunk_frames(bytes: &[u8], rate: SampleRate) -> Vec<Vec<u8>> {
    let frame_bytes = rate.frame_bytes();
    bytes
        .chunks(frame_bytes)
        .map(|chunk| {
            let mut frame = chunk.to_vec();
            frame.resize(frame_bytes, 0);
            frame
        })
        .collect()
}

const PCM16_NORMALIZE: f64 = 32768.0;
const PCM16_SCALE: f64 = 32767.0;
const RESAMPLE_CHUNK: usize = 1024;

/// Resample mono PCM16 between the fixed engine rates.
///
/// Uses an FFT resampler from Rubato, falling back to linear interpolation
/// for very short buffers or if Rubato rejects the input. The output length
/// is `ceil(len * to / from)` samples.
pub fn resample_pcm16(bytes: &[u8], from: SampleRate, to: SampleRate) -> Vec<u8> {
    if from == to || bytes.len() < 2 {
        return bytes.to_vec();
    }

    let samples: Vec<f64> = pcm16_to_samples(bytes)
        .into_iter()
        .map(|s| s as f64 / PCM16_NORMALIZE)
        .collect();

    let from_hz = from.as_u32() as usize;
    let to_hz = to.as_u32() as usize;

    let resampled = if samples.len() < 64 {
        resample_linear(&samples, from_hz, to_hz)
    } else {
        match resample_rubato(&samples, from_hz, to_hz) {
            Ok(out) => out,
            Err(e) => {
                tracing::warn!("Rubato resampling failed, using linear fallback: {}", e);
                resample_linear(&samples, from_hz, to_hz)
            },
        }
    };

    resampled
        .iter()
        .flat_map(|&s| {
            let pcm = (s.clamp(-1.0, 1.0) * PCM16_SCALE).round() as i16;
            pcm.to_le_bytes()
        })
        .collect()
}

fn expected_len(len: usize, from: usize, to: usize) -> usize {
    (len * to + from - 1) / from
}

fn resample_rubato(samples: &[f64], from: usize, to: usize) -> std::result::Result<Vec<f64>, String> {
    use rubato::{FftFixedIn, Resampler};

    let mut resampler =
        FftFixedIn::<f64>::new(from, to, RESAMPLE_CHUNK, 2, 1).map_err(|e| e.to_string())?;
    let delay = resampler.output_delay();
    let expected = expected_len(samples.len(), from, to);

    let mut output = Vec::with_capacity(expected + delay);
    let mut pos = 0;
    // Keep feeding (zero-padded past the end) until the delayed output is covered
    while output.len() < expected + delay {
        let needed = resampler.input_frames_next();
        let mut chunk = vec![0.0f64; needed];
        if pos < samples.len() {
            let end = (pos + needed).min(samples.len());
            chunk[..end - pos].copy_from_slice(&samples[pos..end]);
        }
        pos += needed;

        let input_frames = vec![chunk];
        let processed = resampler
            .process(&input_frames, None)
            .map_err(|e| e.to_string())?;
        if processed[0].is_empty() {
            return Err("resampler produced no output".to_string());
        }
        output.extend_from_slice(&processed[0]);
    }

    output.drain(..delay.min(output.len()));
    output.truncate(expected);
    Ok(output)
}

/// Linear interpolation fallback for edge cases
fn resample_linear(samples: &[f64], from: usize, to: usize) -> Vec<f64> {
    if samples.is_empty() {
        return Vec::new();
    }
    let ratio = to as f64 / from as f64;
    let new_len = expected_len(samples.len(), from, to);
    let last = samples.len() - 1;

    (0..new_len)
        .map(|i| {
            let src = i as f64 / ratio;
            let floor = (src.floor() as usize).min(last);
            let ceil = (floor + 1).min(last);
            let frac = src - floor as f64;
            samples[floor] * (1.0 - frac) + samples[ceil] * frac
        })
        .collect()
}

/// Linear resampler for a chunked PCM16 stream.
///
/// Carries the last input sample and the interpolation phase across calls,
/// so feeding packets one at a time gives the same samples as resampling
/// the concatenated stream. Phase is kept in units of `1/to` input samples.
#[derive(Debug, Clone)]
pub struct StreamResampler {
    from: u64,
    to: u64,
    last: Option<i16>,
    /// Next output position, relative to `last` (or the chunk start before any input)
    phase: u64,
}

impl StreamResampler {
    pub fn new(from: SampleRate, to: SampleRate) -> Self {
        Self {
            from: from.as_u32() as u64,
            to: to.as_u32() as u64,
            last: None,
            phase: 0,
        }
    }

    /// Resample the next chunk of the stream
    pub fn process(&mut self, bytes: &[u8]) -> Vec<u8> {
        let chunk = pcm16_to_samples(bytes);
        if chunk.is_empty() {
            return Vec::new();
        }
        if self.from == self.to {
            self.last = chunk.last().copied();
            return bytes[..chunk.len() * 2].to_vec();
        }

        let mut input = Vec::with_capacity(chunk.len() + 1);
        input.extend(self.last);
        input.extend_from_slice(&chunk);
        let last_index = (input.len() - 1) as u64;

        let mut out = Vec::new();
        while self.phase <= last_index * self.to {
            let index = (self.phase / self.to) as usize;
            let frac = self.phase % self.to;
            let sample = if frac == 0 {
                input[index]
            } else {
                let a = input[index] as i64;
                let b = input[index + 1] as i64;
                let to = self.to as i64;
                let f = frac as i64;
                ((a * (to - f) + b * f) / to) as i16
            };
            out.push(sample);
            self.phase += self.from;
        }

        self.phase -= last_index * self.to;
        self.last = chunk.last().copied();
        samples_to_pcm16(&out)
    }

    /// Emit the tail held back for interpolation, holding the last sample
    pub fn flush(&mut self) -> Vec<u8> {
        let Some(last) = self.last.take() else {
            return Vec::new();
        };
        let mut out = Vec::new();
        while self.phase < self.to {
            out.push(last);
            self.phase += self.from;
        }
        self.phase = 0;
        samples_to_pcm16(&out)
    }
}

/// Wrap mono PCM16 in a canonical 44-byte-header WAV container
pub fn pcm16_to_wav(bytes: &[u8], rate: SampleRate) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: rate.as_u32(),
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::with_capacity(bytes.len() + 44));
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;
        for sample in pcm16_to_samples(bytes) {
            writer
                .write_sample(sample)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }
        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(samples: usize, amplitude: i16) -> Vec<u8> {
        (0..samples)
            .map(|i| if i % 2 == 0 { amplitude } else { -amplitude })
            .flat_map(|s| s.to_le_bytes())
            .collect()
    }

    #[test]
    fn test_frame_bytes() {
        assert_eq!(SampleRate::Hz16000.frame_bytes(), 640);
        assert_eq!(SampleRate::Hz24000.frame_bytes(), 960);
        assert_eq!(SampleRate::Hz48000.frame_bytes(), 1920);
        assert_eq!(SampleRate::Hz24000.frame_samples(), 480);
    }

    #[test]
    fn test_audio_frame_rejects_partial() {
        let partial = vec![0u8; 100];
        assert!(AudioFrame::new(&partial, SampleRate::Hz16000).is_none());

        let full = vec![0u8; 640];
        assert!(AudioFrame::new(&full, SampleRate::Hz16000).is_some());
    }

    #[test]
    fn test_rms() {
        let loud = tone(320, 1000);
        assert!((rms_pcm16(&loud) - 1000.0).abs() < 1e-6);
        assert_eq!(rms_pcm16(&[0u8; 640]), 0.0);
        assert_eq!(rms_pcm16(&[]), 0.0);
    }

    #[test]
    fn test_chunk_frames_pads_final_frame() {
        let bytes = vec![1u8; 960 * 2 + 100];
        let frames = chunk_frames(&bytes, SampleRate::Hz24000);
        assert_eq!(frames.len(), 3);
        assert!(frames.iter().all(|f| f.len() == 960));
        assert!(frames[2][100..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_resample_length() {
        let input = tone(16000, 2000); // one second at 16kHz
        let out = resample_pcm16(&input, SampleRate::Hz16000, SampleRate::Hz24000);
        assert_eq!(out.len(), 24000 * 2);

        let short = tone(10, 100);
        let out = resample_pcm16(&short, SampleRate::Hz16000, SampleRate::Hz48000);
        assert_eq!(out.len(), 30 * 2);
    }

    #[test]
    fn test_resample_identity() {
        let input = tone(320, 500);
        assert_eq!(
            resample_pcm16(&input, SampleRate::Hz16000, SampleRate::Hz16000),
            input
        );
    }

    #[test]
    fn test_stream_resampler_keeps_packet_edges_flat() {
        let packet = samples_to_pcm16(&[10_000i16; 480]);
        let mut resampler = StreamResampler::new(SampleRate::Hz24000, SampleRate::Hz48000);

        let mut out = Vec::new();
        for _ in 0..5 {
            let chunk = pcm16_to_samples(&resampler.process(&packet));
            assert!(chunk.iter().all(|&s| (s - 10_000).abs() < 500), "{:?}", &chunk[..8]);
            out.extend(chunk);
        }
        out.extend(pcm16_to_samples(&resampler.flush()));

        assert_eq!(out.len(), 480 * 5 * 2);
        assert!(out.iter().all(|&s| s == 10_000));
    }

    #[test]
    fn test_stream_resampler_matches_whole_buffer() {
        let ramp: Vec<i16> = (0..960).map(|i| (i * 10) as i16).collect();

        let mut whole = StreamResampler::new(SampleRate::Hz16000, SampleRate::Hz24000);
        let mut expected = whole.process(&samples_to_pcm16(&ramp));
        expected.extend(whole.flush());

        let mut chunked = StreamResampler::new(SampleRate::Hz16000, SampleRate::Hz24000);
        let mut actual = Vec::new();
        for piece in ramp.chunks(320) {
            actual.extend(chunked.process(&samples_to_pcm16(piece)));
        }
        actual.extend(chunked.flush());

        assert_eq!(actual, expected);
        assert_eq!(actual.len(), 1440 * 2);
    }

    #[test]
    fn test_wav_header() {
        let pcm = tone(320, 100);
        let wav = pcm16_to_wav(&pcm, SampleRate::Hz16000).unwrap();
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(wav.len(), 44 + pcm.len());
        assert_eq!(&wav[44..], &pcm[..]);
    }

    #[test]
    fn test_segment_duration() {
        let seg = UtteranceSegment::new(vec![0u8; 640 * 50], SampleRate::Hz16000);
        assert_eq!(seg.frame_count(), 50);
        assert_eq!(seg.duration().as_millis(), 1000);
    }
}
