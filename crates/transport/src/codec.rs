//! Opus codec
//!
//! Mono 20ms frames at 24kHz, the speech-to-speech wire format.

use audiopus::coder::{Decoder, Encoder};
use audiopus::packet::Packet;
use audiopus::{Application, Channels, MutSignals, SampleRate as OpusRate};
use parking_lot::Mutex;

use crate::TransportError;

/// Samples per 20ms frame at 24kHz
pub const OPUS_FRAME_SAMPLES: usize = 480;

/// Largest frame Opus can return (120ms at 24kHz)
const MAX_DECODED_SAMPLES: usize = 2880;

/// Upper bound of one encoded packet
const MAX_PACKET_BYTES: usize = 4000;

/// Opus encoder
pub struct OpusEncoder {
    inner: Mutex<Encoder>,
}

impl OpusEncoder {
    pub fn new() -> Result<Self, TransportError> {
        let encoder = Encoder::new(OpusRate::Hz24000, Channels::Mono, Application::Voip)
            .map_err(|e| TransportError::Codec(e.to_string()))?;
        Ok(Self {
            inner: Mutex::new(encoder),
        })
    }

    /// Encode one frame of `OPUS_FRAME_SAMPLES` samples
    pub fn encode(&self, samples: &[i16]) -> Result<Vec<u8>, TransportError> {
        if samples.len() != OPUS_FRAME_SAMPLES {
            return Err(TransportError::Codec(format!(
                "frame must be {} samples, got {}",
                OPUS_FRAME_SAMPLES,
                samples.len()
            )));
        }

        let mut packet = vec![0u8; MAX_PACKET_BYTES];
        let len = self
            .inner
            .lock()
            .encode(samples, &mut packet)
            .map_err(|e| TransportError::Codec(e.to_string()))?;
        packet.truncate(len);
        Ok(packet)
    }
}

/// Opus decoder
pub struct OpusDecoder {
    inner: Mutex<Decoder>,
}

impl OpusDecoder {
    pub fn new() -> Result<Self, TransportError> {
        let decoder = Decoder::new(OpusRate::Hz24000, Channels::Mono)
            .map_err(|e| TransportError::Codec(e.to_string()))?;
        Ok(Self {
            inner: Mutex::new(decoder),
        })
    }

    /// Decode one packet to 24kHz samples
    pub fn decode(&self, packet: &[u8]) -> Result<Vec<i16>, TransportError> {
        if packet.is_empty() {
            return Err(TransportError::Codec("empty packet".to_string()));
        }

        let mut output = vec![0i16; MAX_DECODED_SAMPLES];
        let packet = Packet::try_from(packet).map_err(|e| TransportError::Codec(e.to_string()))?;
        let signals = MutSignals::try_from(&mut output[..])
            .map_err(|e| TransportError::Codec(e.to_string()))?;
        let len = self
            .inner
            .lock()
            .decode(Some(packet), signals, false)
            .map_err(|e| TransportError::Codec(e.to_string()))?;
        output.truncate(len);
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_frame() {
        let encoder = OpusEncoder::new().unwrap();
        let decoder = OpusDecoder::new().unwrap();

        let frame: Vec<i16> = (0..OPUS_FRAME_SAMPLES)
            .map(|i| ((i as f32 * 0.1).sin() * 8000.0) as i16)
            .collect();
        let packet = encoder.encode(&frame).unwrap();
        assert!(!packet.is_empty());

        let decoded = decoder.decode(&packet).unwrap();
        assert_eq!(decoded.len(), OPUS_FRAME_SAMPLES);
    }

    #[test]
    fn test_rejects_wrong_frame_size() {
        let encoder = OpusEncoder::new().unwrap();
        assert!(encoder.encode(&[0i16; 100]).is_err());
    }

    #[test]
    fn test_rejects_empty_packet() {
        let decoder = OpusDecoder::new().unwrap();
        assert!(decoder.decode(&[]).is_err());
    }
}
