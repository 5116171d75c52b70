//! Speech-to-speech wire protocol
//!
//! Binary messages carry a one-byte type tag:
//!
//! | tag    | payload                         |
//! |--------|---------------------------------|
//! | `0x00` | none (handshake, server ready)  |
//! | `0x01` | Opus packet, 24kHz mono, 20ms   |
//! | `0x02` | UTF-8 text fragment             |

use std::time::Duration;

use cohost_config::constants::speech_to_speech::{
    CHAT_PATH, HANDSHAKE_FRACTION, MAX_HANDSHAKE_MS, MIN_HANDSHAKE_MS, TRAILING_SILENCE_MS,
};
use cohost_core::{audio, SampleRate, FRAME_MS};

use crate::codec::OPUS_FRAME_SAMPLES;

pub const TAG_HANDSHAKE: u8 = 0x00;
pub const TAG_AUDIO: u8 = 0x01;
pub const TAG_TEXT: u8 = 0x02;

/// A decoded binary message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerMessage<'a> {
    Handshake,
    Audio(&'a [u8]),
    Text(&'a [u8]),
}

impl<'a> ServerMessage<'a> {
    /// Split the tag off; `None` for empty messages and unknown tags
    pub fn parse(data: &'a [u8]) -> Option<Self> {
        let (&tag, payload) = data.split_first()?;
        match tag {
            TAG_HANDSHAKE => Some(Self::Handshake),
            TAG_AUDIO => Some(Self::Audio(payload)),
            TAG_TEXT => Some(Self::Text(payload)),
            _ => None,
        }
    }
}

/// Prefix an Opus packet with the audio tag
pub fn audio_message(packet: &[u8]) -> Vec<u8> {
    let mut message = Vec::with_capacity(packet.len() + 1);
    message.push(TAG_AUDIO);
    message.extend_from_slice(packet);
    message
}

/// Map the configured server URL to the chat socket URL.
///
/// `http` becomes `ws`, `https` becomes `wss`, `ws`/`wss` pass through and a
/// bare host defaults to `wss`.
pub fn socket_base(server_url: &str) -> String {
    let trimmed = server_url.trim().trim_end_matches('/');
    let base = if let Some(rest) = trimmed.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = trimmed.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else if trimmed.starts_with("wss://") || trimmed.starts_with("ws://") {
        trimmed.to_string()
    } else {
        format!("wss://{}", trimmed)
    };
    format!("{}{}", base, CHAT_PATH)
}

/// The backend expects the system prompt padded with one space each side
pub fn wrap_text_prompt(prompt: &str) -> String {
    let cleaned = prompt.trim();
    if cleaned.is_empty() {
        return String::new();
    }
    format!(" {} ", cleaned)
}

/// Full chat URL with query parameters
pub fn chat_url(server_url: &str, voice_prompt: &str, text_prompt: &str, seed: Option<u64>) -> String {
    let mut url = format!(
        "{}?voice_prompt={}&text_prompt={}",
        socket_base(server_url),
        urlencoding::encode(voice_prompt),
        urlencoding::encode(&wrap_text_prompt(text_prompt)),
    );
    if let Some(seed) = seed {
        url.push_str(&format!("&seed={}", seed));
    }
    url
}

/// Handshake wait: 80% of the turn timeout, clamped to 45..=180s
pub fn handshake_timeout(turn_timeout: Duration) -> Duration {
    let ms = (turn_timeout.as_millis() as f64 * HANDSHAKE_FRACTION) as u64;
    Duration::from_millis(ms.clamp(MIN_HANDSHAKE_MS, MAX_HANDSHAKE_MS))
}

/// Caller audio (16kHz PCM16) as 24kHz Opus-sized frames followed by the
/// trailing silence
pub fn prepare_frames(user_pcm: &[u8]) -> Vec<Vec<i16>> {
    let pcm24 = audio::resample_pcm16(user_pcm, SampleRate::Hz16000, SampleRate::Hz24000);
    let samples = audio::pcm16_to_samples(&pcm24);

    let mut frames: Vec<Vec<i16>> = samples
        .chunks(OPUS_FRAME_SAMPLES)
        .map(|chunk| {
            let mut frame = chunk.to_vec();
            frame.resize(OPUS_FRAME_SAMPLES, 0);
            frame
        })
        .collect();

    let silence_frames = TRAILING_SILENCE_MS.div_ceil(FRAME_MS) as usize;
    frames.extend(std::iter::repeat(vec![0i16; OPUS_FRAME_SAMPLES]).take(silence_frames));
    frames
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_messages() {
        assert_eq!(ServerMessage::parse(&[0x00]), Some(ServerMessage::Handshake));
        assert_eq!(
            ServerMessage::parse(&[0x01, 7, 8]),
            Some(ServerMessage::Audio(&[7, 8]))
        );
        assert_eq!(
            ServerMessage::parse(b"\x02hi"),
            Some(ServerMessage::Text(b"hi"))
        );
        assert_eq!(ServerMessage::parse(&[0x09, 1]), None);
        assert_eq!(ServerMessage::parse(&[]), None);
    }

    #[test]
    fn test_audio_message() {
        assert_eq!(audio_message(&[5, 6]), vec![0x01, 5, 6]);
    }

    #[test]
    fn test_socket_base_schemes() {
        assert_eq!(socket_base("http://host:8998/"), "ws://host:8998/api/chat");
        assert_eq!(socket_base("https://host"), "wss://host/api/chat");
        assert_eq!(socket_base("ws://host"), "ws://host/api/chat");
        assert_eq!(socket_base("wss://host"), "wss://host/api/chat");
        assert_eq!(socket_base("host:8998"), "wss://host:8998/api/chat");
    }

    #[test]
    fn test_chat_url_query() {
        let url = chat_url("http://h", "NATF2.pt", "Be kind", Some(42));
        assert_eq!(
            url,
            "ws://h/api/chat?voice_prompt=NATF2.pt&text_prompt=%20Be%20kind%20&seed=42"
        );

        let url = chat_url("http://h", "v", "  ", None);
        assert!(url.ends_with("text_prompt="));
    }

    #[test]
    fn test_handshake_timeout_clamped() {
        assert_eq!(
            handshake_timeout(Duration::from_secs(60)),
            Duration::from_secs(48)
        );
        assert_eq!(
            handshake_timeout(Duration::from_secs(10)),
            Duration::from_secs(45)
        );
        assert_eq!(
            handshake_timeout(Duration::from_secs(600)),
            Duration::from_secs(180)
        );
    }

    #[test]
    fn test_prepare_frames() {
        // 200ms at 16kHz -> 4800 samples at 24kHz -> 10 frames, plus 20 of silence
        let frames = prepare_frames(&vec![0u8; 6400]);
        assert_eq!(frames.len(), 30);
        assert!(frames.iter().all(|f| f.len() == OPUS_FRAME_SAMPLES));

        // Partial trailing frame is zero-padded
        let frames = prepare_frames(&vec![0u8; 600]);
        assert_eq!(frames.len(), 1 + 20);

        assert_eq!(prepare_frames(&[]).len(), 20);
    }
}
