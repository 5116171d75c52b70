//! Sentence detector for streaming LLM output
//!
//! Buffers token fragments and emits complete sentences for synthesis as
//! soon as a boundary appears, so the first sentence can be spoken while
//! the rest is still generating.

use cohost_config::constants::pipeline::MAX_SENTENCE_CHARS;

const TERMINATORS: [char; 3] = ['.', '!', '?'];

/// Incremental sentence buffer
///
/// Flushes on a run of `.`, `!` or `?` (taking any trailing whitespace along), on a
/// newline, or unconditionally once the buffer reaches `max_chars`. Forced
/// cuts prefer the last space past the midpoint.
#[derive(Debug, Clone)]
pub struct SentenceDetector {
    max_chars: usize,
    buffer: String,
}

impl Default for SentenceDetector {
    fn default() -> Self {
        Self::new(MAX_SENTENCE_CHARS)
    }
}

impl SentenceDetector {
    pub fn new(max_chars: usize) -> Self {
        Self {
            max_chars: max_chars.max(1),
            buffer: String::new(),
        }
    }

    /// Add a fragment and return every sentence it completed
    pub fn push(&mut self, fragment: &str) -> Vec<String> {
        self.buffer.push_str(fragment);

        let mut sentences = Vec::new();
        loop {
            let pending = self.buffer.trim_start();
            if pending.is_empty() {
                self.buffer.clear();
                break;
            }

            if let Some((sentence, rest)) = self.forced_cut(pending) {
                if !sentence.is_empty() {
                    sentences.push(sentence);
                }
                self.buffer = rest;
                continue;
            }

            let (found, rest) = split_sentences(pending);
            self.buffer = rest;
            sentences.extend(found);
            break;
        }
        sentences
    }

    /// Drain whatever remains at end of stream
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        let rest = rest.trim();
        (!rest.is_empty()).then(|| rest.to_string())
    }

    /// Buffered, not yet emitted text
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    fn forced_cut(&self, pending: &str) -> Option<(String, String)> {
        let end = pending.char_indices().nth(self.max_chars).map(|(i, _)| i);
        let chunk = match end {
            Some(i) => &pending[..i],
            None if pending.chars().count() >= self.max_chars => pending,
            None => return None,
        };

        let cut = match chunk.rfind(' ') {
            Some(space) if space > chunk.len() / 2 => space + 1,
            _ => chunk.len(),
        };

        Some((
            pending[..cut].trim().to_string(),
            pending[cut..].to_string(),
        ))
    }
}

/// Split complete sentences off the front of `text`
fn split_sentences(text: &str) -> (Vec<String>, String) {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        let boundary = if TERMINATORS.contains(&c) {
            let mut end = i + c.len_utf8();
            let mut in_run = true;
            while let Some(&(j, next)) = chars.peek() {
                if in_run && TERMINATORS.contains(&next) {
                    end = j + next.len_utf8();
                } else if next.is_whitespace() {
                    in_run = false;
                    end = j + next.len_utf8();
                } else {
                    break;
                }
                chars.next();
            }
            Some(end)
        } else if c == '\n' {
            Some(i + 1)
        } else {
            None
        };

        if let Some(end) = boundary {
            let sentence = text[start..end].trim();
            if !sentence.is_empty() {
                sentences.push(sentence.to_string());
            }
            start = end;
        }
    }

    (sentences, text[start..].to_string())
}
