//! Language model trait

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

use crate::conversation::Message;
use crate::Result;

/// Incremental text fragments from a streamed completion
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChatOptions {
    pub stream: bool,
    pub max_tokens: u32,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            stream: true,
            max_tokens: 150,
        }
    }
}

/// Completion result. When `stream` is set, `text` is empty and the reply
/// arrives through the stream.
pub struct ChatResponse {
    pub text: String,
    pub stream: Option<TextStream>,
}

impl ChatResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            stream: None,
        }
    }

    pub fn streaming(stream: TextStream) -> Self {
        Self {
            text: String::new(),
            stream: Some(stream),
        }
    }
}

impl std::fmt::Debug for ChatResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatResponse")
            .field("text", &self.text)
            .field("streaming", &self.stream.is_some())
            .finish()
    }
}

/// Chat-completion interface
#[async_trait]
pub trait LanguageModel: Send + Sync + 'static {
    async fn chat(&self, messages: &[Message], options: &ChatOptions) -> Result<ChatResponse>;

    /// Model name for logging
    fn model_name(&self) -> &str;
}
