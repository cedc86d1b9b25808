//! Generative language service trait.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde_json::Value;

use crate::conversation::Message;
use crate::error::Result;

/// A finite, single-pass stream of answer text increments.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// A prompt for the generative service: an optional system instruction
/// followed by the conversation turns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationRequest {
    pub system_instruction: Option<String>,
    pub messages: Vec<Message>,
    pub temperature: Option<f32>,
}

impl GenerationRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self { messages, ..Default::default() }
    }

    pub fn with_system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = Some(instruction.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// An instruction-following text generator.
///
/// # Example
///
/// ```rust,ignore
/// use futures::StreamExt;
/// use lore_rag::{GenerationRequest, GenerativeService, Message};
///
/// let request = GenerationRequest::new(vec![Message::user("Bonjour")]);
/// let mut stream = model.stream_text(request).await?;
/// while let Some(fragment) = stream.next().await {
///     print!("{}", fragment?);
/// }
/// ```
#[async_trait]
pub trait GenerativeService: Send + Sync {
    /// The model name, for logging.
    fn name(&self) -> &str;

    /// Stream free text in order.
    ///
    /// Errors before the first fragment are returned directly; a stream that
    /// breaks afterwards, or closes before the answer is finished, yields
    /// [`RagError::GenerationInterrupted`](crate::RagError::GenerationInterrupted)
    /// as its last item.
    async fn stream_text(&self, request: GenerationRequest) -> Result<TextStream>;

    /// Generate a JSON document constrained by `schema` and return its raw text.
    ///
    /// Validation of the returned text is the caller's job.
    async fn generate_json(&self, request: GenerationRequest, schema: &Value) -> Result<String>;
}
