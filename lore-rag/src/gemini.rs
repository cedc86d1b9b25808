//! Gemini backend over the Generative Language REST API.
//!
//! [`GeminiClient`] implements [`GenerativeService`] (SSE streaming through
//! `streamGenerateContent`, JSON-schema constrained output through
//! `generateContent`) and [`EmbeddingProvider`] (`embedContent`).
//!
//! This module is only available when the `gemini` feature is enabled.

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, instrument};
use url::Url;

use crate::conversation::{Message, Role};
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::llm::{GenerationRequest, GenerativeService, TextStream};

/// The default Generative Language API base URL.
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/";

/// The default chat model.
const DEFAULT_MODEL: &str = "gemini-2.5-flash";

/// The default embedding model, matching the one the corpus was indexed with.
const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-004";

/// Finish reasons that mean the answer was cut off by the service.
const ABORTED_FINISH_REASONS: &[&str] = &[
    "MAX_TOKENS",
    "SAFETY",
    "RECITATION",
    "BLOCKLIST",
    "PROHIBITED_CONTENT",
    "SPII",
    "OTHER",
];

/// Connection settings for [`GeminiClient`].
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
    pub embedding_model: String,
    pub base_url: Url,
}

impl GeminiConfig {
    /// Create a config with the default models and endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if the API key is empty.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(RagError::ConfigError("Gemini API key must not be empty".into()));
        }
        Ok(Self {
            api_key,
            model: DEFAULT_MODEL.into(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.into(),
            base_url: parse_base_url(DEFAULT_BASE_URL)?,
        })
    }

    /// Read `GOOGLE_API_KEY` (or `GEMINI_API_KEY`) and the optional
    /// `GEMINI_MODEL`, `GEMINI_EMBEDDING_MODEL` and `GEMINI_BASE_URL`.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("GOOGLE_API_KEY")
            .or_else(|_| std::env::var("GEMINI_API_KEY"))
            .map_err(|_| {
                RagError::ConfigError("GOOGLE_API_KEY or GEMINI_API_KEY must be set".into())
            })?;

        let mut config = Self::new(api_key)?;
        if let Ok(model) = std::env::var("GEMINI_MODEL") {
            config = config.with_model(model);
        }
        if let Ok(model) = std::env::var("GEMINI_EMBEDDING_MODEL") {
            config = config.with_embedding_model(model);
        }
        if let Ok(base_url) = std::env::var("GEMINI_BASE_URL") {
            config = config.with_base_url(&base_url)?;
        }
        Ok(config)
    }

    /// Set the chat model (e.g. `gemini-2.5-pro`).
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the embedding model.
    pub fn with_embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = model.into();
        self
    }

    /// Point the client at another API root (proxies, test servers).
    pub fn with_base_url(mut self, base_url: &str) -> Result<Self> {
        self.base_url = parse_base_url(base_url)?;
        Ok(self)
    }
}

fn parse_base_url(raw: &str) -> Result<Url> {
    let normalized = if raw.ends_with('/') { raw.to_string() } else { format!("{raw}/") };
    Url::parse(&normalized)
        .map_err(|e| RagError::ConfigError(format!("invalid base URL '{raw}': {e}")))
}

/// A [`GenerativeService`] and [`EmbeddingProvider`] backed by Gemini.
///
/// # Example
///
/// ```rust,ignore
/// use lore_rag::gemini::{GeminiClient, GeminiConfig};
///
/// let client = GeminiClient::new(GeminiConfig::from_env()?)?;
/// let vector = client.embed_query("jinx zaun").await?;
/// ```
pub struct GeminiClient {
    http: Client,
    config: GeminiConfig,
}

impl GeminiClient {
    /// Create a client; the API key is sent as the `x-goog-api-key` header.
    pub fn new(config: GeminiConfig) -> Result<Self> {
        let mut key = HeaderValue::from_str(&config.api_key)
            .map_err(|e| RagError::ConfigError(format!("invalid Gemini API key: {e}")))?;
        key.set_sensitive(true);
        let headers = HeaderMap::from_iter([(HeaderName::from_static("x-goog-api-key"), key)]);
        let http = Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| RagError::ConfigError(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http, config })
    }

    fn endpoint(&self, model: &str, method: &str) -> Result<Url> {
        self.config
            .base_url
            .join(&format!("models/{model}:{method}"))
            .map_err(|e| {
                RagError::ConfigError(format!("invalid endpoint for model '{model}': {e}"))
            })
    }

    fn model_error(&self, message: impl Into<String>) -> RagError {
        RagError::ModelError { provider: self.config.model.clone(), message: message.into() }
    }
}

/// Return the response unchanged on success, or the API's error message.
async fn check_response(response: Response) -> std::result::Result<Response, String> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let detail =
        serde_json::from_str::<ErrorResponse>(&body).map(|e| e.error.message).unwrap_or(body);
    Err(format!("API returned {status}: {detail}"))
}

// ── Gemini API request/response types ──────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig<'a>>,
}

#[derive(Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize, Default)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_json_schema: Option<&'a Value>,
}

impl<'a> GenerateContentRequest<'a> {
    fn from_request(request: &'a GenerationRequest, schema: Option<&'a Value>) -> Self {
        let contents = request
            .messages
            .iter()
            // The API rejects conversations opened by the model, e.g. a greeting.
            .skip_while(|m| m.role == Role::Assistant)
            .map(content_of)
            .collect();

        let system_instruction = request
            .system_instruction
            .as_deref()
            .map(|text| Content { role: None, parts: vec![Part { text }] });

        let generation_config = if request.temperature.is_some() || schema.is_some() {
            Some(GenerationConfig {
                temperature: request.temperature,
                response_mime_type: schema.map(|_| "application/json"),
                response_json_schema: schema,
            })
        } else {
            None
        };

        Self { contents, system_instruction, generation_config }
    }
}

fn content_of(message: &Message) -> Content<'_> {
    let role = match message.role {
        Role::User => "user",
        Role::Assistant => "model",
    };
    Content { role: Some(role), parts: vec![Part { text: &message.content }] }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
    #[serde(default)]
    thought: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

impl GenerateContentResponse {
    /// Answer text of the first candidate, without thought parts.
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter(|p| !p.thought)
                    .filter_map(|p| p.text.as_deref())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Finish reason of the first candidate, present on the last chunk of an answer.
    fn finish_reason(&self) -> Option<&str> {
        self.candidates.first().and_then(|c| c.finish_reason.as_deref())
    }

    /// Why the service stopped producing output, if it was not a normal stop.
    fn abort_reason(&self) -> Option<String> {
        if let Some(reason) = self.prompt_feedback.as_ref().and_then(|f| f.block_reason.as_ref()) {
            return Some(format!("prompt blocked: {reason}"));
        }
        self.finish_reason()
            .filter(|reason| ABORTED_FINISH_REASONS.contains(reason))
            .map(|reason| format!("generation stopped: {reason}"))
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbedContentRequest<'a> {
    content: Content<'a>,
    task_type: &'static str,
}

#[derive(Deserialize)]
struct EmbedContentResponse {
    embedding: ContentEmbedding,
}

#[derive(Deserialize)]
struct ContentEmbedding {
    values: Vec<f32>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

/// Decode SSE payloads into answer text.
///
/// An answer is complete only once a chunk carries a normal finish reason. A
/// transport error, an abnormal finish reason or an event stream that closes
/// early ends the stream with [`RagError::GenerationInterrupted`] after the
/// text received so far.
fn answer_fragments<S>(events: S, provider: String) -> impl Stream<Item = Result<String>> + Send
where
    S: Stream<Item = std::result::Result<String, String>> + Send + 'static,
{
    let interrupted = move |message: String| RagError::GenerationInterrupted {
        provider: provider.clone(),
        message,
    };

    async_stream::try_stream! {
        let mut events = Box::pin(events);
        let mut finished = false;

        while let Some(event) = events.next().await {
            let data = event.map_err(|e| interrupted(format!("broken event stream: {e}")))?;
            let chunk: GenerateContentResponse = serde_json::from_str(&data)
                .map_err(|e| interrupted(format!("undecodable chunk: {e}")))?;

            let text = chunk.text();
            if !text.is_empty() {
                yield text;
            }
            if let Some(reason) = chunk.abort_reason() {
                error!(%reason, "answer stream aborted by the service");
                Err::<(), _>(interrupted(reason))?;
            }
            if chunk.finish_reason().is_some() {
                finished = true;
            }
        }

        if !finished {
            error!("answer stream closed without a finish reason");
            Err::<(), _>(interrupted("stream closed before the answer finished".to_string()))?;
        }
    }
}

// ── Trait implementations ──────────────────────────────────────────

#[async_trait]
impl GenerativeService for GeminiClient {
    fn name(&self) -> &str {
        &self.config.model
    }

    #[instrument(skip_all, fields(model = %self.config.model, messages = request.messages.len()))]
    async fn stream_text(&self, request: GenerationRequest) -> Result<TextStream> {
        let mut url = self.endpoint(&self.config.model, "streamGenerateContent")?;
        url.query_pairs_mut().append_pair("alt", "sse");

        let body = GenerateContentRequest::from_request(&request, None);
        if body.contents.is_empty() {
            return Err(self.model_error("conversation has no user turn"));
        }

        let response = self.http.post(url).json(&body).send().await.map_err(|e| {
            error!(error = %e, "stream request failed");
            self.model_error(format!("request failed: {e}"))
        })?;
        let response = check_response(response).await.map_err(|message| {
            error!(%message, "stream request rejected");
            self.model_error(message)
        })?;
        debug!("answer stream connected");

        let events = response
            .bytes_stream()
            .eventsource()
            .map(|event| event.map(|e| e.data).map_err(|e| e.to_string()));

        Ok(Box::pin(answer_fragments(events, self.config.model.clone())))
    }

    #[instrument(skip_all, fields(model = %self.config.model, messages = request.messages.len()))]
    async fn generate_json(&self, request: GenerationRequest, schema: &Value) -> Result<String> {
        let url = self.endpoint(&self.config.model, "generateContent")?;

        let body = GenerateContentRequest::from_request(&request, Some(schema));
        if body.contents.is_empty() {
            return Err(self.model_error("conversation has no user turn"));
        }

        let response = self.http.post(url).json(&body).send().await.map_err(|e| {
            error!(error = %e, "structured request failed");
            self.model_error(format!("request failed: {e}"))
        })?;
        let response = check_response(response).await.map_err(|message| {
            error!(%message, "structured request rejected");
            self.model_error(message)
        })?;

        let parsed: GenerateContentResponse = response.json().await.map_err(|e| {
            error!(error = %e, "failed to parse response");
            self.model_error(format!("failed to parse response: {e}"))
        })?;
        if let Some(reason) = parsed.abort_reason() {
            return Err(self.model_error(reason));
        }

        Ok(parsed.text())
    }
}

#[async_trait]
impl EmbeddingProvider for GeminiClient {
    #[instrument(skip_all, fields(model = %self.config.embedding_model, text_len = text.len()))]
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let embedding_error = |message: String| RagError::EmbeddingError {
            provider: self.config.embedding_model.clone(),
            message,
        };

        let url = self.endpoint(&self.config.embedding_model, "embedContent")?;
        let body = EmbedContentRequest {
            content: Content { role: None, parts: vec![Part { text }] },
            task_type: "RETRIEVAL_QUERY",
        };

        let response = self.http.post(url).json(&body).send().await.map_err(|e| {
            error!(error = %e, "embedding request failed");
            embedding_error(format!("request failed: {e}"))
        })?;
        let response = check_response(response).await.map_err(|message| {
            error!(%message, "embedding request rejected");
            embedding_error(message)
        })?;

        let parsed: EmbedContentResponse = response
            .json()
            .await
            .map_err(|e| embedding_error(format!("failed to parse response: {e}")))?;
        Ok(parsed.embedding.values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_api_key_is_rejected() {
        assert!(matches!(GeminiConfig::new(" "), Err(RagError::ConfigError(_))));
    }

    #[test]
    fn endpoints_keep_the_version_prefix() {
        let config = GeminiConfig::new("key")
            .unwrap()
            .with_base_url("http://localhost:9000/v1beta")
            .unwrap();
        let client = GeminiClient::new(config).unwrap();
        let url = client.endpoint("gemini-2.5-flash", "streamGenerateContent").unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:9000/v1beta/models/gemini-2.5-flash:streamGenerateContent"
        );
    }

    #[test]
    fn request_maps_roles_and_drops_leading_greeting() {
        let request = GenerationRequest::new(vec![
            Message::assistant("Bonjour !"),
            Message::user("Qui est Garen ?"),
            Message::assistant("Le Poing de Demacia."),
            Message::user("Et Darius ?"),
        ])
        .with_system_instruction("ground yourself")
        .with_temperature(0.7);

        let body =
            serde_json::to_value(GenerateContentRequest::from_request(&request, None)).unwrap();
        assert_eq!(body["contents"].as_array().unwrap().len(), 3);
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][1]["role"], "model");
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "ground yourself");
        assert!(body["systemInstruction"].get("role").is_none());
        assert!(body["generationConfig"].get("responseMimeType").is_none());
    }

    #[test]
    fn structured_request_carries_the_schema() {
        let schema = json!({ "type": "object" });
        let request = GenerationRequest::new(vec![Message::user("hello")]);
        let body = GenerateContentRequest::from_request(&request, Some(&schema));
        let body = serde_json::to_value(body).unwrap();
        assert_eq!(body["generationConfig"]["responseMimeType"], "application/json");
        assert_eq!(body["generationConfig"]["responseJsonSchema"], schema);
    }

    #[test]
    fn text_skips_thought_parts() {
        let chunk: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {
                    "parts": [
                        { "text": "thinking...", "thought": true },
                        { "text": "Garen " },
                        { "text": "sert Demacia." }
                    ],
                    "role": "model"
                }
            }]
        }))
        .unwrap();
        assert_eq!(chunk.text(), "Garen sert Demacia.");
        assert!(chunk.abort_reason().is_none());
    }

    async fn replay(chunks: &[std::result::Result<Value, &str>]) -> Vec<Result<String>> {
        let events: Vec<std::result::Result<String, String>> = chunks
            .iter()
            .map(|chunk| match chunk {
                Ok(value) => Ok(value.to_string()),
                Err(message) => Err(message.to_string()),
            })
            .collect();
        answer_fragments(futures::stream::iter(events), "gemini-test".into()).collect().await
    }

    fn text_chunk(text: &str, finish_reason: Option<&str>) -> Value {
        let mut candidate = json!({ "content": { "parts": [{ "text": text }], "role": "model" } });
        if let Some(reason) = finish_reason {
            candidate["finishReason"] = json!(reason);
        }
        json!({ "candidates": [candidate] })
    }

    #[tokio::test]
    async fn finished_answer_ends_cleanly() {
        let items = replay(&[
            Ok(text_chunk("Garen ", None)),
            Ok(text_chunk("sert Demacia.", Some("STOP"))),
        ])
        .await;

        let fragments: Vec<String> = items.into_iter().collect::<Result<_>>().unwrap();
        assert_eq!(fragments, ["Garen ", "sert Demacia."]);
    }

    #[tokio::test]
    async fn stream_closed_without_finish_reason_is_interrupted() {
        let items = replay(&[Ok(text_chunk("Garen est ", None))]).await;

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_deref().unwrap(), "Garen est ");
        assert!(matches!(items[1], Err(RagError::GenerationInterrupted { .. })));
    }

    #[tokio::test]
    async fn token_limit_keeps_the_text_then_interrupts() {
        let items = replay(&[
            Ok(text_chunk("Garen est ", None)),
            Ok(text_chunk("le Poing", Some("MAX_TOKENS"))),
        ])
        .await;

        assert_eq!(items.len(), 3);
        assert_eq!(items[0].as_deref().unwrap(), "Garen est ");
        assert_eq!(items[1].as_deref().unwrap(), "le Poing");
        assert!(matches!(
            &items[2],
            Err(RagError::GenerationInterrupted { message, .. }) if message.contains("MAX_TOKENS")
        ));
    }

    #[tokio::test]
    async fn broken_transport_is_interrupted() {
        let items = replay(&[Ok(text_chunk("Garen ", None)), Err("connection reset")]).await;

        assert_eq!(items.len(), 2);
        assert!(matches!(
            &items[1],
            Err(RagError::GenerationInterrupted { message, .. })
                if message.contains("connection reset")
        ));
    }

    #[test]
    fn blocked_prompt_and_safety_stop_are_aborts() {
        let blocked: GenerateContentResponse =
            serde_json::from_value(json!({ "promptFeedback": { "blockReason": "SAFETY" } }))
                .unwrap();
        assert_eq!(blocked.text(), "");
        assert_eq!(blocked.abort_reason().as_deref(), Some("prompt blocked: SAFETY"));

        let stopped: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{ "content": { "parts": [] }, "finishReason": "RECITATION" }]
        }))
        .unwrap();
        assert!(stopped.abort_reason().unwrap().contains("RECITATION"));

        let finished: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{ "content": { "parts": [{ "text": "." }] }, "finishReason": "STOP" }]
        }))
        .unwrap();
        assert!(finished.abort_reason().is_none());
    }
}
