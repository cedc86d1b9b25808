//! Conversational chat pipeline.
//!
//! The [`ChatPipeline`] composes query planning, retrieval aggregation and
//! grounded answering into one lazy stream of [`ChatEvent`]s. For one turn the
//! events always arrive as
//! `QueryIssued* → DocumentsFound → AnswerFragment*`.
//!
//! # Example
//!
//! ```rust,ignore
//! use futures::StreamExt;
//! use lore_rag::{ChatEvent, ChatPipeline, Conversation, RagConfig};
//!
//! let pipeline = ChatPipeline::builder()
//!     .config(RagConfig::default())
//!     .retrieval_service(Arc::new(chroma))
//!     .generative_service(Arc::new(gemini))
//!     .build()?;
//!
//! let mut conversation = Conversation::with_greeting();
//! conversation.push_user("Parle-moi de Garen et Darius");
//!
//! let mut events = pipeline.chat(conversation, 5);
//! while let Some(event) = events.next().await {
//!     match event? {
//!         ChatEvent::QueryIssued(query) => eprintln!("searching: {query}"),
//!         ChatEvent::DocumentsFound(documents) => eprintln!("{} sources", documents.len()),
//!         ChatEvent::AnswerFragment(text) => print!("{text}"),
//!     }
//! }
//! ```

use std::pin::Pin;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use tracing::{debug, info};

use crate::aggregator::RetrievalAggregator;
use crate::config::RagConfig;
use crate::conversation::Conversation;
use crate::document::DocumentSet;
use crate::error::{RagError, Result};
use crate::llm::GenerativeService;
use crate::planner::QueryPlanner;
use crate::responder::ConversationalResponder;
use crate::retrieval::{RetrievalService, Retriever};

/// Progress and output of one conversation turn.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    /// A planned query is about to be executed.
    QueryIssued(String),
    /// The deduplicated documents of every executed query. Emitted exactly once.
    DocumentsFound(DocumentSet),
    /// The next piece of the streamed answer.
    AnswerFragment(String),
}

/// Lazy event stream of one turn. Dropping it stops all further work.
pub type ChatEventStream = Pin<Box<dyn Stream<Item = Result<ChatEvent>> + Send>>;

/// Where a turn currently is. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Planning,
    Retrieving,
    Responding,
    Done,
}

/// The chat orchestrator.
///
/// Construct one via [`ChatPipeline::builder()`]; the retrieval and
/// generative services are injected by the host application.
#[derive(Clone)]
pub struct ChatPipeline {
    config: RagConfig,
    retriever: Retriever,
    planner: QueryPlanner,
    aggregator: RetrievalAggregator,
    responder: ConversationalResponder,
}

impl ChatPipeline {
    /// Create a new [`ChatPipelineBuilder`].
    pub fn builder() -> ChatPipelineBuilder {
        ChatPipelineBuilder::default()
    }

    /// Return a reference to the pipeline configuration.
    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    /// Return the retrieval primitive, for direct searches.
    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    /// Return the responder, for single-query summaries.
    pub fn responder(&self) -> &ConversationalResponder {
        &self.responder
    }

    /// Run one turn over `conversation`.
    ///
    /// Nothing happens until the returned stream is polled. A planning
    /// failure yields one error and ends the stream before any retrieval; a
    /// broken answer stream yields its fragments so far and then the error.
    pub fn chat(&self, conversation: Conversation, max_results: usize) -> ChatEventStream {
        Box::pin(run_turn(
            self.planner.clone(),
            self.aggregator.clone(),
            self.responder.clone(),
            conversation,
            max_results,
        ))
    }

    /// Run one turn with the configured `max_results` ceiling.
    pub fn chat_default(&self, conversation: Conversation) -> ChatEventStream {
        self.chat(conversation, self.config.max_results)
    }
}

fn run_turn(
    planner: QueryPlanner,
    aggregator: RetrievalAggregator,
    responder: ConversationalResponder,
    conversation: Conversation,
    max_results: usize,
) -> impl Stream<Item = Result<ChatEvent>> + Send + 'static {
    async_stream::try_stream! {
        let mut state = PipelineState::Planning;
        debug!(?state, turns = conversation.len(), "turn started");

        let plan = planner.plan(&conversation).await?;

        state = PipelineState::Retrieving;
        debug!(?state, query_count = plan.len(), "plan ready");

        let mut documents = DocumentSet::new();
        let mut progress = aggregator.aggregate(plan, max_results);
        while let Some(event) = progress.next().await {
            if let ChatEvent::DocumentsFound(found) = &event {
                documents = found.clone();
            }
            yield event;
        }

        state = PipelineState::Responding;
        debug!(?state, document_count = documents.len(), "retrieval done");

        let mut answer = responder.respond(&conversation, &documents).await?;
        let mut fragments = 0usize;
        while let Some(fragment) = answer.next().await {
            let fragment = fragment?;
            fragments += 1;
            yield ChatEvent::AnswerFragment(fragment);
        }

        state = PipelineState::Done;
        info!(?state, fragments, "turn completed");
    }
}

/// Builder for constructing a [`ChatPipeline`].
///
/// Both services are required; the config defaults to [`RagConfig::default()`].
#[derive(Default)]
pub struct ChatPipelineBuilder {
    config: Option<RagConfig>,
    retrieval_service: Option<Arc<dyn RetrievalService>>,
    generative_service: Option<Arc<dyn GenerativeService>>,
}

impl ChatPipelineBuilder {
    /// Set the pipeline configuration.
    pub fn config(mut self, config: RagConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the retrieval service.
    pub fn retrieval_service(mut self, service: Arc<dyn RetrievalService>) -> Self {
        self.retrieval_service = Some(service);
        self
    }

    /// Set the generative service used for planning and answering.
    pub fn generative_service(mut self, service: Arc<dyn GenerativeService>) -> Self {
        self.generative_service = Some(service);
        self
    }

    /// Build the [`ChatPipeline`], validating that all required fields are set.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if a service is missing.
    pub fn build(self) -> Result<ChatPipeline> {
        let config = self.config.unwrap_or_default();
        let retrieval_service = self
            .retrieval_service
            .ok_or_else(|| RagError::ConfigError("retrieval_service is required".to_string()))?;
        let generative_service = self
            .generative_service
            .ok_or_else(|| RagError::ConfigError("generative_service is required".to_string()))?;

        let retriever = Retriever::new(retrieval_service);
        Ok(ChatPipeline {
            planner: QueryPlanner::new(generative_service.clone())?,
            aggregator: RetrievalAggregator::new(retriever.clone()),
            responder: ConversationalResponder::new(generative_service, config.clone()),
            retriever,
            config,
        })
    }
}

/// Accumulates the events of one turn.
///
/// Hosts feed every event through [`record`](TurnTranscript::record) and,
/// once the stream ends, append [`answer`](TurnTranscript::answer) to their
/// own conversation copy.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnTranscript {
    pub queries: Vec<String>,
    pub documents: DocumentSet,
    pub answer: String,
}

impl TurnTranscript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, event: &ChatEvent) {
        match event {
            ChatEvent::QueryIssued(query) => self.queries.push(query.clone()),
            ChatEvent::DocumentsFound(documents) => self.documents = documents.clone(),
            ChatEvent::AnswerFragment(fragment) => self.answer.push_str(fragment),
        }
    }

    /// Drain `events`, stopping at the first error.
    ///
    /// # Errors
    ///
    /// Returns the first error the stream yields. Events before it are lost;
    /// use [`record`](TurnTranscript::record) to keep partial output.
    pub async fn collect(mut events: ChatEventStream) -> Result<Self> {
        let mut transcript = Self::new();
        while let Some(event) = events.next().await {
            transcript.record(&event?);
        }
        Ok(transcript)
    }
}
