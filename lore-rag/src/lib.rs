//! # lore-rag
//!
//! Multi-query conversational retrieval over a corpus of lore documents.
//!
//! ## Overview
//!
//! A turn flows through three stages, composed by [`ChatPipeline`]:
//!
//! - [`QueryPlanner`] - asks the generative service for zero or more
//!   keyword-dense [`SearchQuery`]s, one per information need in the conversation
//! - [`RetrievalAggregator`] - runs the queries in plan order and merges the
//!   results into one [`DocumentSet`], first query wins on duplicates
//! - [`ConversationalResponder`] - streams an answer grounded only in those documents
//!
//! The caller consumes a lazy stream of [`ChatEvent`]s:
//! `QueryIssued* → DocumentsFound → AnswerFragment*`.
//!
//! Both external collaborators are traits, injected at construction:
//! [`RetrievalService`] and [`GenerativeService`].
//!
//! ## Features
//!
//! - `gemini` (default) - [`gemini::GeminiClient`], a Gemini REST client
//! - `chroma` (default) - [`chroma::ChromaRetrievalService`], a ChromaDB HTTP client

pub mod aggregator;
#[cfg(feature = "chroma")]
pub mod chroma;
pub mod config;
pub mod conversation;
pub mod document;
pub mod embedding;
pub mod error;
#[cfg(feature = "gemini")]
pub mod gemini;
pub mod llm;
pub mod pipeline;
pub mod planner;
pub mod responder;
pub mod retrieval;

pub use aggregator::RetrievalAggregator;
#[cfg(feature = "chroma")]
pub use chroma::{ChromaConfig, ChromaRetrievalService};
pub use config::{RagConfig, RagConfigBuilder};
pub use conversation::{Conversation, DEFAULT_GREETING, Message, Role};
pub use document::{Document, DocumentSet, SearchHit, TITLE_UNAVAILABLE};
pub use embedding::EmbeddingProvider;
pub use error::{RagError, Result};
#[cfg(feature = "gemini")]
pub use gemini::{GeminiClient, GeminiConfig};
pub use llm::{GenerationRequest, GenerativeService, TextStream};
pub use pipeline::{
    ChatEvent, ChatEventStream, ChatPipeline, ChatPipelineBuilder, PipelineState, TurnTranscript,
};
pub use planner::{QueryPlanner, ResultExpectation, SearchQuery, SearchQueryResponse};
pub use responder::ConversationalResponder;
pub use retrieval::{RetrievalService, Retriever};
