//! Error types for the `lore-rag` crate.

use thiserror::Error;

/// Errors that can occur while planning, retrieving or answering a turn.
#[derive(Debug, Error)]
pub enum RagError {
    /// The retrieval service could not be reached or reported an error.
    ///
    /// Absorbed by the aggregator for a single query; the turn continues.
    #[error("Retrieval unavailable ({backend}): {message}")]
    RetrievalUnavailable {
        /// The retrieval backend that produced the error.
        backend: String,
        /// A description of the failure.
        message: String,
    },

    /// An error occurred while embedding a search query.
    #[error("Embedding error ({provider}): {message}")]
    EmbeddingError {
        /// The embedding provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// A generative request failed before producing any output.
    #[error("Model error ({provider}): {message}")]
    ModelError {
        /// The generative provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// The structured query plan did not match its schema. Fatal for the turn.
    #[error("Planning decode failure: {0}")]
    PlanningDecode(String),

    /// A streamed answer terminated abnormally after it had started.
    #[error("Generation interrupted ({provider}): {message}")]
    GenerationInterrupted {
        /// The generative provider whose stream broke.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// A configuration validation error.
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// A convenience result type for lore-rag operations.
pub type Result<T> = std::result::Result<T, RagError>;
