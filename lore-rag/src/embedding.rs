//! Embedding provider trait used to turn search queries into vectors.

use async_trait::async_trait;

use crate::error::Result;

/// A provider that embeds search queries for nearest-neighbour lookup.
///
/// The vector space must match the one the corpus was indexed with; the
/// provider is only consulted at query time.
///
/// # Example
///
/// ```rust,ignore
/// use lore_rag::EmbeddingProvider;
///
/// let vector = provider.embed_query("garen demacia soldat").await?;
/// ```
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding vector for a search query.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;
}
