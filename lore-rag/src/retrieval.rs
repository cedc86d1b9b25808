//! Retrieval service trait and the document retrieval primitive.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::document::{Document, SearchHit, TITLE_UNAVAILABLE};
use crate::error::Result;

/// A semantic nearest-neighbour lookup over the lore corpus.
///
/// Implementations own embedding, distance computation and index upkeep;
/// this crate only issues read requests. Both methods may return partial or
/// empty results instead of failing.
///
/// # Example
///
/// ```rust,ignore
/// use lore_rag::{ChromaRetrievalService, RetrievalService};
///
/// let hits = service.search("garen demacia", 3).await?;
/// let ids: Vec<String> = hits.iter().map(|h| h.id.clone()).collect();
/// let titles = service.resolve_titles(&ids).await?;
/// ```
#[async_trait]
pub trait RetrievalService: Send + Sync {
    /// Return up to `top_k` hits ordered by ascending distance.
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>>;

    /// Map document ids to titles. Ids missing from the title index are
    /// simply absent from the returned map.
    async fn resolve_titles(&self, ids: &[String]) -> Result<HashMap<String, String>>;
}

/// Turns raw [`SearchHit`]s into titled [`Document`]s.
#[derive(Clone)]
pub struct Retriever {
    service: Arc<dyn RetrievalService>,
}

impl Retriever {
    pub fn new(service: Arc<dyn RetrievalService>) -> Self {
        Self { service }
    }

    /// Retrieve up to `count` documents for `query`, best match first.
    ///
    /// No matches yields an empty vector. A missing or failing title index
    /// yields [`TITLE_UNAVAILABLE`] titles rather than an error.
    ///
    /// # Errors
    ///
    /// Propagates the service's search error.
    pub async fn retrieve(&self, query: &str, count: usize) -> Result<Vec<Document>> {
        if count == 0 {
            debug!(query, "retrieval skipped for zero count");
            return Ok(Vec::new());
        }

        let hits = self.service.search(query, count).await?;
        if hits.is_empty() {
            debug!(query, "no matches");
            return Ok(Vec::new());
        }

        let ids: Vec<String> = hits.iter().map(|h| h.id.clone()).collect();
        let titles = match self.service.resolve_titles(&ids).await {
            Ok(titles) => titles,
            Err(e) => {
                warn!(query, error = %e, "title lookup failed, using placeholders");
                HashMap::new()
            }
        };

        let mut documents: Vec<Document> = hits
            .into_iter()
            .map(|hit| {
                let title = match titles.get(&hit.id) {
                    Some(title) => title.clone(),
                    None => {
                        warn!(document.id = %hit.id, "id missing from title index");
                        TITLE_UNAVAILABLE.to_string()
                    }
                };
                Document::from_hit(hit, title)
            })
            .collect();

        // Stable, so equal distances keep the service's ranking.
        documents.sort_by(|a, b| a.rating.total_cmp(&b.rating));
        documents.truncate(count);
        debug!(query, count = documents.len(), "retrieved documents");
        Ok(documents)
    }
}
