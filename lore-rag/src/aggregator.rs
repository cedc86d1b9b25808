//! Sequential execution of a query plan into one deduplicated document set.

use futures::StreamExt;
use futures::stream::BoxStream;
use tracing::{info, warn};

use crate::document::DocumentSet;
use crate::pipeline::ChatEvent;
use crate::planner::SearchQuery;
use crate::retrieval::Retriever;

/// Runs every planned query against the [`Retriever`] in plan order.
///
/// The produced stream yields [`ChatEvent::QueryIssued`] before each
/// retrieval call and a single [`ChatEvent::DocumentsFound`] once the last
/// query has completed. A failing query is logged and skipped; it never ends
/// the stream.
#[derive(Clone)]
pub struct RetrievalAggregator {
    retriever: Retriever,
}

impl RetrievalAggregator {
    pub fn new(retriever: Retriever) -> Self {
        Self { retriever }
    }

    /// Execute `plan` lazily; nothing is retrieved until the stream is polled.
    pub fn aggregate(
        &self,
        plan: Vec<SearchQuery>,
        max_results: usize,
    ) -> BoxStream<'static, ChatEvent> {
        let retriever = self.retriever.clone();

        async_stream::stream! {
            let mut documents = DocumentSet::new();
            let mut failures = 0usize;

            for search in plan {
                let count = search.n_results(max_results);
                yield ChatEvent::QueryIssued(search.query.clone());

                match retriever.retrieve(&search.query, count).await {
                    Ok(found) => {
                        let before = documents.len();
                        documents.extend(found);
                        info!(
                            query = %search.query,
                            count,
                            added = documents.len() - before,
                            "query retrieved"
                        );
                    }
                    Err(e) => {
                        failures += 1;
                        warn!(query = %search.query, error = %e, "retrieval failed, continuing");
                    }
                }
            }

            info!(document_count = documents.len(), failures, "aggregation completed");
            yield ChatEvent::DocumentsFound(documents);
        }
        .boxed()
    }
}
