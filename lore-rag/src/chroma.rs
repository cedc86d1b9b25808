//! ChromaDB retrieval backend.
//!
//! Provides [`ChromaRetrievalService`], which implements [`RetrievalService`]
//! against the Chroma HTTP API (v2). Passages live in one collection and their
//! titles in a second collection keyed by the same ids. Queries are embedded
//! client-side with an [`EmbeddingProvider`].
//!
//! This module is only available when the `chroma` feature is enabled.
//!
//! # Example
//!
//! ```rust,ignore
//! use lore_rag::chroma::{ChromaConfig, ChromaRetrievalService};
//!
//! let service = ChromaRetrievalService::new(ChromaConfig::from_env()?, Arc::new(gemini))?;
//! let hits = service.search("garen demacia", 3).await?;
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, error, instrument};
use url::Url;

use crate::document::SearchHit;
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::retrieval::RetrievalService;

const BACKEND: &str = "chroma";

/// Where the lore collections live.
#[derive(Debug, Clone)]
pub struct ChromaConfig {
    /// Server root, always ending in `/`.
    pub base_url: String,
    pub tenant: String,
    pub database: String,
    pub documents_collection: String,
    pub titles_collection: String,
}

impl Default for ChromaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/".into(),
            tenant: "default_tenant".into(),
            database: "default_database".into(),
            documents_collection: "documents".into(),
            titles_collection: "titles".into(),
        }
    }
}

impl ChromaConfig {
    /// Read `CHROMA_URL`, `CHROMA_TENANT` and `CHROMA_DATABASE`, keeping
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("CHROMA_URL") {
            config = config.with_base_url(&url)?;
        }
        if let Ok(tenant) = std::env::var("CHROMA_TENANT") {
            config.tenant = tenant;
        }
        if let Ok(database) = std::env::var("CHROMA_DATABASE") {
            config.database = database;
        }
        Ok(config)
    }

    /// Set the server root, e.g. `http://chroma:8000`.
    pub fn with_base_url(mut self, base_url: &str) -> Result<Self> {
        let normalized =
            if base_url.ends_with('/') { base_url.to_string() } else { format!("{base_url}/") };
        Url::parse(&normalized)
            .map_err(|e| RagError::ConfigError(format!("invalid Chroma URL '{base_url}': {e}")))?;
        self.base_url = normalized;
        Ok(self)
    }

    /// Set the names of the passage and title collections.
    pub fn with_collections(
        mut self,
        documents: impl Into<String>,
        titles: impl Into<String>,
    ) -> Self {
        self.documents_collection = documents.into();
        self.titles_collection = titles.into();
        self
    }
}

/// A [`RetrievalService`] backed by [Chroma](https://www.trychroma.com/).
///
/// Collection ids are looked up once and cached for the lifetime of the service.
pub struct ChromaRetrievalService {
    http: Client,
    config: ChromaConfig,
    embedder: Arc<dyn EmbeddingProvider>,
    documents_id: OnceCell<String>,
    titles_id: OnceCell<String>,
}

impl ChromaRetrievalService {
    pub fn new(config: ChromaConfig, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        let http = Client::builder()
            .build()
            .map_err(|e| RagError::ConfigError(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            config,
            embedder,
            documents_id: OnceCell::new(),
            titles_id: OnceCell::new(),
        })
    }

    fn map_err(message: impl Into<String>) -> RagError {
        RagError::RetrievalUnavailable { backend: BACKEND.to_string(), message: message.into() }
    }

    fn url(&self, suffix: &str) -> Result<Url> {
        let path = format!(
            "api/v2/tenants/{}/databases/{}/collections/{suffix}",
            self.config.tenant, self.config.database
        );
        Url::parse(&self.config.base_url)
            .and_then(|base| base.join(&path))
            .map_err(|e| Self::map_err(format!("invalid URL: {e}")))
    }

    async fn post<Req: Serialize, Res: DeserializeOwned>(
        &self,
        url: Url,
        body: &Req,
    ) -> Result<Res> {
        let response = self.http.post(url).json(body).send().await.map_err(|e| {
            error!(backend = BACKEND, error = %e, "request failed");
            Self::map_err(format!("request failed: {e}"))
        })?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            error!(backend = BACKEND, %status, "API error");
            return Err(Self::map_err(format!("API returned {status}: {detail}")));
        }
        response.json().await.map_err(|e| Self::map_err(format!("failed to parse response: {e}")))
    }

    async fn collection_id(&self, cell: &OnceCell<String>, name: &str) -> Result<String> {
        let id = cell
            .get_or_try_init(|| async {
                let url = self.url(name)?;
                let response = self.http.get(url).send().await.map_err(|e| {
                    error!(
                        backend = BACKEND,
                        collection = name,
                        error = %e,
                        "collection lookup failed"
                    );
                    Self::map_err(format!("collection lookup failed: {e}"))
                })?;
                let status = response.status();
                if !status.is_success() {
                    return Err(Self::map_err(format!("collection '{name}' unavailable: {status}")));
                }
                let collection: CollectionModel = response
                    .json()
                    .await
                    .map_err(|e| Self::map_err(format!("failed to parse collection: {e}")))?;
                debug!(collection = name, id = %collection.id, "resolved collection");
                Ok(collection.id)
            })
            .await?;
        Ok(id.clone())
    }
}

// ── Chroma API request/response types ──────────────────────────────

#[derive(Deserialize)]
struct CollectionModel {
    id: String,
}

#[derive(Serialize)]
struct QueryRequest<'a> {
    query_embeddings: Vec<Vec<f32>>,
    n_results: usize,
    include: &'a [&'a str],
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    ids: Vec<Vec<String>>,
    #[serde(default)]
    documents: Option<Vec<Vec<Option<String>>>>,
    #[serde(default)]
    distances: Option<Vec<Vec<Option<f32>>>>,
}

#[derive(Serialize)]
struct GetRequest<'a> {
    ids: &'a [String],
    include: &'a [&'a str],
}

#[derive(Debug, Deserialize)]
struct GetResponse {
    ids: Vec<String>,
    #[serde(default)]
    documents: Option<Vec<Option<String>>>,
}

impl QueryResponse {
    /// Hits of the single query embedding, in Chroma's ranking.
    fn into_hits(self) -> Vec<SearchHit> {
        let Some(ids) = self.ids.into_iter().next() else {
            return Vec::new();
        };
        let documents = self.documents.and_then(|d| d.into_iter().next()).unwrap_or_default();
        let distances = self.distances.and_then(|d| d.into_iter().next()).unwrap_or_default();

        ids.into_iter()
            .enumerate()
            .map(|(i, id)| SearchHit {
                id,
                score: distances.get(i).copied().flatten().unwrap_or(f32::MAX),
                content: documents.get(i).cloned().flatten().unwrap_or_default(),
            })
            .collect()
    }
}

impl GetResponse {
    fn into_titles(self) -> HashMap<String, String> {
        let documents = self.documents.unwrap_or_default();
        self.ids
            .into_iter()
            .zip(documents)
            .filter_map(|(id, title)| title.map(|title| (id, title)))
            .collect()
    }
}

#[async_trait]
impl RetrievalService for ChromaRetrievalService {
    #[instrument(skip_all, fields(backend = BACKEND, top_k = top_k))]
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>> {
        let embedding = self.embedder.embed_query(query).await?;
        let collection =
            self.collection_id(&self.documents_id, &self.config.documents_collection).await?;

        let body = QueryRequest {
            query_embeddings: vec![embedding],
            n_results: top_k,
            include: &["documents", "distances"],
        };
        let url = self.url(&format!("{collection}/query"))?;
        let response: QueryResponse = self.post(url, &body).await?;
        let hits = response.into_hits();
        debug!(hit_count = hits.len(), "chroma query completed");
        Ok(hits)
    }

    #[instrument(skip_all, fields(backend = BACKEND, id_count = ids.len()))]
    async fn resolve_titles(&self, ids: &[String]) -> Result<HashMap<String, String>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let collection = self.collection_id(&self.titles_id, &self.config.titles_collection).await?;

        let body = GetRequest { ids, include: &["documents"] };
        let url = self.url(&format!("{collection}/get"))?;
        let response: GetResponse = self.post(url, &body).await?;
        Ok(response.into_titles())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn query_response_becomes_ranked_hits() {
        let response: QueryResponse = serde_json::from_value(json!({
            "ids": [["garen", "lux"]],
            "documents": [["Garen text", null]],
            "distances": [[0.31, 0.42]],
            "metadatas": null
        }))
        .unwrap();

        let hits = response.into_hits();
        assert_eq!(hits.len(), 2);
        assert_eq!(
            hits[0],
            SearchHit { id: "garen".into(), score: 0.31, content: "Garen text".into() }
        );
        assert_eq!(hits[1].content, "");
    }

    #[test]
    fn empty_query_response_has_no_hits() {
        let response: QueryResponse = serde_json::from_value(json!({ "ids": [] })).unwrap();
        assert!(response.into_hits().is_empty());
        let response: QueryResponse = serde_json::from_value(json!({ "ids": [[]] })).unwrap();
        assert!(response.into_hits().is_empty());
    }

    #[test]
    fn titles_are_keyed_by_returned_ids() {
        let response: GetResponse = serde_json::from_value(json!({
            "ids": ["darius", "garen"],
            "documents": ["darius", null]
        }))
        .unwrap();
        let titles = response.into_titles();
        assert_eq!(titles.get("darius").map(String::as_str), Some("darius"));
        assert!(!titles.contains_key("garen"));
    }

    #[test]
    fn collection_urls_are_scoped_to_tenant_and_database() {
        struct NoEmbedding;

        #[async_trait]
        impl EmbeddingProvider for NoEmbedding {
            async fn embed_query(&self, _text: &str) -> Result<Vec<f32>> {
                Ok(Vec::new())
            }
        }

        let config = ChromaConfig::default().with_base_url("http://chroma:8000").unwrap();
        let service = ChromaRetrievalService::new(config, Arc::new(NoEmbedding)).unwrap();
        assert_eq!(
            service.url("abc/query").unwrap().as_str(),
            concat!(
                "http://chroma:8000/api/v2/tenants/default_tenant",
                "/databases/default_database/collections/abc/query"
            )
        );
    }
}
