//! Scripted retrieval and generative services shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use futures::StreamExt;
use lore_rag::{
    GenerationRequest, GenerativeService, RagError, Result, RetrievalService, SearchHit,
    TextStream,
};
use serde_json::Value;

pub fn hit(id: &str, score: f32) -> SearchHit {
    SearchHit { id: id.to_string(), score, content: format!("{id} content") }
}

/// Answers searches from a fixed table and records every call.
#[derive(Default)]
pub struct FakeRetrieval {
    hits: HashMap<String, Vec<SearchHit>>,
    titles: HashMap<String, String>,
    unavailable: Vec<String>,
    titles_down: bool,
    pub searches: Mutex<Vec<(String, usize)>>,
    pub title_lookups: Mutex<Vec<Vec<String>>>,
}

impl FakeRetrieval {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hits(mut self, query: &str, hits: Vec<SearchHit>) -> Self {
        self.hits.insert(query.to_string(), hits);
        self
    }

    pub fn with_title(mut self, id: &str, title: &str) -> Self {
        self.titles.insert(id.to_string(), title.to_string());
        self
    }

    /// Make searches for `query` fail.
    pub fn failing_on(mut self, query: &str) -> Self {
        self.unavailable.push(query.to_string());
        self
    }

    pub fn without_title_index(mut self) -> Self {
        self.titles_down = true;
        self
    }

    pub fn search_calls(&self) -> Vec<(String, usize)> {
        self.searches.lock().unwrap().clone()
    }
}

#[async_trait]
impl RetrievalService for FakeRetrieval {
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>> {
        self.searches.lock().unwrap().push((query.to_string(), top_k));
        if self.unavailable.iter().any(|q| q == query) {
            return Err(RagError::RetrievalUnavailable {
                backend: "fake".into(),
                message: "connection refused".into(),
            });
        }
        let mut hits = self.hits.get(query).cloned().unwrap_or_default();
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn resolve_titles(&self, ids: &[String]) -> Result<HashMap<String, String>> {
        self.title_lookups.lock().unwrap().push(ids.to_vec());
        if self.titles_down {
            return Err(RagError::RetrievalUnavailable {
                backend: "fake".into(),
                message: "title index offline".into(),
            });
        }
        Ok(ids
            .iter()
            .filter_map(|id| self.titles.get(id).map(|t| (id.clone(), t.clone())))
            .collect())
    }
}

/// What the scripted model returns for a structured plan request.
pub enum PlanReply {
    Json(String),
    Unreachable,
}

/// Replays a fixed plan and a fixed answer, recording every request.
pub struct FakeModel {
    plan: PlanReply,
    fragments: Vec<String>,
    interrupt: bool,
    pub plan_requests: Mutex<Vec<GenerationRequest>>,
    pub answer_requests: Mutex<Vec<GenerationRequest>>,
}

impl FakeModel {
    pub fn new(plan_json: impl Into<String>, fragments: &[&str]) -> Self {
        Self {
            plan: PlanReply::Json(plan_json.into()),
            fragments: fragments.iter().map(|f| f.to_string()).collect(),
            interrupt: false,
            plan_requests: Mutex::new(Vec::new()),
            answer_requests: Mutex::new(Vec::new()),
        }
    }

    pub fn unreachable_planner(fragments: &[&str]) -> Self {
        let mut model = Self::new("", fragments);
        model.plan = PlanReply::Unreachable;
        model
    }

    /// Break the answer stream after the scripted fragments.
    pub fn interrupted(mut self) -> Self {
        self.interrupt = true;
        self
    }

    pub fn answer_calls(&self) -> usize {
        self.answer_requests.lock().unwrap().len()
    }
}

#[async_trait]
impl GenerativeService for FakeModel {
    fn name(&self) -> &str {
        "fake-model"
    }

    async fn stream_text(&self, request: GenerationRequest) -> Result<TextStream> {
        self.answer_requests.lock().unwrap().push(request);
        let mut items: Vec<Result<String>> = self.fragments.iter().cloned().map(Ok).collect();
        if self.interrupt {
            items.push(Err(RagError::GenerationInterrupted {
                provider: "fake-model".into(),
                message: "stream reset".into(),
            }));
        }
        Ok(futures::stream::iter(items).boxed())
    }

    async fn generate_json(&self, request: GenerationRequest, _schema: &Value) -> Result<String> {
        self.plan_requests.lock().unwrap().push(request);
        match &self.plan {
            PlanReply::Json(json) => Ok(json.clone()),
            PlanReply::Unreachable => Err(RagError::ModelError {
                provider: "fake-model".into(),
                message: "503 Service Unavailable".into(),
            }),
        }
    }
}

/// JSON plan text for `(query, expectation)` pairs.
pub fn plan_json(queries: &[(&str, &str)]) -> String {
    let queries: Vec<Value> = queries
        .iter()
        .map(|(q, e)| serde_json::json!({ "query": q, "result_expectation": e }))
        .collect();
    serde_json::json!({ "queries": queries }).to_string()
}
