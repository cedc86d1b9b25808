//! Query planning: conversation in, retrieval-oriented search queries out.
//!
//! The [`QueryPlanner`] asks the generative service for a schema-constrained
//! JSON decomposition of the user's information needs. An empty plan is a
//! valid outcome and means there is nothing to retrieve yet.

use std::sync::Arc;

use jsonschema::Validator;
use schemars::{JsonSchema, schema_for};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::conversation::Conversation;
use crate::error::{RagError, Result};
use crate::llm::{GenerationRequest, GenerativeService};

const PLANNER_INSTRUCTION: &str = "\
You plan searches over a vector database of League of Legends lore: champions, regions, \
factions, relationships and events of Runeterra. Read the whole conversation and work out \
what the user currently wants to know.

Rules:
1. If the user has not expressed an information need yet (greetings, thanks, small talk), \
return an empty `queries` list.
2. Emit one query per distinct topic or kind of information the user asks about. \
\"Garen and Darius\" is two queries.
3. Queries are never read by a human or by another model. They are embedded and compared \
by vector similarity, so write short keyword-dense clusters, not sentences. Add keywords \
the user did not say when they improve recall: names, regions, factions, relatives, rivals.
4. Never write negations. When the user excludes a subject, leave its keywords out or \
substitute them, and you may add keywords from neighbouring subjects to steer the search \
away from it.
5. Set `result_expectation` to \"one match\" when a single document answers the need, \
\"few matches\" when a handful do, and \"all relevant\" when the user wants everything on \
the subject.";

/// Coarse cardinality hint attached to a [`SearchQuery`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum ResultExpectation {
    #[serde(rename = "one match")]
    OneMatch,
    #[serde(rename = "few matches")]
    FewMatches,
    #[serde(rename = "all relevant")]
    AllRelevant,
}

impl ResultExpectation {
    /// Concrete result count for this hint under a `max_results` ceiling.
    pub fn n_results(self, max_results: usize) -> usize {
        match self {
            Self::OneMatch => 2,
            Self::FewMatches => 3,
            Self::AllRelevant => max_results,
        }
    }
}

/// A keyword-dense query meant for embedding similarity, not for reading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SearchQuery {
    /// Keyword cluster to embed.
    pub query: String,
    /// How many documents the need calls for.
    pub result_expectation: ResultExpectation,
}

impl SearchQuery {
    pub fn new(query: impl Into<String>, result_expectation: ResultExpectation) -> Self {
        Self { query: query.into(), result_expectation }
    }

    pub fn n_results(&self, max_results: usize) -> usize {
        self.result_expectation.n_results(max_results)
    }
}

/// The structured shape requested from the generative service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SearchQueryResponse {
    /// One entry per distinct information need, possibly none.
    pub queries: Vec<SearchQuery>,
}

impl SearchQueryResponse {
    /// JSON schema of the response, as sent to the generative service.
    pub fn schema() -> Value {
        Value::from(schema_for!(SearchQueryResponse))
    }
}

/// Decomposes a conversation into [`SearchQuery`]s.
#[derive(Clone)]
pub struct QueryPlanner {
    llm: Arc<dyn GenerativeService>,
    schema: Value,
    validator: Arc<Validator>,
}

impl QueryPlanner {
    /// Create a planner backed by `llm`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if the response schema cannot be compiled.
    pub fn new(llm: Arc<dyn GenerativeService>) -> Result<Self> {
        let mut schema = SearchQueryResponse::schema();
        let validator = Validator::new(&schema)
            .map_err(|e| RagError::ConfigError(format!("invalid query plan schema: {e}")))?;
        if let Some(object) = schema.as_object_mut() {
            object.remove("$schema");
        }
        Ok(Self { llm, schema, validator: Arc::new(validator) })
    }

    /// Plan the searches for the current state of `conversation`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::PlanningDecode`] when the model output is not a
    /// valid [`SearchQueryResponse`]; no default plan is substituted. Request
    /// failures from the generative service are propagated unchanged.
    pub async fn plan(&self, conversation: &Conversation) -> Result<Vec<SearchQuery>> {
        let request = GenerationRequest::new(conversation.messages().to_vec())
            .with_system_instruction(PLANNER_INSTRUCTION)
            .with_temperature(0.0);

        let raw = self.llm.generate_json(request, &self.schema).await?;
        let response = self.decode(&raw)?;

        let queries: Vec<SearchQuery> = response
            .queries
            .into_iter()
            .filter(|q| {
                let keep = !q.query.trim().is_empty();
                if !keep {
                    warn!("dropping blank planned query");
                }
                keep
            })
            .collect();

        info!(model = self.llm.name(), query_count = queries.len(), "planned searches");
        Ok(queries)
    }

    fn decode(&self, raw: &str) -> Result<SearchQueryResponse> {
        let text = strip_code_fence(raw);
        let value: Value = serde_json::from_str(text).map_err(|e| {
            debug!(raw, "planner output is not JSON");
            RagError::PlanningDecode(format!("output is not valid JSON: {e}"))
        })?;

        if let Err(e) = self.validator.validate(&value) {
            debug!(raw, "planner output violates schema");
            return Err(RagError::PlanningDecode(format!("schema validation failed: {e}")));
        }

        serde_json::from_value(value)
            .map_err(|e| RagError::PlanningDecode(format!("unexpected plan shape: {e}")))
    }
}

/// Unwrap a JSON document from a markdown code block, if it is in one.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_count_policy() {
        assert_eq!(ResultExpectation::OneMatch.n_results(7), 2);
        assert_eq!(ResultExpectation::FewMatches.n_results(7), 3);
        assert_eq!(ResultExpectation::AllRelevant.n_results(7), 7);
    }

    #[test]
    fn expectation_uses_spaced_wire_names() {
        let query: SearchQuery =
            serde_json::from_str(r#"{"query":"garen demacia","result_expectation":"few matches"}"#)
                .unwrap();
        assert_eq!(query.result_expectation, ResultExpectation::FewMatches);
        assert!(
            serde_json::from_str::<SearchQuery>(r#"{"query":"x","result_expectation":"many"}"#)
                .is_err()
        );
    }

    #[test]
    fn schema_lists_the_closed_expectation_set() {
        let schema = SearchQueryResponse::schema().to_string();
        for name in ["one match", "few matches", "all relevant"] {
            assert!(schema.contains(name), "schema is missing {name}");
        }
    }

    #[test]
    fn code_fences_are_stripped() {
        assert_eq!(strip_code_fence("```json\n{\"queries\":[]}\n```"), "{\"queries\":[]}");
        assert_eq!(strip_code_fence("```\n{}\n```"), "{}");
        assert_eq!(strip_code_fence("  {\"a\":1} "), "{\"a\":1}");
    }
}
