//! Grounded answer generation over the aggregated documents.

use std::fmt::Write as _;
use std::sync::Arc;

use futures::{StreamExt, future};
use tracing::{debug, info};

use crate::config::RagConfig;
use crate::conversation::{Conversation, Message};
use crate::document::{Document, DocumentSet};
use crate::error::Result;
use crate::llm::{GenerationRequest, GenerativeService, TextStream};

/// Streams answers that are derived only from the supplied documents.
#[derive(Clone)]
pub struct ConversationalResponder {
    llm: Arc<dyn GenerativeService>,
    config: RagConfig,
}

impl ConversationalResponder {
    pub fn new(llm: Arc<dyn GenerativeService>, config: RagConfig) -> Self {
        Self { llm, config }
    }

    /// Build the system instruction that grounds the answer in `documents`.
    pub fn grounding_instruction<'a>(
        &self,
        documents: impl IntoIterator<Item = &'a Document>,
    ) -> String {
        let mut instruction = format!(
            "You are the {persona}, a keeper of the lore of Runeterra, the world of League of \
             Legends, and you speak with authority on its champions, regions and history.\n\
             Answer only from the documents below, never from your own background knowledge. \
             If the documents do not contain the answer, say that no matching information was \
             found.\n\
             Reply in the language the user writes in; if it is unclear, reply in {locale}.\n\
             You may quote the documents word for word.\n\n\
             Documents:\n",
            persona = self.config.persona,
            locale = self.config.locale,
        );
        let mut any = false;
        for document in documents {
            any = true;
            let _ = write!(instruction, "\n## {}\n{}\n", document.title, document.content);
        }
        if !any {
            instruction.push_str("\n(no documents)\n");
        }
        instruction
    }

    /// Stream an answer to `conversation` grounded in `documents`.
    ///
    /// An empty `documents` set still produces an answer, typically stating
    /// that nothing matching was found.
    ///
    /// # Errors
    ///
    /// Returns the generative service's error if the stream cannot start.
    pub async fn respond(
        &self,
        conversation: &Conversation,
        documents: &DocumentSet,
    ) -> Result<TextStream> {
        let request = GenerationRequest::new(conversation.messages().to_vec())
            .with_system_instruction(self.grounding_instruction(documents))
            .with_temperature(self.config.temperature);

        info!(model = self.llm.name(), document_count = documents.len(), "generating answer");
        self.start(request).await
    }

    /// Stream a markdown summary of `documents` for a single search `query`.
    ///
    /// # Errors
    ///
    /// Returns the generative service's error if the stream cannot start.
    pub async fn summarize(&self, query: &str, documents: &[Document]) -> Result<TextStream> {
        let mut instruction = format!(
            "Summarize the following documents in a single markdown write-up. Use markdown \
             freely. Write in the language of the user query (usually {locale}), not the \
             language of the documents. Only output the summary and nothing else.\n\n\
             Documents:\n",
            locale = self.config.locale,
        );
        for document in documents {
            let _ = write!(instruction, "\n## {}\n{}\n", document.title, document.content);
        }

        let request = GenerationRequest::new(vec![Message::user(query)])
            .with_system_instruction(instruction)
            .with_temperature(self.config.temperature);

        info!(model = self.llm.name(), document_count = documents.len(), "generating summary");
        self.start(request).await
    }

    async fn start(&self, request: GenerationRequest) -> Result<TextStream> {
        let stream = self.llm.stream_text(request).await?;
        debug!("answer stream opened");
        Ok(stream
            .filter(|fragment| future::ready(!matches!(fragment, Ok(text) if text.is_empty())))
            .boxed())
    }
}
