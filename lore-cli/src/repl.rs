//! Interactive chat shell.

use std::collections::HashMap;
use std::io::Write;

use futures::StreamExt;
use lore_rag::{
    ChatEvent, ChatPipeline, Conversation, DEFAULT_GREETING, DocumentSet, Role, TurnTranscript,
};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tracing::warn;

const PROMPT: &str = "vous> ";

/// Shows the sources of the latest answer again.
const SOURCES_COMMAND: &str = "/sources";

/// The session conversation, with the sources each assistant answer was
/// grounded on kept alongside it.
struct ChatLog {
    conversation: Conversation,
    sources: HashMap<usize, DocumentSet>,
}

impl ChatLog {
    fn new() -> Self {
        Self { conversation: Conversation::with_greeting(), sources: HashMap::new() }
    }

    fn ask(&mut self, question: &str) {
        self.conversation.push_user(question);
    }

    /// Store the answer of a finished turn together with its sources.
    /// A turn that produced no text leaves the log unchanged.
    fn answer(&mut self, transcript: TurnTranscript) {
        if transcript.answer.is_empty() {
            return;
        }
        self.conversation.push_assistant(transcript.answer);
        self.sources.insert(self.conversation.len() - 1, transcript.documents);
    }

    /// Sources of the most recent assistant answer, if it had any.
    fn latest_sources(&self) -> Option<&DocumentSet> {
        let index = self
            .conversation
            .messages()
            .iter()
            .rposition(|m| m.role == Role::Assistant)?;
        self.sources.get(&index)
    }
}

/// Read user turns until EOF, answering each from the corpus.
pub async fn run(pipeline: &ChatPipeline) -> anyhow::Result<()> {
    let mut editor = DefaultEditor::new()?;
    let mut log = ChatLog::new();
    println!("{DEFAULT_GREETING}\n");

    loop {
        let line = match editor.readline(PROMPT) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if matches!(input, "exit" | "quit") {
            break;
        }
        if let Err(e) = editor.add_history_entry(input) {
            warn!(error = %e, "failed to record line history");
        }

        if input == SOURCES_COMMAND {
            match log.latest_sources() {
                Some(sources) => print_sources(sources),
                None => println!("Aucune source pour l'instant.\n"),
            }
            continue;
        }

        log.ask(input);
        let transcript = turn(pipeline, &log.conversation).await?;
        print_sources(&transcript.documents);
        log.answer(transcript);
    }

    println!("À bientôt !");
    Ok(())
}

/// Play one turn to the terminal and return what was received.
///
/// A failed turn is reported and keeps whatever it produced.
async fn turn(
    pipeline: &ChatPipeline,
    conversation: &Conversation,
) -> anyhow::Result<TurnTranscript> {
    let mut events = pipeline.chat_default(conversation.clone());
    let mut transcript = TurnTranscript::new();
    let mut stdout = std::io::stdout();

    while let Some(event) = events.next().await {
        let event = match event {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "turn ended early");
                eprintln!("\n[erreur] {e}");
                break;
            }
        };
        match &event {
            ChatEvent::QueryIssued(query) => eprintln!("  recherche : {query}"),
            ChatEvent::DocumentsFound(documents) => {
                eprintln!("  {} document(s) trouvé(s)\n", documents.len())
            }
            ChatEvent::AnswerFragment(fragment) => {
                print!("{fragment}");
                stdout.flush()?;
            }
        }
        transcript.record(&event);
    }
    println!();
    Ok(transcript)
}

fn print_sources(documents: &DocumentSet) {
    if !documents.is_empty() {
        println!("\nSources :");
        for document in documents.best_first() {
            println!("  - {} ({:.2})", document.title, document.rating);
        }
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use lore_rag::Document;

    fn transcript(answer: &str, ids: &[&str]) -> TurnTranscript {
        TurnTranscript {
            queries: Vec::new(),
            documents: ids
                .iter()
                .map(|id| Document {
                    id: id.to_string(),
                    rating: 0.3,
                    title: id.to_uppercase(),
                    content: String::new(),
                })
                .collect(),
            answer: answer.to_string(),
        }
    }

    #[test]
    fn sources_stay_with_their_answer() {
        let mut log = ChatLog::new();
        assert!(log.latest_sources().is_none());

        log.ask("Qui est Garen ?");
        log.answer(transcript("Le Poing de Demacia.", &["garen"]));
        log.ask("Et Darius ?");
        log.answer(transcript("La Main de Noxus.", &["darius", "rivalry"]));

        assert_eq!(log.conversation.len(), 5);
        let latest = log.latest_sources().unwrap();
        assert!(latest.contains("darius") && latest.contains("rivalry"));
        assert!(log.sources.get(&2).unwrap().contains("garen"));
    }

    #[test]
    fn empty_answer_is_not_stored() {
        let mut log = ChatLog::new();
        log.ask("Qui est Garen ?");
        log.answer(transcript("", &["garen"]));

        assert_eq!(log.conversation.len(), 2);
        assert!(log.latest_sources().is_none());
    }
}
