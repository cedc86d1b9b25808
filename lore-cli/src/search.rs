//! Direct corpus search, bypassing query planning.

use std::io::Write;

use futures::StreamExt;
use lore_rag::ChatPipeline;

const MIN_COUNT: usize = 1;
const MAX_COUNT: usize = 10;

/// Print the `count` closest documents to `query`, optionally followed by a
/// streamed summary of them.
pub async fn run(
    pipeline: &ChatPipeline,
    query: &str,
    count: usize,
    summarize: bool,
) -> anyhow::Result<()> {
    let count = count.clamp(MIN_COUNT, MAX_COUNT);
    let documents = pipeline.retriever().retrieve(query, count).await?;

    if documents.is_empty() {
        println!("Aucun document trouvé.");
        return Ok(());
    }

    for document in &documents {
        println!("## {} ({:.2})\n\n{}\n", document.title, document.rating, document.content);
    }

    if summarize {
        println!("---\n");
        let mut summary = pipeline.responder().summarize(query, &documents).await?;
        let mut stdout = std::io::stdout();
        while let Some(fragment) = summary.next().await {
            print!("{}", fragment?);
            stdout.flush()?;
        }
        println!();
    }
    Ok(())
}
