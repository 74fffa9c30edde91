//! Semantic search over the vector store.

use anyhow::{bail, Result};

use crate::config::Config;
use crate::embedding::{self, Embedder};
use crate::store::{QueryFilter, QueryMatch, SqliteStore, VectorStore};

/// Embed `query` and return the `limit` closest chunks.
///
/// Blank queries return nothing without touching the embedder.
pub async fn search_chunks(
    embedder: &dyn Embedder,
    store: &dyn VectorStore,
    query: &str,
    filter: &QueryFilter,
    limit: usize,
) -> Result<Vec<QueryMatch>> {
    if query.trim().is_empty() || limit == 0 {
        return Ok(Vec::new());
    }
    let vector = embedding::embed_query(embedder, query).await?;
    store.query(&vector, limit, filter).await
}

pub async fn run_search(
    config: &Config,
    query: &str,
    source: Option<String>,
    limit: Option<usize>,
) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("search needs an embedding provider. Set [embedding] provider in config.");
    }

    let embedder = embedding::create_embedder(&config.embedding)?;
    let store = SqliteStore::connect(config).await?;
    let filter = QueryFilter {
        source,
        ..QueryFilter::default()
    };
    let limit = limit.unwrap_or(config.retrieval.top_k);

    let results = search_chunks(embedder.as_ref(), &store, query, &filter, limit).await?;
    store.close().await;

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, hit) in results.iter().enumerate() {
        println!("{}. [{:.2}] {} / {}", i + 1, hit.score, hit.source, hit.title());
        if let Some(url) = hit.metadata.get("url") {
            println!("    url: {}", url);
        }
        println!("    chunk: {} of {}", hit.chunk_index + 1, hit.source_id);
        println!("    excerpt: \"{}\"", snippet(&hit.content, 240));
        println!();
    }

    Ok(())
}

/// First `max_chars` characters on one line.
pub fn snippet(content: &str, max_chars: usize) -> String {
    let flat = content.split_whitespace().collect::<Vec<_>>().join(" ");
    match flat.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &flat[..cut]),
        None => flat,
    }
}
