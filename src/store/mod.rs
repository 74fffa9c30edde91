//! Vector storage abstraction.
//!
//! The [`VectorStore`] trait is everything the ingestion pipeline and the
//! `search`/`ask` commands need from a vector database: upsert a vector
//! with its chunk and metadata, query by similarity with filters, and drop
//! a document's vectors before re-ingesting it.
//!
//! | Implementation | Backing |
//! |----------------|---------|
//! | [`SqliteStore`] | `chunk_vectors` table, vectors as little-endian f32 BLOBs |
//! | [`InMemoryStore`] | `RwLock<Vec<_>>`, for tests and dry experiments |
//!
//! Both rank by brute-force cosine similarity, scores descending.

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{ChunkMetadata, TextChunk};

/// One stored vector plus the chunk it was computed from.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    pub id: String,
    pub source: String,
    pub source_id: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub content: String,
    pub metadata: ChunkMetadata,
    pub vector: Vec<f32>,
    pub model: String,
    pub created_at: DateTime<Utc>,
}

impl VectorRecord {
    pub fn from_chunk(
        chunk: &TextChunk,
        source: &str,
        source_id: &str,
        vector: Vec<f32>,
        model: &str,
    ) -> Self {
        Self {
            id: chunk.id.clone(),
            source: source.to_string(),
            source_id: source_id.to_string(),
            chunk_index: chunk.chunk_index,
            total_chunks: chunk.total_chunks,
            content: chunk.content.clone(),
            metadata: chunk.metadata.clone(),
            vector,
            model: model.to_string(),
            created_at: chunk.created_at,
        }
    }
}

/// Restricts a query to one source and/or exact metadata values.
#[derive(Debug, Clone, Default)]
pub struct QueryFilter {
    pub source: Option<String>,
    pub metadata: ChunkMetadata,
}

impl QueryFilter {
    pub fn source(source: impl Into<String>) -> Self {
        Self {
            source: Some(source.into()),
            metadata: ChunkMetadata::new(),
        }
    }

    pub fn matches(&self, source: &str, metadata: &ChunkMetadata) -> bool {
        if let Some(want) = &self.source {
            if want != source {
                return false;
            }
        }
        self.metadata
            .iter()
            .all(|(key, value)| metadata.get(key) == Some(value))
    }
}

/// A query hit, best first.
#[derive(Debug, Clone, Serialize)]
pub struct QueryMatch {
    pub id: String,
    pub score: f32,
    pub source: String,
    pub source_id: String,
    pub chunk_index: usize,
    pub content: String,
    pub metadata: ChunkMetadata,
}

impl QueryMatch {
    /// Title for display, falling back to the source id.
    pub fn title(&self) -> String {
        self.metadata
            .get("title")
            .map(|t| t.to_string())
            .unwrap_or_else(|| self.source_id.clone())
    }
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or replace a record by id. Returns the id.
    async fn upsert(&self, record: &VectorRecord) -> Result<String>;

    /// The `top_k` most similar records passing `filter`, scores descending.
    /// Records whose dimension differs from `vector` are never compared.
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: &QueryFilter,
    ) -> Result<Vec<QueryMatch>>;

    /// Remove every record of one source document. Returns how many went.
    async fn delete_document(&self, source: &str, source_id: &str) -> Result<u64>;

    /// Total number of stored records.
    async fn count(&self) -> Result<u64>;
}

/// Sort hits by score descending and keep the first `top_k`.
pub(crate) fn rank(mut hits: Vec<QueryMatch>, top_k: usize) -> Vec<QueryMatch> {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    hits.truncate(top_k);
    hits
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MetadataValue;

    #[test]
    fn test_filter_matches() {
        let mut meta = ChunkMetadata::new();
        meta.insert("state".into(), "open".into());
        meta.insert("number".into(), MetadataValue::Integer(7));

        assert!(QueryFilter::default().matches("github:issues", &meta));
        assert!(QueryFilter::source("github:issues").matches("github:issues", &meta));
        assert!(!QueryFilter::source("github:wiki").matches("github:issues", &meta));

        let mut f = QueryFilter::default();
        f.metadata.insert("state".into(), "open".into());
        assert!(f.matches("x", &meta));
        f.metadata.insert("number".into(), MetadataValue::Integer(8));
        assert!(!f.matches("x", &meta));
    }
}
