//! In-memory [`VectorStore`] for tests and throwaway indexes.
//!
//! Records live in a `Vec` behind `std::sync::RwLock`; queries are
//! brute-force cosine similarity over everything stored.

use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;

use super::{rank, QueryFilter, QueryMatch, VectorRecord, VectorStore};
use crate::embedding::cosine_similarity;

#[derive(Default)]
pub struct InMemoryStore {
    records: RwLock<Vec<VectorRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored record, in insertion order.
    pub fn records(&self) -> Result<Vec<VectorRecord>> {
        Ok(self.records.read().map_err(poisoned)?.clone())
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow::anyhow!("in-memory store lock poisoned")
}

#[async_trait]
impl VectorStore for InMemoryStore {
    async fn upsert(&self, record: &VectorRecord) -> Result<String> {
        let mut records = self.records.write().map_err(poisoned)?;
        records.retain(|r| r.id != record.id);
        records.push(record.clone());
        Ok(record.id.clone())
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: &QueryFilter,
    ) -> Result<Vec<QueryMatch>> {
        let records = self.records.read().map_err(poisoned)?;
        let hits = records
            .iter()
            .filter(|r| r.vector.len() == vector.len())
            .filter(|r| filter.matches(&r.source, &r.metadata))
            .map(|r| QueryMatch {
                id: r.id.clone(),
                score: cosine_similarity(vector, &r.vector),
                source: r.source.clone(),
                source_id: r.source_id.clone(),
                chunk_index: r.chunk_index,
                content: r.content.clone(),
                metadata: r.metadata.clone(),
            })
            .collect();
        Ok(rank(hits, top_k))
    }

    async fn delete_document(&self, source: &str, source_id: &str) -> Result<u64> {
        let mut records = self.records.write().map_err(poisoned)?;
        let before = records.len();
        records.retain(|r| !(r.source == source && r.source_id == source_id));
        Ok((before - records.len()) as u64)
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.records.read().map_err(poisoned)?.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChunkMetadata;
    use chrono::Utc;

    fn record(id: &str, source_id: &str, vector: Vec<f32>) -> VectorRecord {
        VectorRecord {
            id: id.to_string(),
            source: "github:docs".to_string(),
            source_id: source_id.to_string(),
            chunk_index: 0,
            total_chunks: 1,
            content: format!("content of {}", id),
            metadata: ChunkMetadata::new(),
            vector,
            model: "test".to_string(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_query_orders_by_similarity() {
        let store = InMemoryStore::new();
        store.upsert(&record("a", "README.md", vec![1.0, 0.0])).await.unwrap();
        store.upsert(&record("b", "README.md", vec![0.7, 0.7])).await.unwrap();
        store.upsert(&record("c", "guide.md", vec![0.0, 1.0])).await.unwrap();

        let hits = store
            .query(&[1.0, 0.1], 2, &QueryFilter::default())
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "a");
        assert_eq!(hits[1].id, "b");
        assert!(hits[0].score >= hits[1].score);
    }

    #[tokio::test]
    async fn test_upsert_replaces_and_delete_document() {
        let store = InMemoryStore::new();
        store.upsert(&record("a", "README.md", vec![1.0])).await.unwrap();
        store.upsert(&record("a", "README.md", vec![0.5])).await.unwrap();
        store.upsert(&record("b", "guide.md", vec![1.0])).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 2);

        let removed = store.delete_document("github:docs", "README.md").await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(store.records().unwrap()[0].id, "b");
    }

    #[tokio::test]
    async fn test_query_skips_other_dimensions() {
        let store = InMemoryStore::new();
        store.upsert(&record("a", "README.md", vec![1.0, 0.0])).await.unwrap();
        store.upsert(&record("b", "README.md", vec![1.0, 0.0, 0.0])).await.unwrap();
        store.upsert(&record("c", "guide.md", vec![0.0, 1.0])).await.unwrap();

        let hits = store
            .query(&[1.0, 0.0], 10, &QueryFilter::default())
            .await
            .unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn test_records_reports_poisoned_lock() {
        let store = std::sync::Arc::new(InMemoryStore::new());
        let clone = store.clone();
        let _ = std::thread::spawn(move || {
            let _guard = clone.records.write().unwrap();
            panic!("writer died holding the lock");
        })
        .join();

        let err = store.records().unwrap_err();
        assert!(err.to_string().contains("poisoned"), "{}", err);
    }
}
