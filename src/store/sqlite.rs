//! SQLite-backed [`VectorStore`].
//!
//! Vectors are stored as little-endian f32 BLOBs in `chunk_vectors`.
//! The source filter runs in SQL; metadata filters and cosine scoring run
//! in Rust over the candidate rows.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use super::{rank, QueryFilter, QueryMatch, VectorRecord, VectorStore};
use crate::config::Config;
use crate::db;
use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::models::ChunkMetadata;

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to the configured database. Run `init` first.
    pub async fn connect(config: &Config) -> Result<Self> {
        Ok(Self::new(db::connect(config).await?))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl VectorStore for SqliteStore {
    async fn upsert(&self, record: &VectorRecord) -> Result<String> {
        let metadata_json = serde_json::to_string(&record.metadata)?;
        sqlx::query(
            r#"
            INSERT INTO chunk_vectors
                (id, source, source_id, chunk_index, total_chunks, content,
                 metadata_json, vector, model, dims, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                source = excluded.source,
                source_id = excluded.source_id,
                chunk_index = excluded.chunk_index,
                total_chunks = excluded.total_chunks,
                content = excluded.content,
                metadata_json = excluded.metadata_json,
                vector = excluded.vector,
                model = excluded.model,
                dims = excluded.dims,
                created_at = excluded.created_at
            "#,
        )
        .bind(&record.id)
        .bind(&record.source)
        .bind(&record.source_id)
        .bind(record.chunk_index as i64)
        .bind(record.total_chunks as i64)
        .bind(&record.content)
        .bind(&metadata_json)
        .bind(vec_to_blob(&record.vector))
        .bind(&record.model)
        .bind(record.vector.len() as i64)
        .bind(record.created_at.timestamp())
        .execute(&self.pool)
        .await?;

        Ok(record.id.clone())
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: &QueryFilter,
    ) -> Result<Vec<QueryMatch>> {
        let rows = match &filter.source {
            Some(source) => {
                sqlx::query(
                    "SELECT id, source, source_id, chunk_index, content, metadata_json, vector \
                     FROM chunk_vectors WHERE source = ? AND dims = ?",
                )
                .bind(source)
                .bind(vector.len() as i64)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT id, source, source_id, chunk_index, content, metadata_json, vector \
                     FROM chunk_vectors WHERE dims = ?",
                )
                .bind(vector.len() as i64)
                .fetch_all(&self.pool)
                .await?
            }
        };

        let mut hits = Vec::with_capacity(rows.len());
        for row in &rows {
            let source: String = row.get("source");
            let metadata_json: String = row.get("metadata_json");
            let metadata: ChunkMetadata = serde_json::from_str(&metadata_json)
                .with_context(|| format!("Bad metadata_json for {}", row.get::<String, _>("id")))?;
            if !filter.matches(&source, &metadata) {
                continue;
            }
            let blob: Vec<u8> = row.get("vector");
            let stored = blob_to_vec(&blob);
            if stored.len() != vector.len() {
                continue;
            }
            let chunk_index: i64 = row.get("chunk_index");
            hits.push(QueryMatch {
                id: row.get("id"),
                score: cosine_similarity(vector, &stored),
                source,
                source_id: row.get("source_id"),
                chunk_index: chunk_index as usize,
                content: row.get("content"),
                metadata,
            });
        }

        Ok(rank(hits, top_k))
    }

    async fn delete_document(&self, source: &str, source_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM chunk_vectors WHERE source = ? AND source_id = ?")
            .bind(source)
            .bind(source_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunk_vectors")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}

/// Stored records of one document, ordered by chunk index.
pub async fn document_records(
    pool: &SqlitePool,
    source: &str,
    source_id: &str,
) -> Result<Vec<VectorRecord>> {
    let rows = sqlx::query(
        "SELECT id, chunk_index, total_chunks, content, metadata_json, vector, model, created_at \
         FROM chunk_vectors WHERE source = ? AND source_id = ? ORDER BY chunk_index",
    )
    .bind(source)
    .bind(source_id)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let metadata_json: String = row.get("metadata_json");
            let blob: Vec<u8> = row.get("vector");
            let chunk_index: i64 = row.get("chunk_index");
            let total_chunks: i64 = row.get("total_chunks");
            let created_at: i64 = row.get("created_at");
            Ok(VectorRecord {
                id: row.get("id"),
                source: source.to_string(),
                source_id: source_id.to_string(),
                chunk_index: chunk_index as usize,
                total_chunks: total_chunks as usize,
                content: row.get("content"),
                metadata: serde_json::from_str(&metadata_json)?,
                vector: blob_to_vec(&blob),
                model: row.get("model"),
                created_at: DateTime::<Utc>::from_timestamp(created_at, 0).unwrap_or_default(),
            })
        })
        .collect()
}
