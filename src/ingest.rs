//! Ingestion pipeline orchestration.
//!
//! Coordinates the sync flow: connector → chunking → embedding → vector
//! store. Incremental syncs resume from a per-source checkpoint (the
//! latest `updated_at` seen). Embedding failures are non-fatal: the
//! document keeps its previous vectors, is counted as pending, and the
//! checkpoint stops short of it so the next sync retries it.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::chunk::Chunker;
use crate::config::Config;
use crate::db;
use crate::embedding::{create_embedder, embed_batched, Embedder};
use crate::models::{ChunkMetadata, SourceItem};
use crate::progress::{ProgressMode, SyncProgressEvent, SyncProgressReporter};
use crate::store::{SqliteStore, VectorRecord, VectorStore};
use crate::traits::{Connector, ConnectorRegistry};

/// Flags of `docsift sync`.
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Ignore the checkpoint and re-ingest everything.
    pub full: bool,
    /// Scan and chunk, but write nothing.
    pub dry_run: bool,
    /// `YYYY-MM-DD`, inclusive.
    pub since: Option<String>,
    /// `YYYY-MM-DD`, inclusive.
    pub until: Option<String>,
    pub limit: Option<usize>,
    pub progress: ProgressMode,
}

/// Counters for one connector run.
///
/// Owned by the ingestion loop: `start`, a series of `record_*`, then
/// `finish`.
#[derive(Debug)]
pub struct IngestMetrics {
    source: String,
    started: Instant,
    items_scanned: u64,
    documents_ingested: u64,
    documents_empty: u64,
    chunks_written: u64,
    embeddings_pending: u64,
    vectors_replaced: u64,
}

impl IngestMetrics {
    pub fn start(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            started: Instant::now(),
            items_scanned: 0,
            documents_ingested: 0,
            documents_empty: 0,
            chunks_written: 0,
            embeddings_pending: 0,
            vectors_replaced: 0,
        }
    }

    pub fn record_scanned(&mut self, items: usize) {
        self.items_scanned += items as u64;
    }

    pub fn record_document(&mut self, chunks: usize, replaced: u64) {
        self.documents_ingested += 1;
        self.chunks_written += chunks as u64;
        self.vectors_replaced += replaced;
    }

    pub fn record_empty(&mut self, replaced: u64) {
        self.documents_empty += 1;
        self.vectors_replaced += replaced;
    }

    pub fn record_pending(&mut self, chunks: usize) {
        self.embeddings_pending += chunks as u64;
    }

    pub fn finish(self, checkpoint: Option<DateTime<Utc>>) -> IngestReport {
        IngestReport {
            source: self.source,
            items_scanned: self.items_scanned,
            documents_ingested: self.documents_ingested,
            documents_empty: self.documents_empty,
            chunks_written: self.chunks_written,
            embeddings_pending: self.embeddings_pending,
            vectors_replaced: self.vectors_replaced,
            checkpoint,
            elapsed: self.started.elapsed(),
        }
    }
}

/// Outcome of one connector run.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub source: String,
    pub items_scanned: u64,
    pub documents_ingested: u64,
    pub documents_empty: u64,
    pub chunks_written: u64,
    /// Chunks whose embedding failed.
    pub embeddings_pending: u64,
    /// Previous vectors removed when documents were re-ingested.
    pub vectors_replaced: u64,
    pub checkpoint: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub elapsed: Duration,
}

impl IngestReport {
    pub fn print(&self) {
        println!("sync {}", self.source);
        println!("  fetched: {} items", self.items_scanned);
        println!("  documents ingested: {}", self.documents_ingested);
        if self.documents_empty > 0 {
            println!("  empty documents: {}", self.documents_empty);
        }
        println!("  chunks written: {}", self.chunks_written);
        println!("  vectors replaced: {}", self.vectors_replaced);
        println!("  embeddings pending: {}", self.embeddings_pending);
        match self.checkpoint {
            Some(cp) => println!("  checkpoint: {}", cp.to_rfc3339()),
            None => println!("  checkpoint: none"),
        }
        println!("  elapsed: {:.1}s", self.elapsed.as_secs_f64());
        println!("ok");
    }
}

/// The stages one document passes through.
pub struct Pipeline<'a> {
    pub chunker: &'a Chunker,
    pub embedder: &'a dyn Embedder,
    pub store: &'a dyn VectorStore,
    pub batch_size: usize,
    pub progress: &'a dyn SyncProgressReporter,
}

/// Sync the connectors selected by `target` (`docs`, `wiki`, `issues`,
/// `local` or `all`) from the config's built-in set.
pub async fn run_sync(config: &Config, target: &str, opts: SyncOptions) -> Result<Vec<IngestReport>> {
    let registry = ConnectorRegistry::from_config(config)?;
    run_sync_with_connectors(config, target, &registry, opts).await
}

/// Like [`run_sync`] but against a caller-supplied registry, so custom
/// connectors can be synced into the configured database.
pub async fn run_sync_with_connectors(
    config: &Config,
    target: &str,
    registry: &ConnectorRegistry,
    opts: SyncOptions,
) -> Result<Vec<IngestReport>> {
    let connectors = registry.resolve(target)?;

    if !opts.dry_run && !config.embedding.is_enabled() {
        bail!("sync needs an embedding provider. Set [embedding] provider in config.");
    }

    let chunker = Chunker::new(config.chunking.clone()).context("invalid [chunking] config")?;
    let embedder = create_embedder(&config.embedding)?;
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let reporter = opts.progress.reporter();
    let pipeline = Pipeline {
        chunker: &chunker,
        embedder: embedder.as_ref(),
        store: &store,
        batch_size: config.embedding.batch_size,
        progress: reporter.as_ref(),
    };

    let mut reports = Vec::new();
    for connector in connectors {
        let label = connector.source_label();
        let checkpoint = if opts.full {
            None
        } else {
            get_checkpoint(&pool, &label).await?
        };

        let report = sync_connector(connector, &pipeline, &opts, checkpoint).await?;

        if opts.dry_run {
            continue;
        }
        if let Some(cp) = report.checkpoint {
            if Some(cp) != checkpoint {
                set_checkpoint(&pool, &label, cp).await?;
            }
        }
        report.print();
        reports.push(report);
    }

    pool.close().await;
    Ok(reports)
}

/// Scan one connector and push its items through `pipeline`.
///
/// `checkpoint` is the cursor from the previous run; the returned report
/// carries the advanced one. A dry run prints item and chunk estimates
/// and returns an empty report.
pub async fn sync_connector(
    connector: &dyn Connector,
    pipeline: &Pipeline<'_>,
    opts: &SyncOptions,
    checkpoint: Option<DateTime<Utc>>,
) -> Result<IngestReport> {
    let label = connector.source_label();
    let mut metrics = IngestMetrics::start(&label);

    pipeline.progress.report(SyncProgressEvent::Discovering {
        connector: label.clone(),
    });
    let mut items = connector
        .scan_since(checkpoint)
        .await
        .with_context(|| format!("scan of {} failed", label))?;

    // Checkpoints are stored at second resolution.
    if let Some(cp) = checkpoint {
        items.retain(|item| item.updated_at.timestamp() > cp.timestamp());
    }
    if let Some(since) = opts.since.as_deref() {
        let since = parse_day(since, false)?;
        items.retain(|item| item.updated_at >= since);
    }
    if let Some(until) = opts.until.as_deref() {
        let until = parse_day(until, true)?;
        items.retain(|item| item.updated_at <= until);
    }
    items.sort_by(|a, b| a.updated_at.cmp(&b.updated_at).then(a.source_id.cmp(&b.source_id)));
    if let Some(limit) = opts.limit {
        items.truncate(limit);
    }
    metrics.record_scanned(items.len());
    debug!(source = %label, items = items.len(), "items selected");

    if opts.dry_run {
        let estimated: usize = items
            .iter()
            .map(|item| pipeline.chunker.chunk(&item.body, &ChunkMetadata::new()).len())
            .sum();
        println!("sync {} (dry-run)", label);
        println!("  items found: {}", items.len());
        println!("  estimated chunks: {}", estimated);
        return Ok(metrics.finish(checkpoint));
    }

    let total = items.len() as u64;
    let mut newest = checkpoint;
    let mut oldest_pending: Option<DateTime<Utc>> = None;

    for (n, item) in items.iter().enumerate() {
        let ok = ingest_item(item, pipeline, &mut metrics).await?;
        if !ok {
            pipeline.progress.report(SyncProgressEvent::Pending {
                connector: label.clone(),
                source_id: item.source_id.clone(),
            });
            oldest_pending = Some(oldest_pending.map_or(item.updated_at, |p| p.min(item.updated_at)));
        }
        newest = Some(newest.map_or(item.updated_at, |c| c.max(item.updated_at)));
        pipeline.progress.report(SyncProgressEvent::Ingesting {
            connector: label.clone(),
            n: n as u64 + 1,
            total,
        });
    }

    let advanced = advance_checkpoint(newest, oldest_pending);
    let report = metrics.finish(advanced);
    pipeline.progress.report(SyncProgressEvent::Done {
        connector: label.clone(),
        documents: report.documents_ingested,
        chunks: report.chunks_written,
    });
    info!(
        source = %label,
        documents = report.documents_ingested,
        chunks = report.chunks_written,
        pending = report.embeddings_pending,
        "sync finished"
    );
    Ok(report)
}

/// Chunk, embed and store one item. Returns `false` when its embedding
/// failed and the item was left pending.
pub async fn ingest_item(
    item: &SourceItem,
    pipeline: &Pipeline<'_>,
    metrics: &mut IngestMetrics,
) -> Result<bool> {
    let metadata = document_metadata(item);
    let chunks = pipeline.chunker.chunk(&item.body, &metadata);

    if chunks.is_empty() {
        let removed = pipeline
            .store
            .delete_document(&item.source, &item.source_id)
            .await?;
        metrics.record_empty(removed);
        return Ok(true);
    }

    let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
    let vectors = match embed_batched(pipeline.embedder, &texts, pipeline.batch_size).await {
        Ok(v) => v,
        Err(e) => {
            warn!(source = %item.source, source_id = %item.source_id, error = %e, "embedding failed; document left pending");
            metrics.record_pending(chunks.len());
            return Ok(false);
        }
    };

    let replaced = pipeline
        .store
        .delete_document(&item.source, &item.source_id)
        .await?;
    for (chunk, vector) in chunks.iter().zip(vectors) {
        let record = VectorRecord::from_chunk(
            chunk,
            &item.source,
            &item.source_id,
            vector,
            pipeline.embedder.model_name(),
        );
        pipeline.store.upsert(&record).await?;
    }
    metrics.record_document(chunks.len(), replaced);
    Ok(true)
}

/// Attribution copied onto every chunk of `item`.
pub fn document_metadata(item: &SourceItem) -> ChunkMetadata {
    let mut metadata = item.metadata.clone();
    metadata.insert("source".into(), item.source.clone().into());
    metadata.insert("source_id".into(), item.source_id.clone().into());
    metadata.insert("content_type".into(), item.content_type.clone().into());
    metadata.insert("updated_at".into(), item.updated_at.to_rfc3339().into());
    if let Some(title) = &item.title {
        metadata.insert("title".into(), title.clone().into());
    }
    if let Some(url) = &item.source_url {
        metadata.insert("url".into(), url.clone().into());
    }
    if let Some(author) = &item.author {
        metadata.entry("author".into()).or_insert_with(|| author.clone().into());
    }
    metadata
}

/// New cursor: the newest item seen, but never past a pending item.
fn advance_checkpoint(
    newest: Option<DateTime<Utc>>,
    oldest_pending: Option<DateTime<Utc>>,
) -> Option<DateTime<Utc>> {
    match (newest, oldest_pending) {
        (Some(n), Some(p)) => Some(n.min(p - chrono::Duration::seconds(1))),
        (n, _) => n,
    }
}

fn parse_day(s: &str, end_of_day: bool) -> Result<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .with_context(|| format!("Invalid date '{}', expected YYYY-MM-DD", s))?;
    let time = if end_of_day {
        NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN)
    } else {
        NaiveTime::MIN
    };
    Ok(date.and_time(time).and_utc())
}

pub async fn get_checkpoint(pool: &SqlitePool, source: &str) -> Result<Option<DateTime<Utc>>> {
    let result: Option<String> =
        sqlx::query_scalar("SELECT cursor FROM checkpoints WHERE source = ?")
            .bind(source)
            .fetch_optional(pool)
            .await?;

    Ok(result
        .and_then(|s| s.parse::<i64>().ok())
        .and_then(|ts| Utc.timestamp_opt(ts, 0).single()))
}

pub async fn set_checkpoint(pool: &SqlitePool, source: &str, cursor: DateTime<Utc>) -> Result<()> {
    let now = Utc::now().timestamp();
    sqlx::query(
        r#"
        INSERT INTO checkpoints (source, cursor, updated_at) VALUES (?, ?, ?)
        ON CONFLICT(source) DO UPDATE SET cursor = excluded.cursor, updated_at = excluded.updated_at
        "#,
    )
    .bind(source)
    .bind(cursor.timestamp().to_string())
    .bind(now)
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::ChunkingConfig;
    use crate::embedding::HashEmbedder;
    use crate::models::MetadataValue;
    use crate::progress::NoProgress;
    use crate::store::{InMemoryStore, QueryFilter};
    use async_trait::async_trait;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, day, 12, 0, 0).unwrap()
    }

    fn item(id: &str, day: u32, body: &str) -> SourceItem {
        SourceItem {
            source: "test:docs".to_string(),
            source_id: id.to_string(),
            source_url: Some(format!("https://example.com/{}", id)),
            title: Some(id.to_uppercase()),
            author: Some("ada".to_string()),
            created_at: at(day),
            updated_at: at(day),
            content_type: "text/markdown".to_string(),
            body: body.to_string(),
            metadata: ChunkMetadata::new(),
        }
    }

    struct Fixed(Vec<SourceItem>);

    #[async_trait]
    impl Connector for Fixed {
        fn name(&self) -> &str {
            "docs"
        }
        fn description(&self) -> &str {
            "fixed items"
        }
        fn connector_type(&self) -> &str {
            "test"
        }
        async fn scan(&self) -> Result<Vec<SourceItem>> {
            Ok(self.0.clone())
        }
    }

    /// Fails for any batch containing the marker.
    struct Flaky;

    #[async_trait]
    impl Embedder for Flaky {
        fn model_name(&self) -> &str {
            "flaky"
        }
        fn dims(&self) -> usize {
            4
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            if texts.iter().any(|t| t.contains("FAIL")) {
                bail!("upstream 503");
            }
            Ok(texts.iter().map(|_| vec![1.0, 0.0, 0.0, 0.0]).collect())
        }
    }

    fn chunker() -> Chunker {
        Chunker::new(ChunkingConfig {
            chunk_size: 60,
            chunk_overlap: 10,
            ..ChunkingConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_sync_writes_vectors_and_advances_checkpoint() {
        let chunker = chunker();
        let embedder = HashEmbedder::new(32);
        let store = InMemoryStore::new();
        let pipeline = Pipeline {
            chunker: &chunker,
            embedder: &embedder,
            store: &store,
            batch_size: 8,
            progress: &NoProgress,
        };
        let connector = Fixed(vec![
            item("a.md", 2, "# A\n\nShort doc."),
            item("b.md", 3, &"Longer paragraph text. ".repeat(10)),
            item("c.md", 1, "   "),
        ]);

        let report = sync_connector(&connector, &pipeline, &SyncOptions::default(), None)
            .await
            .unwrap();

        assert_eq!(report.items_scanned, 3);
        assert_eq!(report.documents_ingested, 2);
        assert_eq!(report.documents_empty, 1);
        assert!(report.chunks_written >= 3);
        assert_eq!(store.count().await.unwrap(), report.chunks_written);
        assert_eq!(report.checkpoint, Some(at(3)));

        let hit = &store
            .query(&embedder.embed_one("Short doc"), 1, &QueryFilter::source("test:docs"))
            .await
            .unwrap()[0];
        assert_eq!(hit.metadata["title"], MetadataValue::from("A.MD"));
        assert_eq!(hit.metadata["url"], MetadataValue::from("https://example.com/a.md"));
    }

    #[tokio::test]
    async fn test_checkpoint_filters_and_resync_replaces() {
        let chunker = chunker();
        let embedder = HashEmbedder::new(32);
        let store = InMemoryStore::new();
        let pipeline = Pipeline {
            chunker: &chunker,
            embedder: &embedder,
            store: &store,
            batch_size: 8,
            progress: &NoProgress,
        };
        let opts = SyncOptions::default();

        let first = Fixed(vec![item("a.md", 2, "alpha"), item("b.md", 4, "beta")]);
        let report = sync_connector(&first, &pipeline, &opts, None).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 2);

        let second = Fixed(vec![item("a.md", 2, "alpha"), item("b.md", 5, "beta two")]);
        let report = sync_connector(&second, &pipeline, &opts, report.checkpoint)
            .await
            .unwrap();
        assert_eq!(report.items_scanned, 1);
        assert_eq!(report.vectors_replaced, 1);
        assert_eq!(store.count().await.unwrap(), 2);
        assert_eq!(report.checkpoint, Some(at(5)));
    }

    #[tokio::test]
    async fn test_embedding_failure_is_pending_and_holds_checkpoint() {
        let chunker = chunker();
        let store = InMemoryStore::new();
        let pipeline = Pipeline {
            chunker: &chunker,
            embedder: &Flaky,
            store: &store,
            batch_size: 8,
            progress: &NoProgress,
        };
        let connector = Fixed(vec![
            item("a.md", 2, "fine"),
            item("b.md", 3, "FAIL here"),
            item("c.md", 4, "also fine"),
        ]);

        let report = sync_connector(&connector, &pipeline, &SyncOptions::default(), None)
            .await
            .unwrap();
        assert_eq!(report.documents_ingested, 2);
        assert_eq!(report.embeddings_pending, 1);
        assert_eq!(store.count().await.unwrap(), 2);
        assert_eq!(report.checkpoint, Some(at(3) - chrono::Duration::seconds(1)));
    }

    #[tokio::test]
    async fn test_since_until_limit_and_dry_run() {
        let chunker = chunker();
        let embedder = HashEmbedder::new(32);
        let store = InMemoryStore::new();
        let pipeline = Pipeline {
            chunker: &chunker,
            embedder: &embedder,
            store: &store,
            batch_size: 8,
            progress: &NoProgress,
        };
        let connector = Fixed((1..=6).map(|d| item(&format!("{}.md", d), d, "text")).collect());

        let opts = SyncOptions {
            since: Some("2024-05-02".into()),
            until: Some("2024-05-05".into()),
            limit: Some(3),
            ..SyncOptions::default()
        };
        let report = sync_connector(&connector, &pipeline, &opts, None).await.unwrap();
        assert_eq!(report.items_scanned, 3);
        assert_eq!(report.checkpoint, Some(at(4)));

        let dry = SyncOptions {
            dry_run: true,
            ..SyncOptions::default()
        };
        let before = store.count().await.unwrap();
        let report = sync_connector(&connector, &pipeline, &dry, None).await.unwrap();
        assert_eq!(report.items_scanned, 6);
        assert_eq!(report.documents_ingested, 0);
        assert_eq!(store.count().await.unwrap(), before);
    }

    #[test]
    fn test_parse_day_and_advance() {
        assert_eq!(parse_day("2024-05-03", false).unwrap(), Utc.with_ymd_and_hms(2024, 5, 3, 0, 0, 0).unwrap());
        assert_eq!(parse_day("2024-05-03", true).unwrap(), Utc.with_ymd_and_hms(2024, 5, 3, 23, 59, 59).unwrap());
        assert!(parse_day("05/03/2024", false).is_err());

        assert_eq!(advance_checkpoint(None, None), None);
        assert_eq!(advance_checkpoint(Some(at(5)), None), Some(at(5)));
        assert_eq!(
            advance_checkpoint(Some(at(5)), Some(at(3))),
            Some(at(3) - chrono::Duration::seconds(1))
        );
    }
}
