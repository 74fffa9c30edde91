//! Index statistics.
//!
//! Vector and document counts per source, plus when each source last
//! synced. Used by `docsift stats`.

use anyhow::Result;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;

/// Per-source breakdown.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceStats {
    pub source: String,
    pub documents: i64,
    pub vectors: i64,
    /// Unix seconds of the last checkpoint write.
    pub last_sync_ts: Option<i64>,
    /// Unix seconds of the newest item ingested.
    pub cursor_ts: Option<i64>,
}

/// Counts grouped by source, largest first. Sources that have a
/// checkpoint but no vectors are listed too.
pub async fn source_stats(pool: &SqlitePool) -> Result<Vec<SourceStats>> {
    let rows = sqlx::query(
        r#"
        SELECT source,
               COUNT(DISTINCT source_id) AS doc_count,
               COUNT(*) AS vector_count
        FROM chunk_vectors
        GROUP BY source
        ORDER BY vector_count DESC, source ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    let checkpoints = sqlx::query("SELECT source, cursor, updated_at FROM checkpoints ORDER BY source")
        .fetch_all(pool)
        .await?;
    let checkpoint_for = |source: &str| {
        checkpoints
            .iter()
            .find(|cp| cp.get::<String, _>("source") == source)
            .map(|cp| {
                let cursor: String = cp.get("cursor");
                (cp.get::<i64, _>("updated_at"), cursor.parse::<i64>().ok())
            })
    };

    let mut stats: Vec<SourceStats> = rows
        .iter()
        .map(|row| {
            let source: String = row.get("source");
            let cp = checkpoint_for(&source);
            SourceStats {
                documents: row.get("doc_count"),
                vectors: row.get("vector_count"),
                last_sync_ts: cp.map(|(ts, _)| ts),
                cursor_ts: cp.and_then(|(_, c)| c),
                source,
            }
        })
        .collect();

    for cp in &checkpoints {
        let source: String = cp.get("source");
        if stats.iter().any(|s| s.source == source) {
            continue;
        }
        let cursor: String = cp.get("cursor");
        stats.push(SourceStats {
            source,
            documents: 0,
            vectors: 0,
            last_sync_ts: Some(cp.get("updated_at")),
            cursor_ts: cursor.parse().ok(),
        });
    }

    Ok(stats)
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    let total_vectors: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunk_vectors")
        .fetch_one(&pool)
        .await?;
    let total_docs: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM (SELECT DISTINCT source, source_id FROM chunk_vectors)")
            .fetch_one(&pool)
            .await?;
    let models = sqlx::query("SELECT model, dims, COUNT(*) AS n FROM chunk_vectors GROUP BY model, dims")
        .fetch_all(&pool)
        .await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("docsift index stats");
    println!("==================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Documents:   {}", total_docs);
    println!("  Vectors:     {}", total_vectors);
    for row in &models {
        let model: String = row.get("model");
        let dims: i64 = row.get("dims");
        let n: i64 = row.get("n");
        println!("  Model:       {} ({} dims, {} vectors)", model, dims, n);
    }

    let stats = source_stats(&pool).await?;
    if !stats.is_empty() {
        println!();
        println!("  By source:");
        println!(
            "  {:<20} {:>6} {:>8}   {:<16} {}",
            "SOURCE", "DOCS", "VECTORS", "LAST SYNC", "NEWEST ITEM"
        );
        println!("  {}", "-".repeat(72));

        for s in &stats {
            let synced = match s.last_sync_ts {
                Some(ts) => format_ts_relative(ts),
                None => "never".to_string(),
            };
            let newest = s.cursor_ts.map(format_ts_iso).unwrap_or_else(|| "-".to_string());
            println!(
                "  {:<20} {:>6} {:>8}   {:<16} {}",
                s.source, s.documents, s.vectors, synced, newest
            );
        }
    }

    println!();

    pool.close().await;
    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// "3 hours ago", falling back to a date past 30 days.
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
