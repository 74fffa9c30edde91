//! Sync progress reporting.
//!
//! Progress goes to **stderr** (human-readable or one JSON object per line)
//! so stdout stays parseable for scripts.

use std::io::Write;

/// A single progress event for sync.
#[derive(Clone, Debug, PartialEq)]
pub enum SyncProgressEvent {
    /// The connector is scanning its source; no total yet.
    Discovering { connector: String },
    /// `n` of `total` items processed.
    Ingesting {
        connector: String,
        n: u64,
        total: u64,
    },
    /// A document was left pending (embedding failed).
    Pending {
        connector: String,
        source_id: String,
    },
    /// The connector finished.
    Done {
        connector: String,
        documents: u64,
        chunks: u64,
    },
}

/// Receives progress events from the ingest pipeline.
pub trait SyncProgressReporter: Send + Sync {
    fn report(&self, event: SyncProgressEvent);
}

/// `sync github:docs  ingesting  1,234 / 5,000 items`
pub struct StderrProgress;

impl SyncProgressReporter for StderrProgress {
    fn report(&self, event: SyncProgressEvent) {
        let line = match &event {
            SyncProgressEvent::Discovering { connector } => {
                format!("sync {}  discovering...\n", connector)
            }
            SyncProgressEvent::Ingesting {
                connector,
                n,
                total,
            } => format!(
                "sync {}  ingesting  {} / {} items\n",
                connector,
                format_number(*n),
                format_number(*total)
            ),
            SyncProgressEvent::Pending {
                connector,
                source_id,
            } => format!("sync {}  pending  {}\n", connector, source_id),
            SyncProgressEvent::Done {
                connector,
                documents,
                chunks,
            } => format!(
                "sync {}  done  {} documents, {} chunks\n",
                connector,
                format_number(*documents),
                format_number(*chunks)
            ),
        };
        let mut err = std::io::stderr().lock();
        let _ = err.write_all(line.as_bytes());
        let _ = err.flush();
    }
}

/// One JSON object per line on stderr.
pub struct JsonProgress;

impl JsonProgress {
    fn to_json(event: &SyncProgressEvent) -> serde_json::Value {
        match event {
            SyncProgressEvent::Discovering { connector } => serde_json::json!({
                "event": "progress",
                "connector": connector,
                "phase": "discovering"
            }),
            SyncProgressEvent::Ingesting {
                connector,
                n,
                total,
            } => serde_json::json!({
                "event": "progress",
                "connector": connector,
                "phase": "ingesting",
                "n": n,
                "total": total
            }),
            SyncProgressEvent::Pending {
                connector,
                source_id,
            } => serde_json::json!({
                "event": "pending",
                "connector": connector,
                "source_id": source_id
            }),
            SyncProgressEvent::Done {
                connector,
                documents,
                chunks,
            } => serde_json::json!({
                "event": "done",
                "connector": connector,
                "documents": documents,
                "chunks": chunks
            }),
        }
    }
}

impl SyncProgressReporter for JsonProgress {
    fn report(&self, event: SyncProgressEvent) {
        if let Ok(line) = serde_json::to_string(&Self::to_json(&event)) {
            let mut err = std::io::stderr().lock();
            let _ = writeln!(err, "{}", line);
            let _ = err.flush();
        }
    }
}

pub struct NoProgress;

impl SyncProgressReporter for NoProgress {
    fn report(&self, _event: SyncProgressEvent) {}
}

pub(crate) fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result
}

/// `--progress off|human|json`.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ProgressMode {
    #[default]
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn parse(s: &str) -> anyhow::Result<Self> {
        match s {
            "off" => Ok(ProgressMode::Off),
            "human" => Ok(ProgressMode::Human),
            "json" => Ok(ProgressMode::Json),
            other => anyhow::bail!("Unknown progress mode '{}'. Use off, human, or json.", other),
        }
    }

    pub fn reporter(&self) -> Box<dyn SyncProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
