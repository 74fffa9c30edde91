//! # docsift CLI
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docsift init` | Create the SQLite database and run schema migrations |
//! | `docsift sync <connector>` | Ingest `docs`, `wiki`, `issues`, `local` or `all` |
//! | `docsift search "<query>"` | Semantic search over indexed chunks |
//! | `docsift ask "<question>" --session FILE` | Answer with retrieved context and conversation memory |
//! | `docsift stats` | Vector and document counts per source |
//!
//! Logs go to stderr (`RUST_LOG` or `--verbose`); results go to stdout.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use docsift::progress::ProgressMode;
use docsift::{ask, config, ingest, migrate, search, stats};

/// docsift: index a GitHub project's docs, issues and wiki, then search
/// and ask questions about them.
#[derive(Parser)]
#[command(name = "docsift", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docsift.toml")]
    config: PathBuf,

    /// Debug-level logging for docsift (overridden by `RUST_LOG`).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Ingest from a connector.
    ///
    /// Incremental by default: only items updated since the last sync of
    /// that source are processed.
    Sync {
        /// `docs`, `wiki`, `issues`, `local`, or `all`.
        connector: String,

        /// Ignore the checkpoint and reingest everything.
        #[arg(long)]
        full: bool,

        /// Show item and chunk counts without writing anything.
        #[arg(long)]
        dry_run: bool,

        /// Only items updated on or after this date (YYYY-MM-DD).
        #[arg(long)]
        since: Option<String>,

        /// Only items updated on or before this date (YYYY-MM-DD).
        #[arg(long)]
        until: Option<String>,

        /// Maximum number of items per connector.
        #[arg(long)]
        limit: Option<usize>,

        /// Progress on stderr: `off`, `human` or `json`. Defaults to human on a TTY.
        #[arg(long)]
        progress: Option<String>,
    },

    /// Search indexed chunks by meaning.
    Search {
        query: String,

        /// Only this source (e.g. `github:issues`).
        #[arg(long)]
        source: Option<String>,

        /// Number of results (defaults to `retrieval.top_k`).
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Ask a question, keeping the conversation in a session file.
    Ask {
        question: String,

        /// Session JSON file; created if missing.
        #[arg(long)]
        session: PathBuf,

        /// Only retrieve context from this source.
        #[arg(long)]
        source: Option<String>,
    },

    /// Show index statistics.
    Stats,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "docsift=debug" } else { "docsift=info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Sync {
            connector,
            full,
            dry_run,
            since,
            until,
            limit,
            progress,
        } => {
            let progress = match progress {
                Some(mode) => ProgressMode::parse(&mode)?,
                None => ProgressMode::default_for_tty(),
            };
            let opts = ingest::SyncOptions {
                full,
                dry_run,
                since,
                until,
                limit,
                progress,
            };
            ingest::run_sync(&cfg, &connector, opts).await?;
        }
        Commands::Search {
            query,
            source,
            limit,
        } => {
            search::run_search(&cfg, &query, source, limit).await?;
        }
        Commands::Ask {
            question,
            session,
            source,
        } => {
            ask::run_ask(&cfg, &question, &session, source).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
    }

    Ok(())
}
