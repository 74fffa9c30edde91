//! Question answering over the index with persistent conversation memory.
//!
//! A session is a JSON file `{ "summary": ..., "turns": [...] }`. Each
//! `ask` retrieves context for the question, lets the [`MemoryManager`]
//! decide how much history to keep verbatim, asks the language model, and
//! writes the session back with the new turns appended.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Config;
use crate::embedding;
use crate::llm::{create_model, LanguageModel};
use crate::memory::{build_llm_messages, estimate_tokens, prompt_tokens, MemoryManager};
use crate::models::{ConversationSummary, ConversationTurn, MemoryStats};
use crate::search::search_chunks;
use crate::store::{QueryFilter, QueryMatch, SqliteStore};

/// Persisted conversation state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    #[serde(default)]
    pub summary: Option<ConversationSummary>,
    #[serde(default)]
    pub turns: Vec<ConversationTurn>,
}

impl Session {
    /// Read a session file. A missing file is an empty session.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(raw) => serde_json::from_str(&raw)
                .with_context(|| format!("Invalid session file: {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e).with_context(|| format!("Failed to read session: {}", path.display())),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write session: {}", path.display()))
    }
}

/// Result of one question.
#[derive(Debug, Clone)]
pub struct AskOutcome {
    pub answer: String,
    /// The session to persist.
    pub session: Session,
    pub prompt_tokens: usize,
    pub memory: MemoryStats,
}

/// Everything `answer` needs besides the question.
pub struct Responder<'a> {
    pub manager: &'a MemoryManager,
    pub llm: &'a dyn LanguageModel,
    pub system_prompt: &'a str,
    pub max_answer_tokens: usize,
}

/// Answer `question` given retrieved `context` and the prior `session`.
///
/// When the manager produced a fresh summary, the persisted history is
/// the summary plus the kept recent turns. Otherwise the full history and
/// the previous summary are carried forward unchanged, so nothing is lost
/// to a failed summarization.
pub async fn answer(
    responder: &Responder<'_>,
    session: &Session,
    question: &str,
    context: &[QueryMatch],
) -> Result<AskOutcome> {
    let context_text = format_context(context);
    let context_tokens = if context_text.is_empty() {
        0
    } else {
        estimate_tokens(&context_text)
    };

    let managed = responder
        .manager
        .manage(&session.turns, session.summary.as_ref(), context_tokens)
        .await;

    let messages = build_llm_messages(
        question,
        &context_text,
        &managed.recent_turns,
        managed.summary.as_ref(),
        responder.system_prompt,
    );
    let prompt_tokens = prompt_tokens(&messages);
    let budget = responder.manager.config().max_total_tokens;
    if prompt_tokens > budget {
        warn!(prompt_tokens, budget, "prompt exceeds memory.max_total_tokens");
    }

    let reply = responder
        .llm
        .chat(&messages, responder.max_answer_tokens)
        .await
        .context("language model call failed")?;
    let reply = reply.trim().to_string();

    let (summary, mut turns) = if managed.stats.summary_created {
        (managed.summary, managed.recent_turns)
    } else {
        (session.summary.clone(), session.turns.clone())
    };
    turns.push(ConversationTurn::user(question));
    turns.push(ConversationTurn::assistant(reply.clone()));

    Ok(AskOutcome {
        answer: reply,
        session: Session { summary, turns },
        prompt_tokens,
        memory: managed.stats,
    })
}

/// Numbered context blocks: `[1] title (url)` followed by the chunk text.
pub fn format_context(hits: &[QueryMatch]) -> String {
    hits.iter()
        .enumerate()
        .map(|(i, hit)| {
            let mut header = format!("[{}] {}", i + 1, hit.title());
            if let Some(url) = hit.metadata.get("url") {
                header.push_str(&format!(" ({})", url));
            }
            format!("{}\n{}", header, hit.content.trim())
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub async fn run_ask(
    config: &Config,
    question: &str,
    session_path: &Path,
    source: Option<String>,
) -> Result<()> {
    if question.trim().is_empty() {
        bail!("question must not be empty");
    }
    if config.llm.provider == "disabled" {
        bail!("ask needs a language model. Set [llm] provider in config.");
    }

    let session = Session::load(session_path)?;

    let context = if config.embedding.is_enabled() {
        let embedder = embedding::create_embedder(&config.embedding)?;
        let store = SqliteStore::connect(config).await?;
        let filter = QueryFilter {
            source,
            ..QueryFilter::default()
        };
        let hits = search_chunks(
            embedder.as_ref(),
            &store,
            question,
            &filter,
            config.retrieval.top_k,
        )
        .await?;
        store.close().await;
        hits
    } else {
        warn!("no embedding provider configured; answering without retrieved context");
        Vec::new()
    };

    let llm: Arc<dyn LanguageModel> = Arc::from(create_model(&config.llm)?);
    let manager = MemoryManager::new(config.memory.clone(), llm.clone())?;
    let responder = Responder {
        manager: &manager,
        llm: llm.as_ref(),
        system_prompt: &config.llm.system_prompt,
        max_answer_tokens: config.llm.max_tokens,
    };

    let outcome = answer(&responder, &session, question, &context).await?;
    info!(
        prompt_tokens = outcome.prompt_tokens,
        summarized = outcome.memory.summarized_count,
        kept_recent = outcome.memory.kept_recent,
        "answered"
    );

    println!("{}", outcome.answer);
    if !context.is_empty() {
        println!();
        println!("Sources:");
        for (i, hit) in context.iter().enumerate() {
            match hit.metadata.get("url") {
                Some(url) => println!("  [{}] {} ({})", i + 1, hit.title(), url),
                None => println!("  [{}] {}", i + 1, hit.title()),
            }
        }
    }

    outcome.session.save(session_path)?;
    Ok(())
}
