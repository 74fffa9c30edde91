//! Conversation memory management.
//!
//! Keeps a conversation inside a token budget. Given the full history, the
//! [`MemoryManager`] decides whether the older turns must be condensed into
//! a [`ConversationSummary`]. The most recent `recent_window_size` turns are
//! always kept verbatim. [`build_llm_messages`] then lays out the final prompt:
//!
//! ```text
//! system prompt → summary note → context note → recent turns → question
//! ```
//!
//! The manager keeps no per-conversation state: everything it needs is
//! passed in and everything it produces is returned, so one instance can
//! serve any number of conversations.
//!
//! Summarization failures never escape [`MemoryManager::manage`]. When the
//! language model cannot produce a summary, the result degrades to the
//! recent window alone.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::ConfigError;
use crate::llm::LanguageModel;
use crate::models::{ConversationSummary, ConversationTurn, MemoryStats, Role};

/// Approximate characters per token.
const CHARS_PER_TOKEN: usize = 4;

/// Estimate the token cost of `text` as `max(1, ceil(chars / 4))`.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN).max(1)
}

/// Estimated token cost of an assembled message list.
pub fn prompt_tokens(messages: &[ConversationTurn]) -> usize {
    messages.iter().map(|m| estimate_tokens(&m.content)).sum()
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_max_total_tokens")]
    pub max_total_tokens: usize,
    #[serde(default = "default_max_history_tokens")]
    pub max_history_tokens: usize,
    #[serde(default = "default_recent_window_size")]
    pub recent_window_size: usize,
    #[serde(default = "default_trigger_ratio")]
    pub summarization_trigger_ratio: f64,
    #[serde(default = "default_summary_max_tokens")]
    pub summary_max_tokens: usize,
}

fn default_max_total_tokens() -> usize {
    8000
}
fn default_max_history_tokens() -> usize {
    3000
}
fn default_recent_window_size() -> usize {
    6
}
fn default_trigger_ratio() -> f64 {
    0.75
}
fn default_summary_max_tokens() -> usize {
    400
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_total_tokens: default_max_total_tokens(),
            max_history_tokens: default_max_history_tokens(),
            recent_window_size: default_recent_window_size(),
            summarization_trigger_ratio: default_trigger_ratio(),
            summary_max_tokens: default_summary_max_tokens(),
        }
    }
}

impl MemoryConfig {
    pub fn new(
        max_total_tokens: usize,
        max_history_tokens: usize,
        recent_window_size: usize,
        summarization_trigger_ratio: f64,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            max_total_tokens,
            max_history_tokens,
            recent_window_size,
            summarization_trigger_ratio,
            summary_max_tokens: default_summary_max_tokens(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("max_total_tokens", self.max_total_tokens),
            ("max_history_tokens", self.max_history_tokens),
            ("recent_window_size", self.recent_window_size),
            ("summary_max_tokens", self.summary_max_tokens),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroBudget(name));
            }
        }
        if self.max_history_tokens > self.max_total_tokens {
            return Err(ConfigError::HistoryExceedsTotal {
                history: self.max_history_tokens,
                total: self.max_total_tokens,
            });
        }
        let ratio = self.summarization_trigger_ratio;
        if !(ratio > 0.0 && ratio <= 1.0) {
            return Err(ConfigError::InvalidTriggerRatio(ratio));
        }
        Ok(())
    }
}

/// Outcome of one [`MemoryManager::manage`] call.
#[derive(Debug, Clone, PartialEq)]
pub struct ManagedMemory {
    pub summary: Option<ConversationSummary>,
    pub recent_turns: Vec<ConversationTurn>,
    pub stats: MemoryStats,
}

/// Structured facts pulled out of the summarized material.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct SummaryInsights {
    #[serde(default, alias = "topics_covered")]
    pub topics: Vec<String>,
    #[serde(default)]
    pub key_questions: Vec<String>,
    #[serde(default, alias = "important_decisions")]
    pub decisions: Vec<String>,
}

/// Parse the extraction reply. Tolerates prose or code fences around the
/// JSON object; anything else yields `None`.
pub fn parse_insights(raw: &str) -> Option<SummaryInsights> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end < start {
        return None;
    }
    serde_json::from_str(&raw[start..=end]).ok()
}

pub struct MemoryManager {
    config: MemoryConfig,
    llm: Arc<dyn LanguageModel>,
}

impl MemoryManager {
    pub fn new(config: MemoryConfig, llm: Arc<dyn LanguageModel>) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config, llm })
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Split `history` into an optional summary and a verbatim recent window.
    ///
    /// `context_tokens` is what retrieved knowledge-base context already
    /// consumes out of `max_history_tokens`.
    pub async fn manage(
        &self,
        history: &[ConversationTurn],
        existing_summary: Option<&ConversationSummary>,
        context_tokens: usize,
    ) -> ManagedMemory {
        let total_tokens: usize = history.iter().map(|t| estimate_tokens(&t.content)).sum();
        let available = self.config.max_history_tokens.saturating_sub(context_tokens);
        let threshold = available as f64 * self.config.summarization_trigger_ratio;
        let window = self.config.recent_window_size;

        let mut stats = MemoryStats {
            total_messages: history.len(),
            total_tokens,
            trigger_threshold: threshold.floor() as usize,
            ..Default::default()
        };

        if history.len() <= window || total_tokens as f64 <= threshold {
            stats.kept_recent = history.len();
            return ManagedMemory {
                summary: existing_summary.cloned(),
                recent_turns: history.to_vec(),
                stats,
            };
        }

        let (older, recent) = history.split_at(history.len() - window);
        stats.kept_recent = recent.len();

        match self.summarize(older, existing_summary).await {
            Ok(summary) => {
                stats.summarized_count = older.len();
                stats.summary_created = true;
                info!(
                    summarized = older.len(),
                    kept = recent.len(),
                    total_tokens,
                    summary_tokens = summary.token_count,
                    "conversation history summarized"
                );
                ManagedMemory {
                    summary: Some(summary),
                    recent_turns: recent.to_vec(),
                    stats,
                }
            }
            Err(e) => {
                warn!(
                    error = %e,
                    dropped = older.len(),
                    "summarization failed; continuing with recent turns only"
                );
                ManagedMemory {
                    summary: None,
                    recent_turns: recent.to_vec(),
                    stats,
                }
            }
        }
    }

    async fn summarize(
        &self,
        older: &[ConversationTurn],
        existing: Option<&ConversationSummary>,
    ) -> anyhow::Result<ConversationSummary> {
        let material = summarization_material(older, existing);
        let prompt = format!(
            "Summarize the following conversation between a user and an assistant. \
             Keep every fact, question and decision that later turns may rely on. \
             If a previous summary is given, merge it into the new summary.\n\n{}",
            material
        );

        let content = self
            .llm
            .generate(&prompt, self.config.summary_max_tokens)
            .await?;
        let content = content.trim();
        if content.is_empty() {
            anyhow::bail!("language model returned an empty summary");
        }

        let insights = self.extract_insights(&material).await.unwrap_or_default();

        Ok(ConversationSummary {
            content: content.to_string(),
            topics_covered: insights.topics.into_iter().collect(),
            key_questions: insights.key_questions,
            important_decisions: insights.decisions,
            token_count: estimate_tokens(content),
            source_turn_count: older.len(),
        })
    }

    async fn extract_insights(&self, material: &str) -> Option<SummaryInsights> {
        let prompt = format!(
            "Extract structured notes from the conversation below. Reply with JSON only, \
             shaped as {{\"topics\": [string], \"key_questions\": [string], \"decisions\": [string]}}.\n\n{}",
            material
        );
        match self.llm.generate(&prompt, self.config.summary_max_tokens).await {
            Ok(raw) => {
                let parsed = parse_insights(&raw);
                if parsed.is_none() {
                    debug!("summary insight extraction returned unparseable output");
                }
                parsed
            }
            Err(e) => {
                debug!(error = %e, "summary insight extraction failed");
                None
            }
        }
    }
}

fn role_label(role: Role) -> &'static str {
    match role {
        Role::System => "System",
        Role::User => "User",
        Role::Assistant => "Assistant",
    }
}

fn summarization_material(
    older: &[ConversationTurn],
    existing: Option<&ConversationSummary>,
) -> String {
    let mut out = String::new();
    if let Some(prev) = existing {
        out.push_str("Previous summary:\n");
        out.push_str(prev.content.trim());
        out.push_str("\n\n");
    }
    out.push_str("Conversation:\n");
    for turn in older {
        out.push_str(role_label(turn.role));
        out.push_str(": ");
        out.push_str(turn.content.trim());
        out.push('\n');
    }
    out
}

/// Assemble the ordered message list for the language model.
///
/// Order: system prompt, summary note, context note, recent turns (roles
/// kept), then `question` as the final user turn. Blank system prompts and
/// blank context are left out.
pub fn build_llm_messages(
    question: &str,
    context: &str,
    recent: &[ConversationTurn],
    summary: Option<&ConversationSummary>,
    system_prompt: &str,
) -> Vec<ConversationTurn> {
    let mut messages = Vec::with_capacity(recent.len() + 4);

    if !system_prompt.trim().is_empty() {
        messages.push(ConversationTurn::system(system_prompt));
    }

    if let Some(summary) = summary {
        let mut note = format!("Summary of the earlier conversation:\n{}", summary.content);
        if !summary.topics_covered.is_empty() {
            let topics: Vec<&str> = summary.topics_covered.iter().map(String::as_str).collect();
            note.push_str(&format!("\nTopics covered: {}", topics.join(", ")));
        }
        if !summary.important_decisions.is_empty() {
            note.push_str(&format!(
                "\nDecisions so far: {}",
                summary.important_decisions.join("; ")
            ));
        }
        messages.push(ConversationTurn::system(note));
    }

    if !context.trim().is_empty() {
        messages.push(ConversationTurn::system(format!(
            "Relevant context from the knowledge base:\n{}",
            context.trim()
        )));
    }

    messages.extend(recent.iter().cloned());
    messages.push(ConversationTurn::user(question));
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replies from a script, recording every prompt it receives.
    struct ScriptedModel {
        replies: Mutex<VecDeque<Result<String, String>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedModel {
        fn new(replies: Vec<Result<&str, &str>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(
                    replies
                        .into_iter()
                        .map(|r| r.map(str::to_string).map_err(str::to_string))
                        .collect(),
                ),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        fn model_name(&self) -> &str {
            "scripted"
        }

        async fn generate(&self, prompt: &str, _max_tokens: usize) -> anyhow::Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            match self.replies.lock().unwrap().pop_front() {
                Some(Ok(text)) => Ok(text),
                Some(Err(e)) => Err(anyhow::anyhow!(e)),
                None => Err(anyhow::anyhow!("script exhausted")),
            }
        }
    }

    /// `n` alternating user/assistant turns of exactly `tokens` tokens each.
    fn history(n: usize, tokens: usize) -> Vec<ConversationTurn> {
        (0..n)
            .map(|i| {
                let body = format!("{:0>width$}", i, width = tokens * 4);
                if i % 2 == 0 {
                    ConversationTurn::user(body)
                } else {
                    ConversationTurn::assistant(body)
                }
            })
            .collect()
    }

    fn manager(max_history: usize, window: usize, llm: Arc<ScriptedModel>) -> MemoryManager {
        let config = MemoryConfig::new(8000, max_history, window, 0.75).unwrap();
        MemoryManager::new(config, llm).unwrap()
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 1);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
        assert_eq!(estimate_tokens(&"x".repeat(400)), 100);
        assert_eq!(estimate_tokens("éééé"), 1);
        assert_eq!(estimate_tokens("hello world"), estimate_tokens("hello world"));
    }

    #[test]
    fn test_config_validation() {
        assert!(matches!(
            MemoryConfig::new(8000, 3000, 6, 0.0),
            Err(ConfigError::InvalidTriggerRatio(_))
        ));
        assert!(matches!(
            MemoryConfig::new(8000, 3000, 6, 1.01),
            Err(ConfigError::InvalidTriggerRatio(_))
        ));
        assert!(MemoryConfig::new(8000, 3000, 6, 1.0).is_ok());
        assert_eq!(
            MemoryConfig::new(8000, 3000, 0, 0.5),
            Err(ConfigError::ZeroBudget("recent_window_size"))
        );
        assert_eq!(
            MemoryConfig::new(1000, 3000, 6, 0.5),
            Err(ConfigError::HistoryExceedsTotal {
                history: 3000,
                total: 1000
            })
        );
    }

    #[tokio::test]
    async fn test_short_history_kept_whole_regardless_of_tokens() {
        let llm = ScriptedModel::new(vec![]);
        let mgr = manager(100, 6, llm.clone());
        let turns = history(6, 500);
        let existing = ConversationSummary {
            content: "earlier".into(),
            ..Default::default()
        };

        let out = mgr.manage(&turns, Some(&existing), 0).await;

        assert_eq!(out.recent_turns, turns);
        assert_eq!(out.summary, Some(existing));
        assert!(!out.stats.summary_created);
        assert_eq!(out.stats.kept_recent, 6);
        assert_eq!(out.stats.summarized_count, 0);
        assert_eq!(llm.calls(), 0);
    }

    #[tokio::test]
    async fn test_under_threshold_no_summary() {
        let llm = ScriptedModel::new(vec![]);
        let mgr = manager(1000, 6, llm.clone());
        let turns = history(10, 15);

        let out = mgr.manage(&turns, None, 0).await;

        assert_eq!(out.recent_turns.len(), 10);
        assert!(out.summary.is_none());
        assert_eq!(out.stats.total_tokens, 150);
        assert_eq!(out.stats.trigger_threshold, 750);
        assert_eq!(llm.calls(), 0);
    }

    #[tokio::test]
    async fn test_over_threshold_summarizes_older_turns() {
        let llm = ScriptedModel::new(vec![
            Ok("The user asked about setup; the assistant explained cargo."),
            Ok(r#"{"topics": ["setup", "cargo"], "key_questions": ["How to install?"], "decisions": ["Use cargo"]}"#),
        ]);
        let mgr = manager(100, 6, llm.clone());
        let turns = history(10, 15);

        let out = mgr.manage(&turns, None, 0).await;

        assert_eq!(out.stats.total_messages, 10);
        assert_eq!(out.stats.total_tokens, 150);
        assert_eq!(out.stats.trigger_threshold, 75);
        assert_eq!(out.stats.kept_recent, 6);
        assert_eq!(out.stats.summarized_count, 4);
        assert!(out.stats.summary_created);
        assert_eq!(out.recent_turns, turns[4..].to_vec());

        let summary = out.summary.unwrap();
        assert_eq!(summary.source_turn_count, 4);
        assert_eq!(summary.token_count, estimate_tokens(&summary.content));
        assert!(summary.topics_covered.contains("cargo"));
        assert_eq!(summary.key_questions, vec!["How to install?".to_string()]);
        assert_eq!(summary.important_decisions, vec!["Use cargo".to_string()]);
        assert_eq!(llm.calls(), 2);
    }

    #[tokio::test]
    async fn test_context_usage_lowers_threshold() {
        let llm = ScriptedModel::new(vec![Ok("summary"), Err("no json today")]);
        let mgr = manager(1000, 6, llm.clone());
        let turns = history(10, 15);

        // Context alone exceeds the history budget: the threshold floors at 0.
        let out = mgr.manage(&turns, None, 5000).await;

        assert_eq!(out.stats.trigger_threshold, 0);
        assert!(out.stats.summary_created);
        assert_eq!(out.recent_turns.len(), 6);
    }

    #[tokio::test]
    async fn test_summary_failure_falls_back_to_recent_window() {
        let llm = ScriptedModel::new(vec![Err("timeout")]);
        let mgr = manager(100, 6, llm.clone());
        let turns = history(10, 15);

        let out = mgr.manage(&turns, None, 0).await;

        assert!(out.summary.is_none());
        assert_eq!(out.recent_turns, turns[4..].to_vec());
        assert!(!out.stats.summary_created);
        assert_eq!(out.stats.summarized_count, 0);
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn test_blank_summary_counts_as_failure() {
        let llm = ScriptedModel::new(vec![Ok("   \n")]);
        let mgr = manager(100, 6, llm);
        let out = mgr.manage(&history(10, 15), None, 0).await;
        assert!(out.summary.is_none());
        assert_eq!(out.recent_turns.len(), 6);
    }

    #[tokio::test]
    async fn test_malformed_extraction_defaults_to_empty_fields() {
        let llm = ScriptedModel::new(vec![Ok("A summary."), Ok("topics: setup, cargo")]);
        let mgr = manager(100, 6, llm);
        let out = mgr.manage(&history(10, 15), None, 0).await;

        let summary = out.summary.unwrap();
        assert_eq!(summary.content, "A summary.");
        assert!(summary.topics_covered.is_empty());
        assert!(summary.key_questions.is_empty());
        assert!(summary.important_decisions.is_empty());
    }

    #[tokio::test]
    async fn test_existing_summary_is_folded_into_prompt() {
        let llm = ScriptedModel::new(vec![Ok("merged summary"), Err("skip")]);
        let mgr = manager(100, 6, llm.clone());
        let existing = ConversationSummary {
            content: "The user is migrating from v1 to v2.".into(),
            source_turn_count: 8,
            ..Default::default()
        };

        let out = mgr.manage(&history(10, 15), Some(&existing), 0).await;

        let prompts = llm.prompts.lock().unwrap();
        assert!(prompts[0].contains("The user is migrating from v1 to v2."));
        assert!(prompts[0].contains("User: "));
        assert_eq!(out.summary.unwrap().content, "merged summary");
    }

    #[test]
    fn test_parse_insights() {
        let fenced = "```json\n{\"topics\": [\"a\"], \"decisions\": [\"b\"]}\n```";
        let parsed = parse_insights(fenced).unwrap();
        assert_eq!(parsed.topics, vec!["a".to_string()]);
        assert_eq!(parsed.decisions, vec!["b".to_string()]);
        assert!(parsed.key_questions.is_empty());

        assert!(parse_insights("no json here").is_none());
        assert!(parse_insights("} backwards {").is_none());
        assert!(parse_insights("{\"topics\": [1, 2]}").is_none());
    }

    #[test]
    fn test_build_llm_messages_order() {
        let recent = vec![
            ConversationTurn::user("first question"),
            ConversationTurn::assistant("first answer"),
        ];
        let summary = ConversationSummary {
            content: "Earlier we discussed installation.".into(),
            topics_covered: ["install".to_string()].into_iter().collect(),
            ..Default::default()
        };

        let msgs = build_llm_messages(
            "next question",
            "Doc: run cargo build",
            &recent,
            Some(&summary),
            "You are helpful.",
        );

        assert_eq!(msgs.len(), 6);
        assert_eq!(msgs[0], ConversationTurn::system("You are helpful."));
        assert_eq!(msgs[1].role, Role::System);
        assert!(msgs[1].content.contains("Earlier we discussed installation."));
        assert!(msgs[1].content.contains("Topics covered: install"));
        assert_eq!(msgs[2].role, Role::System);
        assert!(msgs[2].content.contains("run cargo build"));
        assert_eq!(msgs[3..5], recent[..]);
        assert_eq!(msgs[5], ConversationTurn::user("next question"));
    }

    #[test]
    fn test_build_llm_messages_skips_empty_parts() {
        let msgs = build_llm_messages("q", "   ", &[], None, "sys");
        assert_eq!(
            msgs,
            vec![ConversationTurn::system("sys"), ConversationTurn::user("q")]
        );
        assert_eq!(prompt_tokens(&msgs), 2);
    }
}
