//! Core data models used throughout docsift.
//!
//! These types represent the source items, chunks, conversation turns and
//! summaries that flow through the ingestion and memory pipelines. All of
//! them serialize to plain JSON so callers can persist them however they
//! like.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Raw item produced by a connector before chunking.
#[derive(Debug, Clone)]
pub struct SourceItem {
    /// Connector label, e.g. `"github:docs"` or `"github:issues"`.
    pub source: String,
    /// Stable identifier within the source (file path, issue number, page name).
    pub source_id: String,
    pub source_url: Option<String>,
    pub title: Option<String>,
    pub author: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// E.g. `"text/markdown"` or `"github/issue"`.
    pub content_type: String,
    pub body: String,
    /// Connector-specific attribution copied onto every chunk.
    pub metadata: ChunkMetadata,
}

/// A scalar metadata value attached to chunks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::Bool(b) => write!(f, "{}", b),
            MetadataValue::Integer(i) => write!(f, "{}", i),
            MetadataValue::Float(x) => write!(f, "{}", x),
            MetadataValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(s: &str) -> Self {
        MetadataValue::Text(s.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(s: String) -> Self {
        MetadataValue::Text(s)
    }
}

impl From<i64> for MetadataValue {
    fn from(i: i64) -> Self {
        MetadataValue::Integer(i)
    }
}

impl From<bool> for MetadataValue {
    fn from(b: bool) -> Self {
        MetadataValue::Bool(b)
    }
}

impl From<f64> for MetadataValue {
    fn from(x: f64) -> Self {
        MetadataValue::Float(x)
    }
}

/// Key/value attribution carried by every chunk of a document.
pub type ChunkMetadata = BTreeMap<String, MetadataValue>;

/// A bounded fragment of a document, ready for embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextChunk {
    pub id: String,
    pub content: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub metadata: ChunkMetadata,
    pub created_at: DateTime<Utc>,
    /// SHA-256 of `content`.
    pub hash: String,
}

/// Who produced a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One message of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

impl ConversationTurn {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Condensed replacement for the older part of a conversation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub content: String,
    #[serde(default)]
    pub topics_covered: BTreeSet<String>,
    #[serde(default)]
    pub key_questions: Vec<String>,
    #[serde(default)]
    pub important_decisions: Vec<String>,
    pub token_count: usize,
    pub source_turn_count: usize,
}

/// Bookkeeping returned by every `MemoryManager::manage` call.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MemoryStats {
    pub total_messages: usize,
    pub total_tokens: usize,
    pub kept_recent: usize,
    pub summarized_count: usize,
    pub summary_created: bool,
    pub trigger_threshold: usize,
}
