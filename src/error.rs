//! Typed errors for the two core components.
//!
//! Configuration problems and malformed chunker input are reported with
//! dedicated types so callers can tell them apart from I/O failures, which
//! travel as [`anyhow::Error`] everywhere else in the crate.

use thiserror::Error;

/// Invalid chunking or memory-manager parameters.
///
/// Always raised at construction (or config load), never mid-run.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("chunk_size must be > 0")]
    ZeroChunkSize,

    #[error("chunk_overlap ({overlap}) must be smaller than chunk_size ({size})")]
    OverlapTooLarge { overlap: usize, size: usize },

    #[error("min_chunk_size ({min}) must not exceed chunk_size ({size})")]
    MinChunkTooLarge { min: usize, size: usize },

    #[error("memory.{0} must be > 0")]
    ZeroBudget(&'static str),

    #[error("memory.max_history_tokens ({history}) must not exceed memory.max_total_tokens ({total})")]
    HistoryExceedsTotal { history: usize, total: usize },

    #[error("memory.summarization_trigger_ratio must be in (0, 1], got {0}")]
    InvalidTriggerRatio(f64),
}

/// Input the chunker refuses before emitting any chunk.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InputError {
    #[error("input is not valid UTF-8 (first invalid byte at offset {0})")]
    NotUtf8(usize),

    #[error("input looks binary (NUL byte at offset {0})")]
    Binary(usize),
}
