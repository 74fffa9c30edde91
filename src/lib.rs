//! # docsift
//!
//! Ingest a GitHub project's markdown docs, issues and wiki into a local
//! vector index, then search it or hold a memory-managed conversation
//! about it.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────┐   ┌─────────┐   ┌──────────┐   ┌─────────────┐
//! │ Connectors         │──▶│ Chunker │──▶│ Embedder │──▶│ VectorStore │
//! │ docs/wiki/issues/fs│   └─────────┘   └──────────┘   │ SQLite      │
//! └────────────────────┘                                └──────┬──────┘
//!                                                              │
//!                       ┌──────────────────────────────────────┤
//!                       ▼                                      ▼
//!                 ┌──────────┐                 ┌──────────────────────────┐
//!                 │  search  │                 │ ask: MemoryManager + LLM │
//!                 └──────────┘                 └──────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docsift init                  # create database
//! docsift sync all              # docs, wiki and issues
//! docsift search "rate limits"
//! docsift ask "How do I configure retries?" --session ./session.json
//! docsift stats
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Typed configuration and input errors |
//! | [`models`] | Core data types |
//! | [`chunk`] | Structure-aware text chunking |
//! | [`memory`] | Conversation memory management |
//! | [`llm`] | Language model abstraction |
//! | [`embedding`] | Embedding provider abstraction |
//! | `retry` | Shared HTTP retry and backoff |
//! | [`store`] | Vector store trait, SQLite and in-memory backends |
//! | [`traits`] | Connector trait and registry |
//! | [`connector_git`] | Repository docs and wiki via git |
//! | [`connector_github`] | GitHub issues via the REST API |
//! | [`connector_fs`] | Local directory connector |
//! | [`ingest`] | Sync pipeline and checkpoints |
//! | [`progress`] | Sync progress reporting |
//! | [`search`] | Semantic search |
//! | [`ask`] | Question answering with sessions |
//! | [`stats`] | Index statistics |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod ask;
pub mod chunk;
pub mod config;
pub mod connector_fs;
pub mod connector_git;
pub mod connector_github;
pub mod db;
pub mod embedding;
pub mod error;
pub mod ingest;
pub mod llm;
pub mod memory;
pub mod migrate;
pub mod models;
pub mod progress;
mod retry;
pub mod search;
pub mod stats;
pub mod store;
pub mod traits;
