//! TOML configuration parsing and validation.
//!
//! The whole application is driven by one immutable [`Config`] value that is
//! loaded once by [`load_config`], validated eagerly and then passed by
//! reference. Secrets never live in the file: API keys are read from
//! environment variables.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::chunk::ChunkingConfig;
use crate::memory::MemoryConfig;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub connectors: ConnectorsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_openai_key_env")]
    pub api_key_env: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            api_key_env: default_openai_key_env(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_openai_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Completion budget for answers; summaries use `memory.summary_max_tokens`.
    #[serde(default = "default_llm_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_llm_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_openai_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            max_tokens: default_llm_max_tokens(),
            timeout_secs: default_llm_timeout_secs(),
            max_retries: default_llm_max_retries(),
            api_key_env: default_openai_key_env(),
            system_prompt: default_system_prompt(),
        }
    }
}

fn default_llm_max_tokens() -> usize {
    800
}
fn default_llm_timeout_secs() -> u64 {
    60
}
fn default_llm_max_retries() -> u32 {
    3
}
fn default_system_prompt() -> String {
    "You are a helpful assistant for this project. Answer using the provided \
     documentation, issues and wiki context. Say so when the context does not \
     contain the answer."
        .to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ConnectorsConfig {
    pub github: Option<GitHubConnectorConfig>,
    pub local: Option<LocalConnectorConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GitHubConnectorConfig {
    pub owner: String,
    pub repo: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    /// Clone URL override (e.g. a mirror); defaults to github.com.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Name of the environment variable holding a GitHub token, if any.
    #[serde(default)]
    pub token_env: Option<String>,
    #[serde(default = "default_markdown_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default = "default_true")]
    pub shallow: bool,
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub wiki: bool,
    #[serde(default)]
    pub issues: IssuesConfig,
}

impl GitHubConnectorConfig {
    pub fn repository(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }

    pub fn clone_url(&self) -> String {
        self.url
            .clone()
            .unwrap_or_else(|| format!("https://github.com/{}/{}.git", self.owner, self.repo))
    }

    pub fn wiki_url(&self) -> String {
        let base = self.clone_url();
        let base = base.trim_end_matches(".git");
        format!("{}.wiki.git", base)
    }

    pub fn token(&self) -> Option<String> {
        self.token_env
            .as_deref()
            .and_then(|name| std::env::var(name).ok())
            .filter(|t| !t.is_empty())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IssuesConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_issue_state")]
    pub state: String,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub include_comments: bool,
}

impl Default for IssuesConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            state: default_issue_state(),
            labels: Vec::new(),
            limit: None,
            include_comments: false,
        }
    }
}

fn default_branch() -> String {
    "main".to_string()
}
fn default_api_base() -> String {
    "https://api.github.com".to_string()
}
fn default_markdown_globs() -> Vec<String> {
    vec!["**/*.md".to_string(), "**/*.markdown".to_string()]
}
fn default_issue_state() -> String {
    "all".to_string()
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct LocalConnectorConfig {
    pub root: PathBuf,
    #[serde(default = "default_local_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

fn default_local_globs() -> Vec<String> {
    vec!["**/*.md".to_string(), "**/*.txt".to_string()]
}

impl Config {
    /// In-code defaults with a database under `./data`.
    pub fn minimal() -> Self {
        Self {
            db: DbConfig {
                path: PathBuf::from("./data/docsift.sqlite"),
            },
            chunking: ChunkingConfig::default(),
            memory: MemoryConfig::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
            llm: LlmConfig::default(),
            connectors: ConnectorsConfig::default(),
        }
    }

    /// Check every section; the first problem found is reported.
    pub fn validate(&self) -> Result<()> {
        self.chunking
            .validate()
            .map_err(|e| anyhow::anyhow!("chunking: {}", e))?;
        self.memory.validate()?;

        if self.retrieval.top_k == 0 {
            bail!("retrieval.top_k must be >= 1");
        }

        match self.embedding.provider.as_str() {
            "disabled" => {}
            "openai" => {
                if self.embedding.model.is_none() {
                    bail!("embedding.model must be specified when provider is 'openai'");
                }
                if self.embedding.dims.unwrap_or(0) == 0 {
                    bail!("embedding.dims must be > 0 when provider is 'openai'");
                }
            }
            "hash" => {
                if self.embedding.dims == Some(0) {
                    bail!("embedding.dims must be > 0 when provider is 'hash'");
                }
            }
            other => bail!(
                "Unknown embedding provider: '{}'. Must be disabled, openai, or hash.",
                other
            ),
        }
        if self.embedding.batch_size == 0 {
            bail!("embedding.batch_size must be >= 1");
        }

        match self.llm.provider.as_str() {
            "disabled" => {}
            "openai" => {
                if self.llm.model.is_none() {
                    bail!("llm.model must be specified when provider is 'openai'");
                }
            }
            other => bail!(
                "Unknown llm provider: '{}'. Must be disabled or openai.",
                other
            ),
        }
        if self.llm.max_tokens == 0 {
            bail!("llm.max_tokens must be > 0");
        }

        if let Some(gh) = &self.connectors.github {
            if gh.owner.trim().is_empty() || gh.repo.trim().is_empty() {
                bail!("connectors.github.owner and connectors.github.repo must be set");
            }
            match gh.issues.state.as_str() {
                "open" | "closed" | "all" => {}
                other => bail!(
                    "connectors.github.issues.state must be open, closed, or all (got '{}')",
                    other
                ),
            }
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}
