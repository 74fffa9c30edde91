//! Connector extension point.
//!
//! Every content source implements [`Connector`]. Built-in connectors are
//! resolved from the config by [`ConnectorRegistry::from_config`]; library
//! users can register their own and hand the registry to
//! [`run_sync_with_connectors`](crate::ingest::run_sync_with_connectors).
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │               ConnectorRegistry              │
//! │  ┌────────┐ ┌────────┐ ┌────────┐ ┌───────┐  │
//! │  │ docs   │ │ wiki   │ │ issues │ │ local │  │
//! │  │ (git)  │ │ (git)  │ │ (REST) │ │ (fs)  │  │
//! │  └────────┘ └────────┘ └────────┘ └───────┘  │
//! └──────────────────────┬───────────────────────┘
//!                        ▼
//!       run_sync() → chunk → embed → VectorStore
//! ```

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::Config;
use crate::models::SourceItem;

/// A data source that produces [`SourceItem`]s for ingestion.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use anyhow::Result;
/// use docsift::models::SourceItem;
/// use docsift::traits::Connector;
///
/// pub struct ChangelogConnector;
///
/// #[async_trait]
/// impl Connector for ChangelogConnector {
///     fn name(&self) -> &str { "changelog" }
///     fn description(&self) -> &str { "Release notes from the changelog service" }
///
///     async fn scan(&self) -> Result<Vec<SourceItem>> {
///         Ok(vec![])
///     }
/// }
/// ```
#[async_trait]
pub trait Connector: Send + Sync {
    /// Instance name, also the `sync` target (e.g. `"docs"`, `"issues"`).
    fn name(&self) -> &str;

    /// One line for `stats` and logs.
    fn description(&self) -> &str;

    /// Connector family (e.g. `"github"`). Custom connectors default to `"custom"`.
    fn connector_type(&self) -> &str {
        "custom"
    }

    /// Label stored on every chunk and used as the checkpoint key.
    ///
    /// Defaults to `"{connector_type}:{name}"`, e.g. `"github:wiki"`.
    fn source_label(&self) -> String {
        format!("{}:{}", self.connector_type(), self.name())
    }

    /// Fetch every item the source currently holds.
    async fn scan(&self) -> Result<Vec<SourceItem>>;

    /// Fetch items changed after `since`.
    ///
    /// The default scans everything and leaves filtering to the pipeline;
    /// connectors whose backend can filter server-side override this.
    async fn scan_since(&self, since: Option<DateTime<Utc>>) -> Result<Vec<SourceItem>> {
        let _ = since;
        self.scan().await
    }
}

/// Ordered set of connectors a sync can target.
pub struct ConnectorRegistry {
    connectors: Vec<Box<dyn Connector>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self {
            connectors: Vec::new(),
        }
    }

    /// Built-in connectors for everything configured under `[connectors]`.
    ///
    /// `[connectors.github]` yields `docs`, then `wiki` (unless `wiki =
    /// false`) and `issues` (unless `issues.enabled = false`);
    /// `[connectors.local]` yields `local`.
    ///
    /// # Errors
    ///
    /// Returns an error if a connector's HTTP client cannot be built.
    pub fn from_config(config: &Config) -> Result<Self> {
        use crate::connector_fs::LocalConnector;
        use crate::connector_git::{GitDocsConnector, WikiConnector};
        use crate::connector_github::IssuesConnector;

        let mut registry = Self::new();

        if let Some(github) = &config.connectors.github {
            registry.register(Box::new(GitDocsConnector::new(
                github.clone(),
                &config.db.path,
            )));
            if github.wiki {
                registry.register(Box::new(WikiConnector::new(github.clone(), &config.db.path)));
            }
            if github.issues.enabled {
                registry.register(Box::new(IssuesConnector::new(github.clone())?));
            }
        }
        if let Some(local) = &config.connectors.local {
            registry.register(Box::new(LocalConnector::new(local.clone())));
        }

        Ok(registry)
    }

    pub fn register(&mut self, connector: Box<dyn Connector>) {
        self.connectors.push(connector);
    }

    pub fn connectors(&self) -> &[Box<dyn Connector>] {
        &self.connectors
    }

    /// Find a connector by its `sync` name.
    pub fn find(&self, name: &str) -> Option<&dyn Connector> {
        self.connectors
            .iter()
            .find(|c| c.name() == name)
            .map(|c| c.as_ref())
    }

    /// Connectors selected by a `sync` target: one name, or `"all"`.
    pub fn resolve(&self, target: &str) -> Result<Vec<&dyn Connector>> {
        if target == "all" {
            if self.connectors.is_empty() {
                anyhow::bail!("No connectors configured. Add [connectors.github] or [connectors.local].");
            }
            return Ok(self.connectors.iter().map(|c| c.as_ref()).collect());
        }

        self.find(target).map(|c| vec![c]).ok_or_else(|| {
            let available: Vec<&str> = self.connectors.iter().map(|c| c.name()).collect();
            if available.is_empty() {
                anyhow::anyhow!("Connector '{}' is not configured", target)
            } else {
                anyhow::anyhow!(
                    "Connector '{}' is not configured. Available: {}, all",
                    target,
                    available.join(", ")
                )
            }
        })
    }

    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.connectors.len()
    }
}

impl Default for ConnectorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GitHubConnectorConfig, LocalConnectorConfig};

    struct Named(&'static str);

    #[async_trait]
    impl Connector for Named {
        fn name(&self) -> &str {
            self.0
        }
        fn description(&self) -> &str {
            "test"
        }
        async fn scan(&self) -> Result<Vec<SourceItem>> {
            Ok(Vec::new())
        }
    }

    fn github() -> GitHubConnectorConfig {
        toml::from_str("owner = \"acme\"\nrepo = \"widgets\"").unwrap()
    }

    #[test]
    fn test_default_source_label() {
        assert_eq!(Named("notes").source_label(), "custom:notes");
    }

    #[test]
    fn test_from_config_builds_github_and_local() {
        let mut config = Config::minimal();
        config.connectors.github = Some(github());
        config.connectors.local = Some(LocalConnectorConfig {
            root: "./docs".into(),
            include_globs: vec!["**/*.md".into()],
            exclude_globs: vec![],
            follow_symlinks: false,
        });

        let registry = ConnectorRegistry::from_config(&config).unwrap();
        let names: Vec<&str> = registry.connectors().iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["docs", "wiki", "issues", "local"]);
        assert_eq!(registry.find("wiki").unwrap().source_label(), "github:wiki");
        assert_eq!(registry.find("local").unwrap().source_label(), "local");
    }

    #[test]
    fn test_wiki_and_issues_can_be_disabled() {
        let mut gh = github();
        gh.wiki = false;
        gh.issues.enabled = false;
        let mut config = Config::minimal();
        config.connectors.github = Some(gh);

        let registry = ConnectorRegistry::from_config(&config).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.find("wiki").is_none());
    }

    #[test]
    fn test_resolve_targets() {
        let mut registry = ConnectorRegistry::new();
        assert!(registry.resolve("all").is_err());
        registry.register(Box::new(Named("a")));
        registry.register(Box::new(Named("b")));

        assert_eq!(registry.resolve("all").unwrap().len(), 2);
        assert_eq!(registry.resolve("b").unwrap()[0].name(), "b");
        let Err(err) = registry.resolve("c") else {
            panic!("unknown connector resolved");
        };
        let err = err.to_string();
        assert!(err.contains("Available: a, b, all"), "{}", err);
    }
}
