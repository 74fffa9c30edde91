use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::config::LocalConnectorConfig;
use crate::connector_git::{build_globset, file_mtime, read_text, walk_with, with_default_excludes};
use crate::models::{ChunkMetadata, SourceItem};
use crate::traits::Connector;

/// Documents from a local directory, e.g. an existing checkout.
pub struct LocalConnector {
    config: LocalConnectorConfig,
}

impl LocalConnector {
    pub fn new(config: LocalConnectorConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Connector for LocalConnector {
    fn name(&self) -> &str {
        "local"
    }

    fn description(&self) -> &str {
        "Files in a local directory"
    }

    fn connector_type(&self) -> &str {
        "local"
    }

    fn source_label(&self) -> String {
        "local".to_string()
    }

    async fn scan(&self) -> Result<Vec<SourceItem>> {
        let root = &self.config.root;
        if !root.exists() {
            bail!("Local connector root does not exist: {}", root.display());
        }

        let include = build_globset(&self.config.include_globs)?;
        let exclude = build_globset(&with_default_excludes(&self.config.exclude_globs))?;
        let files = walk_with(root, &include, &exclude, self.config.follow_symlinks)?;

        let mut items = Vec::with_capacity(files.len());
        for file in files {
            let Some(body) = read_text(&file.path)? else {
                continue;
            };
            let modified = file_mtime(&file.path);
            let content_type = if file.relative.ends_with(".md") || file.relative.ends_with(".markdown") {
                "text/markdown"
            } else {
                "text/plain"
            };
            let mut metadata = ChunkMetadata::new();
            metadata.insert("path".into(), file.relative.clone().into());

            items.push(SourceItem {
                source: self.source_label(),
                source_url: Some(format!("file://{}", file.path.display())),
                title: Some(file.file_name()),
                author: None,
                created_at: modified,
                updated_at: modified,
                content_type: content_type.to_string(),
                body,
                metadata,
                source_id: file.relative,
            });
        }

        Ok(items)
    }
}
