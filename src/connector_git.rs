//! Git-backed connectors: repository markdown docs and the GitHub wiki.
//!
//! Both keep a working copy in a cache directory next to the database
//! (or `cache_dir` when configured). The first sync clones, later syncs
//! fetch and hard-reset. Files are walked with include/exclude globs and
//! per-file commit time and author come from `git log`.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::chunk::decode_text;
use crate::config::GitHubConnectorConfig;
use crate::models::{ChunkMetadata, SourceItem};
use crate::traits::Connector;

/// Markdown files of the repository's default branch.
pub struct GitDocsConnector {
    config: GitHubConnectorConfig,
    checkout: Checkout,
}

impl GitDocsConnector {
    pub fn new(config: GitHubConnectorConfig, db_path: &Path) -> Self {
        let url = config.clone_url();
        let checkout = Checkout {
            dir: cache_root(&config, db_path).join(short_hash(&url)),
            url,
            branch: Some(config.branch.clone()),
            shallow: config.shallow,
        };
        Self { config, checkout }
    }
}

#[async_trait]
impl Connector for GitDocsConnector {
    fn name(&self) -> &str {
        "docs"
    }

    fn description(&self) -> &str {
        "Markdown files in the GitHub repository"
    }

    fn connector_type(&self) -> &str {
        "github"
    }

    async fn scan(&self) -> Result<Vec<SourceItem>> {
        let source = self.source_label();
        let config = self.config.clone();
        let checkout = self.checkout.clone();

        tokio::task::spawn_blocking(move || -> Result<Vec<SourceItem>> {
            let sha = checkout.sync()?;
            let include = build_globset(&config.include_globs)?;
            let exclude = build_globset(&with_default_excludes(&config.exclude_globs))?;
            let repository = config.repository();

            let mut items = Vec::new();
            for file in walk(&checkout.dir, &include, &exclude)? {
                let Some(body) = read_text(&file.path)? else {
                    continue;
                };
                let (updated_at, author) = last_commit(&checkout.dir, &file.path);
                let mut metadata = ChunkMetadata::new();
                metadata.insert("repository".into(), repository.clone().into());
                metadata.insert("path".into(), file.relative.clone().into());
                metadata.insert("commit".into(), sha.clone().into());

                items.push(SourceItem {
                    source: source.clone(),
                    source_url: Some(format!(
                        "https://github.com/{}/blob/{}/{}",
                        repository, sha, file.relative
                    )),
                    title: Some(markdown_title(&body).unwrap_or_else(|| file.file_name())),
                    author,
                    created_at: updated_at,
                    updated_at,
                    content_type: "text/markdown".to_string(),
                    body,
                    metadata,
                    source_id: file.relative,
                });
            }
            info!(source = %source, files = items.len(), commit = %sha, "scanned docs");
            Ok(items)
        })
        .await?
    }
}

/// Pages of the repository's wiki (`{repo}.wiki.git`).
pub struct WikiConnector {
    config: GitHubConnectorConfig,
    checkout: Checkout,
}

impl WikiConnector {
    pub fn new(config: GitHubConnectorConfig, db_path: &Path) -> Self {
        let url = config.wiki_url();
        let checkout = Checkout {
            dir: cache_root(&config, db_path).join(short_hash(&url)),
            url,
            branch: None,
            shallow: config.shallow,
        };
        Self { config, checkout }
    }
}

#[async_trait]
impl Connector for WikiConnector {
    fn name(&self) -> &str {
        "wiki"
    }

    fn description(&self) -> &str {
        "GitHub wiki pages"
    }

    fn connector_type(&self) -> &str {
        "github"
    }

    async fn scan(&self) -> Result<Vec<SourceItem>> {
        let source = self.source_label();
        let repository = self.config.repository();
        let checkout = self.checkout.clone();

        tokio::task::spawn_blocking(move || -> Result<Vec<SourceItem>> {
            let sha = checkout.sync()?;
            let include = build_globset(&["**/*.md".to_string(), "**/*.markdown".to_string()])?;
            let exclude = build_globset(&with_default_excludes(&[]))?;

            let mut items = Vec::new();
            for file in walk(&checkout.dir, &include, &exclude)? {
                let Some(body) = read_text(&file.path)? else {
                    continue;
                };
                let stem = file.stem();
                let (updated_at, author) = last_commit(&checkout.dir, &file.path);
                let mut metadata = ChunkMetadata::new();
                metadata.insert("repository".into(), repository.clone().into());
                metadata.insert("page".into(), stem.clone().into());

                items.push(SourceItem {
                    source: source.clone(),
                    source_id: file.relative.clone(),
                    source_url: Some(wiki_page_url(&repository, &stem)),
                    title: Some(wiki_title(&stem)),
                    author,
                    created_at: updated_at,
                    updated_at,
                    content_type: "text/markdown".to_string(),
                    body,
                    metadata,
                });
            }
            info!(source = %source, pages = items.len(), commit = %sha, "scanned wiki");
            Ok(items)
        })
        .await?
    }
}

/// `Getting-Started` → `Getting Started`.
pub fn wiki_title(stem: &str) -> String {
    stem.replace('-', " ")
}

pub fn wiki_page_url(repository: &str, stem: &str) -> String {
    format!("https://github.com/{}/wiki/{}", repository, stem)
}

/// Text of the first ATX heading, if the document starts with one.
fn markdown_title(body: &str) -> Option<String> {
    body.lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .and_then(|l| l.strip_prefix('#'))
        .map(|l| l.trim_start_matches('#').trim().to_string())
        .filter(|t| !t.is_empty())
}

// ============ Checkout ============

#[derive(Debug, Clone)]
struct Checkout {
    url: String,
    /// `None` follows the remote's default branch.
    branch: Option<String>,
    shallow: bool,
    dir: PathBuf,
}

impl Checkout {
    /// Clone or update the working copy and return the HEAD commit.
    fn sync(&self) -> Result<String> {
        if self.dir.join(".git").exists() {
            debug!(dir = %self.dir.display(), "updating checkout");
            self.pull()?;
        } else {
            info!(url = %self.url, dir = %self.dir.display(), "cloning");
            self.clone_repo()?;
        }
        git_head_sha(&self.dir)
    }

    fn clone_repo(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dir).with_context(|| {
            format!("Failed to create cache directory: {}", self.dir.display())
        })?;

        let mut cmd = Command::new("git");
        cmd.arg("clone");
        if let Some(branch) = &self.branch {
            cmd.args(["--branch", branch, "--single-branch"]);
        }
        if self.shallow {
            cmd.args(["--depth", "1"]);
        }
        cmd.arg(&self.url).arg(&self.dir);

        run_git(cmd, "clone")
    }

    fn pull(&self) -> Result<()> {
        let refspec = self.branch.as_deref().unwrap_or("HEAD");

        let mut fetch = Command::new("git");
        fetch.args(["fetch", "origin", refspec]).current_dir(&self.dir);
        if self.shallow {
            fetch.args(["--depth", "1"]);
        }
        run_git(fetch, "fetch")?;

        let mut reset = Command::new("git");
        reset
            .args(["reset", "--hard", "FETCH_HEAD"])
            .current_dir(&self.dir);
        run_git(reset, "reset")
    }
}

fn run_git(mut cmd: Command, what: &str) -> Result<()> {
    let output = cmd
        .output()
        .with_context(|| format!("Failed to execute 'git {}'. Is git installed?", what))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("git {} failed: {}", what, stderr.trim());
    }
    Ok(())
}

fn git_head_sha(repo_dir: &Path) -> Result<String> {
    let output = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .current_dir(repo_dir)
        .output()
        .with_context(|| "Failed to get HEAD SHA")?;

    if !output.status.success() {
        bail!("git rev-parse HEAD failed");
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Commit time and author of the last commit touching `file`.
///
/// Falls back to the file's mtime when git has no answer (shallow clones
/// still know the tip commit).
fn last_commit(repo_dir: &Path, file: &Path) -> (DateTime<Utc>, Option<String>) {
    let logged = Command::new("git")
        .args(["log", "-1", "--format=%ct%x09%an", "--"])
        .arg(file)
        .current_dir(repo_dir)
        .output()
        .ok()
        .filter(|o| o.status.success())
        .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string());

    if let Some((ts, author)) = logged.as_deref().and_then(|l| l.split_once('\t')) {
        if let Some(time) = ts.parse::<i64>().ok().and_then(|s| Utc.timestamp_opt(s, 0).single()) {
            let author = Some(author.trim().to_string()).filter(|a| !a.is_empty());
            return (time, author);
        }
    }

    (file_mtime(file), None)
}

pub(crate) fn file_mtime(path: &Path) -> DateTime<Utc> {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc.timestamp_opt(0, 0).single().unwrap_or_default())
}

// ============ File walking ============

pub(crate) struct WalkedFile {
    pub path: PathBuf,
    /// Path relative to the walk root, `/`-separated.
    pub relative: String,
}

impl WalkedFile {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

/// Files under `root` matching `include` and not `exclude`, sorted by path.
pub(crate) fn walk(root: &Path, include: &GlobSet, exclude: &GlobSet) -> Result<Vec<WalkedFile>> {
    walk_with(root, include, exclude, false)
}

pub(crate) fn walk_with(
    root: &Path,
    include: &GlobSet,
    exclude: &GlobSet,
    follow_links: bool,
) -> Result<Vec<WalkedFile>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(follow_links) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");

        if exclude.is_match(&rel_str) || !include.is_match(&rel_str) {
            continue;
        }
        files.push(WalkedFile {
            path: path.to_path_buf(),
            relative: rel_str,
        });
    }
    files.sort_by(|a, b| a.relative.cmp(&b.relative));
    Ok(files)
}

/// Read a file as text. Binary and non-UTF-8 files are skipped with a warning.
pub(crate) fn read_text(path: &Path) -> Result<Option<String>> {
    let raw = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    match decode_text(&raw) {
        Ok(text) => Ok(Some(text.to_string())),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "skipping non-text file");
            Ok(None)
        }
    }
}

pub(crate) fn with_default_excludes(extra: &[String]) -> Vec<String> {
    let mut patterns = vec![
        ".git/**".to_string(),
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    patterns.extend(extra.iter().cloned());
    patterns
}

pub(crate) fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}

fn cache_root(config: &GitHubConnectorConfig, db_path: &Path) -> PathBuf {
    match &config.cache_dir {
        Some(dir) => dir.clone(),
        None => db_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(".git-cache"),
    }
}

fn short_hash(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    format!("{:x}", digest)[..12].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_wiki_title_and_url() {
        assert_eq!(wiki_title("Getting-Started"), "Getting Started");
        assert_eq!(wiki_title("Home"), "Home");
        assert_eq!(
            wiki_page_url("acme/widgets", "Getting-Started"),
            "https://github.com/acme/widgets/wiki/Getting-Started"
        );
    }

    #[test]
    fn test_markdown_title() {
        assert_eq!(markdown_title("\n# Install\n\ntext").as_deref(), Some("Install"));
        assert_eq!(markdown_title("## Usage").as_deref(), Some("Usage"));
        assert_eq!(markdown_title("plain first line\n# Later"), None);
        assert_eq!(markdown_title("#"), None);
    }

    #[test]
    fn test_walk_applies_globs_and_default_excludes() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("docs")).unwrap();
        fs::create_dir_all(root.join("node_modules/pkg")).unwrap();
        fs::create_dir_all(root.join(".git")).unwrap();
        fs::write(root.join("README.md"), "# Readme").unwrap();
        fs::write(root.join("docs/guide.md"), "# Guide").unwrap();
        fs::write(root.join("docs/notes.txt"), "notes").unwrap();
        fs::write(root.join("node_modules/pkg/README.md"), "vendored").unwrap();
        fs::write(root.join(".git/HEAD.md"), "ref").unwrap();

        let include = build_globset(&["**/*.md".to_string()]).unwrap();
        let exclude = build_globset(&with_default_excludes(&[])).unwrap();
        let files = walk(root, &include, &exclude).unwrap();
        let names: Vec<&str> = files.iter().map(|f| f.relative.as_str()).collect();
        assert_eq!(names, vec!["README.md", "docs/guide.md"]);
    }

    #[test]
    fn test_read_text_skips_binary() {
        let tmp = tempfile::tempdir().unwrap();
        let text = tmp.path().join("a.md");
        let binary = tmp.path().join("b.md");
        fs::write(&text, "hello").unwrap();
        fs::write(&binary, [0x89u8, b'P', 0, 0]).unwrap();

        assert_eq!(read_text(&text).unwrap().as_deref(), Some("hello"));
        assert_eq!(read_text(&binary).unwrap(), None);
    }

    #[test]
    fn test_cache_dirs_differ_for_docs_and_wiki() {
        let config: GitHubConnectorConfig =
            toml::from_str("owner = \"acme\"\nrepo = \"widgets\"").unwrap();
        let db = Path::new("/tmp/data/docsift.sqlite");
        let docs = GitDocsConnector::new(config.clone(), db);
        let wiki = WikiConnector::new(config, db);

        assert!(docs.checkout.dir.starts_with("/tmp/data/.git-cache"));
        assert_ne!(docs.checkout.dir, wiki.checkout.dir);
        assert_eq!(wiki.checkout.url, "https://github.com/acme/widgets.wiki.git");
        assert_eq!(wiki.checkout.branch, None);
    }
}
