use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn docsift_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("docsift");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let files_dir = root.join("files");
    fs::create_dir_all(files_dir.join("guides")).unwrap();
    fs::write(
        files_dir.join("install.md"),
        "# Installation\n\nInstall the widget toolkit with cargo install widgets.\n\nThe toolkit needs a recent stable toolchain.",
    )
    .unwrap();
    fs::write(
        files_dir.join("guides/retries.md"),
        "# Retries\n\nFailed requests are retried with exponential backoff.\n\n```toml\n[client]\nmax_retries = 5\n```\n",
    )
    .unwrap();
    fs::write(
        files_dir.join("notes.txt"),
        "Deployment notes.\n\nThe service runs behind a load balancer in two regions.",
    )
    .unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/docsift.sqlite"

[chunking]
chunk_size = 400
chunk_overlap = 50

[retrieval]
top_k = 3

[embedding]
provider = "hash"
dims = 128

[connectors.local]
root = "{root}/files"
include_globs = ["**/*.md", "**/*.txt"]
"#,
        root = root.display()
    );

    let config_path = config_dir.join("docsift.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_docsift(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = docsift_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env("RUST_LOG", "off")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run docsift binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_docsift(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/docsift.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, first) = run_docsift(&config_path, &["init"]);
    assert!(first, "First init failed");
    let (_, _, second) = run_docsift(&config_path, &["init"]);
    assert!(second, "Second init failed (not idempotent)");
}

#[test]
fn test_sync_local() {
    let (_tmp, config_path) = setup_test_env();

    run_docsift(&config_path, &["init"]);
    let (stdout, stderr, success) = run_docsift(&config_path, &["sync", "local", "--progress", "off"]);
    assert!(success, "sync failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("sync local"));
    assert!(stdout.contains("documents ingested: 3"));
    assert!(stdout.contains("embeddings pending: 0"));
}

#[test]
fn test_sync_is_incremental() {
    let (_tmp, config_path) = setup_test_env();

    run_docsift(&config_path, &["init"]);
    run_docsift(&config_path, &["sync", "local"]);
    let (stdout, _, success) = run_docsift(&config_path, &["sync", "local"]);
    assert!(success);
    assert!(stdout.contains("documents ingested: 0"), "second sync: {}", stdout);

    let (stdout, _, success) = run_docsift(&config_path, &["sync", "local", "--full"]);
    assert!(success);
    assert!(stdout.contains("documents ingested: 3"));
    assert!(!stdout.contains("vectors replaced: 0"));
}

#[test]
fn test_sync_dry_run_writes_nothing() {
    let (_tmp, config_path) = setup_test_env();

    run_docsift(&config_path, &["init"]);
    let (stdout, _, success) = run_docsift(&config_path, &["sync", "local", "--dry-run"]);
    assert!(success);
    assert!(stdout.contains("items found: 3"));
    assert!(stdout.contains("estimated chunks:"));

    let (stdout, _, _) = run_docsift(&config_path, &["stats"]);
    assert!(stdout.contains("Vectors:     0"), "stats: {}", stdout);
}

#[test]
fn test_sync_with_limit() {
    let (_tmp, config_path) = setup_test_env();

    run_docsift(&config_path, &["init"]);
    let (stdout, _, success) = run_docsift(&config_path, &["sync", "local", "--limit", "1"]);
    assert!(success);
    assert!(stdout.contains("documents ingested: 1"));
}

#[test]
fn test_search_finds_matching_document() {
    let (_tmp, config_path) = setup_test_env();

    run_docsift(&config_path, &["init"]);
    run_docsift(&config_path, &["sync", "local"]);
    let (stdout, stderr, success) =
        run_docsift(&config_path, &["search", "exponential backoff retried requests"]);
    assert!(success, "search failed: {}", stderr);
    let first = stdout.lines().next().unwrap_or_default();
    assert!(first.starts_with("1. ["), "unexpected output: {}", stdout);
    assert!(first.contains("retries.md"), "unexpected top hit: {}", first);
}

#[test]
fn test_search_respects_limit_and_source() {
    let (_tmp, config_path) = setup_test_env();

    run_docsift(&config_path, &["init"]);
    run_docsift(&config_path, &["sync", "local"]);

    let (stdout, _, success) = run_docsift(&config_path, &["search", "toolkit", "--limit", "1"]);
    assert!(success);
    assert!(stdout.contains("1. ["));
    assert!(!stdout.contains("2. ["));

    let (stdout, _, success) =
        run_docsift(&config_path, &["search", "toolkit", "--source", "github:issues"]);
    assert!(success);
    assert!(stdout.contains("No results."));
}

#[test]
fn test_search_empty_query() {
    let (_tmp, config_path) = setup_test_env();

    run_docsift(&config_path, &["init"]);
    let (stdout, _, success) = run_docsift(&config_path, &["search", "   "]);
    assert!(success);
    assert!(stdout.contains("No results."));
}

#[test]
fn test_stats_lists_sources() {
    let (_tmp, config_path) = setup_test_env();

    run_docsift(&config_path, &["init"]);
    run_docsift(&config_path, &["sync", "local"]);
    let (stdout, _, success) = run_docsift(&config_path, &["stats"]);
    assert!(success);
    assert!(stdout.contains("Documents:   3"));
    assert!(stdout.contains("hash"));
    assert!(stdout.contains("local"));
}

#[test]
fn test_unknown_connector() {
    let (_tmp, config_path) = setup_test_env();

    run_docsift(&config_path, &["init"]);
    let (_, stderr, success) = run_docsift(&config_path, &["sync", "jira"]);
    assert!(!success);
    assert!(stderr.contains("jira"));
    assert!(stderr.contains("Available: local, all"));
}

#[test]
fn test_unknown_progress_mode() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_docsift(&config_path, &["sync", "local", "--progress", "loud"]);
    assert!(!success);
    assert!(stderr.contains("progress mode"));
}

#[test]
fn test_ask_requires_llm() {
    let (tmp, config_path) = setup_test_env();
    let session = tmp.path().join("session.json");

    let (_, stderr, success) = run_docsift(
        &config_path,
        &["ask", "How do I install?", "--session", session.to_str().unwrap()],
    );
    assert!(!success);
    assert!(stderr.contains("language model"));
    assert!(!session.exists());
}

#[test]
fn test_invalid_config_is_rejected() {
    let (_tmp, config_path) = setup_test_env();
    let content = fs::read_to_string(&config_path).unwrap();
    fs::write(&config_path, content.replace("chunk_overlap = 50", "chunk_overlap = 400")).unwrap();

    let (_, stderr, success) = run_docsift(&config_path, &["init"]);
    assert!(!success);
    assert!(stderr.contains("chunk_overlap"), "stderr: {}", stderr);
}

#[test]
fn test_missing_config_file() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_docsift(&tmp.path().join("nope.toml"), &["stats"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}
