//! Integration tests for the `ragthread` binary.
//!
//! Each test gets its own temp directory with a config using the hashing
//! embedder, so no model download or network access is needed.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn setup() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    fs::create_dir_all(root.join("config")).unwrap();
    fs::create_dir_all(root.join("uploads")).unwrap();

    let config = format!(
        r#"[storage]
index_dir = "{}/index_store"

[chunking]
chunk_size = 200
overlap = 40

[embedding]
provider = "hash"
dims = 128
"#,
        root.display()
    );
    let config_path = root.join("config").join("ragthread.toml");
    fs::write(&config_path, config).unwrap();

    fs::write(
        root.join("uploads").join("handbook.md"),
        "# Handbook\n\nDeploys happen every Tuesday after the standup.\n",
    )
    .unwrap();
    fs::write(
        root.join("uploads").join("menu.txt"),
        "Lunch is served at noon in the cafeteria.\n",
    )
    .unwrap();

    (tmp, config_path)
}

fn run(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let output = Command::new(env!("CARGO_BIN_EXE_ragthread"))
        .arg("--config")
        .arg(config_path)
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run ragthread: {}", e));
    (
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
        output.status.success(),
    )
}

#[test]
fn ingest_query_and_list() {
    let (tmp, config) = setup();
    let handbook = tmp.path().join("uploads/handbook.md");
    let menu = tmp.path().join("uploads/menu.txt");

    let (stdout, stderr, ok) = run(&config, &["ingest", "--thread", "5", handbook.to_str().unwrap()]);
    assert!(ok, "ingest failed: {}", stderr);
    assert!(stdout.contains("ingest handbook.md"));
    assert!(stdout.contains("chunks added: 1"));
    assert!(stdout.contains("total entries: 1"));

    let (stdout, _, ok) = run(&config, &["ingest", "--thread", "5", menu.to_str().unwrap()]);
    assert!(ok);
    assert!(stdout.contains("first position: 1"));

    let (stdout, _, ok) = run(&config, &["query", "--thread", "5", "--top-k", "1", "When do deploys happen?"]);
    assert!(ok);
    assert!(stdout.starts_with("[From handbook.md]\n# Handbook"));
    assert!(stdout.contains("sources: handbook.md"));

    let (stdout, _, ok) = run(&config, &["documents", "--thread", "5"]);
    assert!(ok);
    assert!(stdout.contains("handbook.md  chunks=1  first_position=0"));
    assert!(stdout.contains("menu.txt  chunks=1  first_position=1"));

    let (stdout, _, ok) = run(&config, &["has-docs", "--thread", "5"]);
    assert!(ok);
    assert_eq!(stdout.trim(), "true");
}

#[test]
fn query_on_empty_thread() {
    let (_tmp, config) = setup();
    let (stdout, _, ok) = run(&config, &["query", "--thread", "99", "anything"]);
    assert!(ok);
    assert!(stdout.contains("No results."));

    let (stdout, _, ok) = run(&config, &["has-docs", "--thread", "99"]);
    assert!(ok);
    assert_eq!(stdout.trim(), "false");
}

#[test]
fn forget_and_delete() {
    let (tmp, config) = setup();
    let handbook = tmp.path().join("uploads/handbook.md");
    let menu = tmp.path().join("uploads/menu.txt");
    run(&config, &["ingest", "--thread", "3", handbook.to_str().unwrap()]);
    run(&config, &["ingest", "--thread", "3", menu.to_str().unwrap()]);

    let (stdout, _, ok) = run(&config, &["forget", "--thread", "3", "handbook.md"]);
    assert!(ok);
    assert!(stdout.contains("entries removed: 1"));

    let (stdout, _, _) = run(&config, &["documents", "--thread", "3"]);
    assert!(!stdout.contains("handbook.md"));
    assert!(stdout.contains("menu.txt  chunks=1  first_position=0"));

    let (_, _, ok) = run(&config, &["delete", "--thread", "3"]);
    assert!(ok);
    assert!(!tmp.path().join("index_store/thread_3.index").exists());
    assert!(!tmp.path().join("index_store/thread_3_metadata.json").exists());

    let (stdout, _, _) = run(&config, &["documents", "--thread", "3"]);
    assert!(stdout.contains("No documents."));
}

#[test]
fn unsupported_upload_fails() {
    let (tmp, config) = setup();
    let image = tmp.path().join("uploads/diagram.png");
    fs::write(&image, [0x89, b'P', b'N', b'G']).unwrap();

    let (_, stderr, ok) = run(&config, &["ingest", "--thread", "1", image.to_str().unwrap()]);
    assert!(!ok);
    assert!(stderr.contains("unsupported document format"));
    assert!(!tmp.path().join("index_store/thread_1_metadata.json").exists());
}

#[test]
fn invalid_config_is_reported() {
    let tmp = TempDir::new().unwrap();
    let config = tmp.path().join("bad.toml");
    fs::write(&config, "[chunking]\nchunk_size = 100\noverlap = 100\n").unwrap();

    let (_, stderr, ok) = run(&config, &["has-docs", "--thread", "1"]);
    assert!(!ok);
    assert!(stderr.contains("chunking"));
}
