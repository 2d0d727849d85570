use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn mindflow_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("mindflow");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/mindflow.sqlite"

[mail]
provider = "disabled"

[scheduler]
interval_secs = 60
"#,
        root.display()
    );

    let config_path = config_dir.join("mindflow.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_mindflow(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = mindflow_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run mindflow binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_mindflow(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/mindflow.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_mindflow(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_mindflow(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_tick_on_empty_database() {
    let (_tmp, config_path) = setup_test_env();

    run_mindflow(&config_path, &["init"]);
    let (stdout, stderr, success) = run_mindflow(&config_path, &["tick"]);
    assert!(success, "tick failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("due: 0"), "unexpected report: {}", stdout);
    assert!(stdout.contains("overdue: 0"));
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_mindflow(&tmp.path().join("nope.toml"), &["init"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}

#[test]
fn test_invalid_scheduler_interval_rejected() {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("bad.toml");
    fs::write(
        &config_path,
        "[db]\npath = \"x.sqlite\"\n\n[scheduler]\ninterval_secs = 0\n",
    )
    .unwrap();

    let (_, stderr, success) = run_mindflow(&config_path, &["init"]);
    assert!(!success);
    assert!(stderr.contains("interval_secs"));
}
