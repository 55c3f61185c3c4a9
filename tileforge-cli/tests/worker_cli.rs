//! Integration tests for the `tileforge-worker` binary's startup paths.

use std::process::Command;
use tempfile::TempDir;

fn worker(cwd: &TempDir) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_tileforge-worker"));
    cmd.current_dir(cwd.path())
        .env_remove("FILE_STORE_DIR")
        .env_remove("TILE_DIR")
        .env_remove("TILE_THREADS")
        .env_remove("SKIP_EXISTING");
    cmd
}

#[test]
fn missing_endpoint_prints_usage_and_exits_cleanly() {
    let temp = TempDir::new().unwrap();
    let output = worker(&temp).output().unwrap();

    assert!(output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Usage"), "stderr: {}", stderr);
}

#[test]
fn inaccessible_file_store_is_fatal() {
    let temp = TempDir::new().unwrap();
    let output = worker(&temp)
        .arg("http://127.0.0.1:9/tiles")
        .arg("--file-store-dir")
        .arg(temp.path().join("missing"))
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("not accessible"), "stderr: {}", stderr);
}

#[test]
fn bad_endpoint_is_fatal() {
    let temp = TempDir::new().unwrap();
    let output = worker(&temp).arg("not-a-url").output().unwrap();
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn unreachable_coordinator_fails_the_run() {
    let temp = TempDir::new().unwrap();
    std::fs::create_dir(temp.path().join("filestore")).unwrap();

    // Nothing listens on port 9: every claim fails and every thread ends
    let output = worker(&temp)
        .arg("http://127.0.0.1:9/tiles")
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("worker threads failed"), "stderr: {}", stderr);
    assert!(temp.path().join("iview2/tiles").is_dir());
    assert!(temp.path().join("logs/tileforge.log").exists());
}
