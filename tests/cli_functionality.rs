//! Integration tests for CLI functionality
//!
//! These tests verify that the different CLI components work together properly.
//! Unit tests for individual functions are located in the respective module files.

use std::fs;
use std::process::Command;
use tempfile::TempDir;
use transcode_queue::ServiceConfig;
use transcode_queue::cli::ConfigDiscovery;

fn tq() -> Command {
    Command::new(env!("CARGO_BIN_EXE_tq"))
}

#[test]
fn test_configuration_discovery() {
    // Should return None or a valid path if config exists
    if let Some(path) = ConfigDiscovery::find_config_file() {
        assert!(path.is_file());
    }

    // Discovery always succeeds (uses defaults if no file)
    let config = ConfigDiscovery::discover_config().unwrap();
    assert!(config.concurrency_limit() > 0);
}

#[test]
fn test_show_config() {
    let output = tq().arg("show-config").output().unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Configuration Discovery Hierarchy"));
    assert!(stdout.contains("[scheduler]"));
}

#[test]
fn test_run_requires_inputs() {
    let output = tq().arg("run").output().unwrap();
    assert!(!output.status.success());
}

#[test]
fn test_run_missing_input_file() {
    let temp_dir = TempDir::new().unwrap();
    let output = tq()
        .arg("run")
        .arg(temp_dir.path().join("missing.mkv"))
        .output()
        .unwrap();

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("not found"));
}

#[test]
fn test_run_reports_failed_tasks() {
    let temp_dir = TempDir::new().unwrap();
    let input = temp_dir.path().join("clip.mkv");
    fs::write(&input, b"").unwrap();

    let mut config = ServiceConfig::default();
    config.encoder.path = Some(temp_dir.path().join("no-such-ffmpeg"));
    config.probe_failure_grace_ms = 60_000;
    let config_path = temp_dir.path().join("tq.toml");
    config.to_toml_file(&config_path).unwrap();

    let output = tq()
        .arg("run")
        .arg("--config")
        .arg(&config_path)
        .arg(&input)
        .output()
        .unwrap();

    assert!(!output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    let events: Vec<serde_json::Value> = stdout
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();

    assert_eq!(events[0]["event"], "ffmpegVersion");
    assert_eq!(events[0]["payload"]["content"], "");
    let last = events.last().unwrap();
    assert_eq!(last["event"], "workingStatusUpdate");
    assert_eq!(last["payload"]["value"], "stop");
    assert!(String::from_utf8_lossy(&output.stderr).contains("did not finish"));
}
