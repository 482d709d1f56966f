//! CLI end-to-end tests
//!
//! Tests for the loopcast command-line interface.

use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::process::Command;
use std::time::{Duration, SystemTime};
use tempfile::tempdir;

/// Get a command for the loopcast binary
#[allow(deprecated)]
fn loopcast_cmd() -> Command {
    let mut cmd = Command::cargo_bin("loopcast").unwrap();
    cmd.env_remove("LOOPCAST_STREAM_KEY").env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_cli_no_args_shows_help() {
    let mut cmd = loopcast_cmd();
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_cli_help_flag() {
    let mut cmd = loopcast_cmd();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("loopcast"))
        .stdout(predicate::str::contains("publish"))
        .stdout(predicate::str::contains("Usage"));
}

#[test]
fn test_cli_version_command() {
    let mut cmd = loopcast_cmd();
    cmd.arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains(format!(
            "loopcast {}",
            env!("CARGO_PKG_VERSION")
        )));
}

#[test]
fn test_cli_check_tools_command() {
    let mut cmd = loopcast_cmd();
    cmd.arg("check-tools")
        .assert()
        .success()
        .stdout(predicate::str::contains("ffmpeg"));
}

#[test]
fn test_cli_validate_defaults() {
    let mut cmd = loopcast_cmd();
    cmd.arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("using defaults"))
        .stdout(predicate::str::contains("rtmp://a.rtmp.youtube.com/live2"));
}

#[test]
fn test_cli_validate_file_with_warnings() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("loopcast.json");
    fs::write(
        &path,
        r#"{"stream": {"ingest_url": "http://example.com/live"}, "server": {"port": 9090}}"#,
    )
    .unwrap();

    let mut cmd = loopcast_cmd();
    cmd.arg("validate")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid"))
        .stdout(predicate::str::contains("0.0.0.0:9090"))
        .stdout(predicate::str::contains("Warnings"));
}

#[test]
fn test_cli_validate_invalid_json() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("broken.json");
    fs::write(&path, "{ not json").unwrap();

    let mut cmd = loopcast_cmd();
    cmd.arg("validate").arg(&path).assert().failure();
}

#[test]
fn test_cli_sweep_removes_old_uploads() {
    let dir = tempdir().unwrap();
    let uploads = dir.path().join("uploads");
    fs::create_dir(&uploads).unwrap();

    let old = uploads.join("old.mp4");
    fs::write(&old, b"x").unwrap();
    fs::File::options()
        .write(true)
        .open(&old)
        .unwrap()
        .set_modified(SystemTime::now() - Duration::from_secs(3 * 24 * 3600))
        .unwrap();
    fs::write(uploads.join("new.flv"), b"x").unwrap();

    let config = dir.path().join("loopcast.json");
    fs::write(
        &config,
        format!(
            r#"{{"media": {{"upload_dir": {}}}}}"#,
            serde_json::to_string(&uploads).unwrap()
        ),
    )
    .unwrap();

    let mut cmd = loopcast_cmd();
    cmd.arg("--config")
        .arg(&config)
        .arg("sweep")
        .assert()
        .success()
        .stdout(predicate::str::contains("Removed old.mp4"))
        .stdout(predicate::str::contains("Swept 1 file(s)"));

    assert!(!old.exists());
    assert!(uploads.join("new.flv").exists());
}

#[test]
fn test_cli_publish_requires_key() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("a.mp4");
    fs::write(&input, b"x").unwrap();

    let mut cmd = loopcast_cmd();
    cmd.arg("publish")
        .arg(&input)
        .assert()
        .failure()
        .stderr(predicate::str::contains("--key"));
}

#[test]
fn test_cli_publish_missing_input_fails() {
    let dir = tempdir().unwrap();

    let mut cmd = loopcast_cmd();
    cmd.arg("publish")
        .arg(dir.path().join("missing.mp4"))
        .arg("--key")
        .arg("abc")
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));
}

#[cfg(unix)]
#[test]
fn test_cli_publish_runs_encoder_to_completion() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempdir().unwrap();
    let input = dir.path().join("a.mp4");
    fs::write(&input, b"x").unwrap();

    let encoder = dir.path().join("fake-ffmpeg.sh");
    fs::write(&encoder, "#!/bin/sh\necho \"target $*\" >&2\necho done >&2\n").unwrap();
    fs::set_permissions(&encoder, fs::Permissions::from_mode(0o755)).unwrap();

    let config = dir.path().join("loopcast.json");
    fs::write(
        &config,
        format!(
            r#"{{"tools": {{"ffmpeg_path": {}}}}}"#,
            serde_json::to_string(&encoder).unwrap()
        ),
    )
    .unwrap();

    let mut cmd = loopcast_cmd();
    cmd.arg("--config")
        .arg(&config)
        .arg("publish")
        .arg(&input)
        .env("LOOPCAST_STREAM_KEY", "very-secret")
        .assert()
        .success()
        .stdout(predicate::str::contains("Running: "))
        .stdout(predicate::str::contains("live2/****"))
        .stdout(predicate::str::contains("Streaming finished."))
        .stdout(predicate::str::contains("very-secret").not());
}
