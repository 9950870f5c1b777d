#![allow(deprecated)] // cargo_bin is deprecated but still works

use assert_cmd::Command;
use predicates::prelude::*;
use std::error::Error;
use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};
use tempfile::TempDir;

type TestResult<T = ()> = std::result::Result<T, Box<dyn Error>>;

fn dropwatch() -> TestResult<Command> {
    let mut cmd = Command::cargo_bin("dropwatch")?;
    cmd.env_remove("RUST_LOG");
    Ok(cmd)
}

#[test]
fn help_lists_subcommands() -> TestResult {
    dropwatch()?
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("watch"))
        .stdout(predicate::str::contains("check"));
    Ok(())
}

#[test]
fn check_reports_stable_file() -> TestResult {
    let dir = TempDir::new()?;
    let file = dir.path().join("song.flac");
    fs::write(&file, vec![0u8; 1024])?;

    dropwatch()?
        .args(["check", "--interval-ms", "20", "--checks", "3"])
        .arg(&file)
        .assert()
        .code(0)
        .stdout(predicate::str::contains("stable (1024 bytes)"));
    Ok(())
}

#[test]
fn check_json_output() -> TestResult {
    let dir = TempDir::new()?;
    let file = dir.path().join("song.flac");
    fs::write(&file, b"abc")?;

    let output = dropwatch()?
        .args(["--format", "json", "check", "--interval-ms", "10"])
        .arg(&file)
        .output()?;

    assert_eq!(output.status.code(), Some(0));
    let json: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(json["status"], "stable");
    assert_eq!(json["size"], 3);
    Ok(())
}

#[test]
fn check_missing_file_is_an_error() -> TestResult {
    let dir = TempDir::new()?;

    dropwatch()?
        .arg("check")
        .arg(dir.path().join("nope.flac"))
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Failed to read"));
    Ok(())
}

#[test]
fn check_rejects_directories() -> TestResult {
    let dir = TempDir::new()?;

    dropwatch()?
        .arg("check")
        .arg(dir.path())
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Not a regular file"));
    Ok(())
}

#[test]
fn check_json_error_shape() -> TestResult {
    let dir = TempDir::new()?;

    let output = dropwatch()?
        .args(["--format", "json", "check"])
        .arg(dir.path().join("nope.flac"))
        .output()?;

    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8(output.stderr)?;
    let line = stderr
        .lines()
        .find(|line| line.starts_with('{'))
        .ok_or("no JSON error on stderr")?;
    let json: serde_json::Value = serde_json::from_str(line)?;
    assert_eq!(json["error"], "CommandFailed");
    Ok(())
}

#[test]
fn watch_without_roots_fails() -> TestResult {
    let dir = TempDir::new()?;
    let config = dir.path().join("dropwatch.toml");
    fs::write(&config, "workers = 1\n")?;

    dropwatch()?
        .current_dir(dir.path())
        .args(["watch", "--config"])
        .arg(&config)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("No directories to watch"));
    Ok(())
}

#[test]
fn watch_with_missing_config_fails() -> TestResult {
    let dir = TempDir::new()?;

    dropwatch()?
        .args(["watch", "--config"])
        .arg(dir.path().join("missing.toml"))
        .arg(dir.path())
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Config file not found"));
    Ok(())
}

#[test]
fn watch_with_unparsable_config_fails() -> TestResult {
    let dir = TempDir::new()?;
    let config = dir.path().join("bad.toml");
    fs::write(&config, "workers = \"lots\"\n")?;

    dropwatch()?
        .args(["watch", "--config"])
        .arg(&config)
        .arg(dir.path())
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Config error"));
    Ok(())
}

#[test]
fn watch_with_missing_root_fails() -> TestResult {
    let dir = TempDir::new()?;
    let config = dir.path().join("dropwatch.toml");
    fs::write(&config, "")?;

    dropwatch()?
        .args(["watch", "--config"])
        .arg(&config)
        .arg(dir.path().join("not-there"))
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Failed to resolve"));
    Ok(())
}

fn wait_for(path: &Path, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if path.exists() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    false
}

#[cfg(target_os = "linux")]
#[test]
fn watch_runs_command_for_ready_file() -> TestResult {
    let inbox = TempDir::new()?;
    let library = TempDir::new()?;
    let work = TempDir::new()?;

    let config = work.path().join("dropwatch.toml");
    fs::write(
        &config,
        format!(
            "workers = 2\n\
             debounce_ms = 100\n\
             stability_interval_ms = 100\n\
             stability_checks = 2\n\
             \n\
             [handler]\n\
             command = \"cp\"\n\
             args = [\"-t\", \"{}\"]\n",
            library.path().display()
        ),
    )?;

    let bin = assert_cmd::cargo::cargo_bin("dropwatch");
    let mut child = std::process::Command::new(bin)
        .current_dir(work.path())
        .env_remove("RUST_LOG")
        .args(["--quiet", "watch", "--config"])
        .arg(&config)
        .arg(inbox.path())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()?;

    // Give the watcher time to register before dropping a file in.
    std::thread::sleep(Duration::from_millis(500));
    fs::write(inbox.path().join("album.zip"), vec![7u8; 2048])?;

    let imported = library.path().join("album.zip");
    let found = wait_for(&imported, Duration::from_secs(10));

    child.kill()?;
    child.wait()?;

    assert!(found, "handler never copied the ready file");
    assert_eq!(fs::read(&imported)?.len(), 2048);
    Ok(())
}
