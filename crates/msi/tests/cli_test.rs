//! Integration tests for the `msi` CLI binary.
//!
//! Argument parsing, help output, completions and error exit codes, plus a
//! probe against a local mock server. No live gateway is needed.
#![allow(clippy::unwrap_used)]

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

// ── Helpers ─────────────────────────────────────────────────────────

/// Build a [`Command`] for the `msi` binary with env isolation.
///
/// Clears all `MSI_*` env vars and points config directories at a
/// nonexistent path so tests never touch the user's real configuration.
fn msi_cmd() -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("msi");
    cmd.env("HOME", "/tmp/msi-cli-test-nonexistent")
        .env("XDG_CONFIG_HOME", "/tmp/msi-cli-test-nonexistent")
        .env_remove("MSI_PROFILE")
        .env_remove("MSI_ENV")
        .env_remove("MSI_WIDGET_URL")
        .env_remove("MSI_API_URL")
        .env_remove("MSI_ACCESS_TOKEN")
        .env_remove("MSI_OUTPUT");
    cmd
}

fn combined_output(output: &std::process::Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{stdout}{stderr}")
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let output = msi_cmd().output().unwrap();
    assert_eq!(output.status.code(), Some(2), "Expected exit code 2");
    assert!(combined_output(&output).contains("Usage"));
}

#[test]
fn test_help_lists_commands() {
    msi_cmd().arg("--help").assert().success().stdout(
        predicate::str::contains("probe")
            .and(predicate::str::contains("token"))
            .and(predicate::str::contains("orders"))
            .and(predicate::str::contains("locate")),
    );
}

#[test]
fn test_completions_bash() {
    msi_cmd()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("msi"));
}

// ── Error exit codes ────────────────────────────────────────────────

#[test]
fn test_token_without_credentials_is_auth_error() {
    let output = msi_cmd().arg("token").output().unwrap();
    assert_eq!(output.status.code(), Some(3));
    assert!(combined_output(&output).contains("No workspace configured"));
}

#[test]
fn test_orders_requires_client() {
    let output = msi_cmd()
        .args(["orders", "active", "--access-token", "tok"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("--client"));
}

#[test]
fn test_unknown_profile_is_usage_error() {
    let output = msi_cmd().args(["--profile", "ghost", "probe"]).output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("ghost"));
}

#[test]
fn test_probe_unreachable_is_connection_error() {
    let output = msi_cmd()
        .args(["probe", "--widget-url", "http://127.0.0.1:9"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(7));
}

// ── Probe against a mock gateway ────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn test_probe_reachable_prints_json() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let uri = server.uri();
    let output = tokio::task::spawn_blocking(move || {
        msi_cmd()
            .args(["probe", "--widget-url", &uri, "-o", "json-compact"])
            .output()
            .unwrap()
    })
    .await
    .unwrap();

    assert!(output.status.success(), "{}", combined_output(&output));
    assert!(String::from_utf8_lossy(&output.stdout).contains("\"reachable\":true"));
}
