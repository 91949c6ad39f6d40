use std::net::TcpListener;
use std::path::Path;
use std::process::{Command, Output};

use serde_json::Value;
use tempfile::TempDir;

/// Run the binary with config and data directories isolated under `home`.
fn couchctl(home: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_couchctl"))
        .args(args)
        .env("HOME", home)
        .env("XDG_DATA_HOME", home.join("data"))
        .env("XDG_CONFIG_HOME", home.join("config"))
        .env("COUCHCTL_CONFIG", home.join("config.toml"))
        .env_remove("COUCHCTL_URL")
        .env_remove("COUCHCTL_USER")
        .env_remove("COUCHCTL_PASSWORD")
        .env_remove("COUCHCTL_LOG")
        .output()
        .expect("spawn couchctl")
}

fn error_json(output: &Output) -> Value {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let line = stderr.lines().rev().find(|line| line.starts_with('{')).expect("JSON error line on stderr");
    serde_json::from_str(line).expect("stderr error is JSON")
}

fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    listener.local_addr().expect("local addr").port()
}

#[test]
fn missing_arguments_exit_with_usage_code() {
    let home = TempDir::new().unwrap();
    let output = couchctl(home.path(), &["doc", "get"]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn unreachable_server_exits_with_server_down_code() {
    let home = TempDir::new().unwrap();
    let url = format!("http://127.0.0.1:{}", closed_port());
    let output = couchctl(home.path(), &["--url", &url, "--json", "db", "list"]);

    assert_eq!(output.status.code(), Some(10));
    assert!(output.stdout.is_empty());
    let error = error_json(&output);
    assert_eq!(error["error"]["code"], "SERVER_NOT_REACHABLE");
    assert!(error["error"]["message"].as_str().unwrap().contains("couchctl local start"));
}

#[test]
fn invalid_config_file_is_reported() {
    let home = TempDir::new().unwrap();
    std::fs::write(home.path().join("config.toml"), "[local]\nadmin_pass = \"secret\"\n").unwrap();

    let output = couchctl(home.path(), &["--json", "info"]);
    assert_eq!(output.status.code(), Some(1));
    let error = error_json(&output);
    assert!(error["error"]["message"].as_str().unwrap().contains("config"));
}

#[cfg(target_os = "linux")]
#[test]
fn stopping_an_unknown_instance_fails_without_creating_state() {
    let home = TempDir::new().unwrap();
    let output = couchctl(home.path(), &["--json", "local", "stop", "--instance", "ghost"]);

    assert_eq!(output.status.code(), Some(1));
    assert_eq!(error_json(&output)["error"]["code"], "NOT_RUNNING");
    assert!(!home.path().join("data").join("couchctl").join("state").exists());
}

#[cfg(target_os = "linux")]
#[test]
fn status_of_unknown_instance_reports_stopped() {
    let home = TempDir::new().unwrap();
    let output = couchctl(home.path(), &["--json", "local", "status"]);

    assert_eq!(output.status.code(), Some(0));
    let status: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(status["instance"], "default");
    assert_eq!(status["lifecycle"], "stopped");
    assert_eq!(status["running"], false);
}
