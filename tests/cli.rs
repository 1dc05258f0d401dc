use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Output, Stdio};

fn bin() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_response-monitor"));
    cmd.env_remove("RESPONSE_MONITOR_LOG");
    cmd
}

/// Config path that does not exist, so defaults apply.
fn scratch_config(name: &str) -> PathBuf {
    std::env::temp_dir()
        .join(format!("response-monitor-cli-{}", std::process::id()))
        .join(name)
}

fn classify(stdin: &str, content_type: Option<&str>) -> serde_json::Value {
    let config = scratch_config("classify.yaml");
    let mut cmd = bin();
    cmd.arg("--config").arg(&config).arg("classify");
    if let Some(ct) = content_type {
        cmd.args(["--content-type", ct]);
    }
    let mut child = cmd
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    child
        .stdin
        .take()
        .unwrap()
        .write_all(stdin.as_bytes())
        .unwrap();
    let output: Output = child.wait_with_output().unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    serde_json::from_slice(&output.stdout).unwrap()
}

#[test]
fn classify_stream_with_content() {
    let out = classify(
        "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\ndata: [DONE]\n\n",
        Some("text/event-stream"),
    );
    assert_eq!(out["hasContent"], true);
    assert_eq!(out["disguisedFailure"], false);
}

#[test]
fn classify_done_only_and_html() {
    let out = classify("data: [DONE]\n\n", None);
    assert_eq!(out["hasContent"], false);

    let out = classify("<!DOCTYPE html><html><title>Just a moment...</title>", Some("application/json"));
    assert_eq!(out["disguisedFailure"], true);

    let out = classify("{}", Some("text/html; charset=utf-8"));
    assert_eq!(out["disguisedFailure"], true);
}

#[test]
fn config_prints_defaults() {
    let output = bin()
        .arg("--config")
        .arg(scratch_config("print.yaml"))
        .arg("config")
        .output()
        .unwrap();
    assert!(output.status.success());
    let text = String::from_utf8(output.stdout).unwrap();
    assert!(text.contains("alertOnError: true"));
    assert!(text.contains("titleBlinkTimes: 6"));
}

#[test]
fn config_init_writes_file() {
    let path = scratch_config("init.yaml");
    let _ = std::fs::remove_file(&path);
    let output = bin().arg("--config").arg(&path).args(["config", "--init"]).output().unwrap();
    assert!(output.status.success());
    let written = std::fs::read_to_string(&path).unwrap();
    assert!(written.contains("enabled: true"));
    let _ = std::fs::remove_file(&path);
}

#[test]
fn success_test_alert_refused_by_default() {
    let output = bin()
        .arg("--config")
        .arg(scratch_config("alert.yaml"))
        .args(["test-alert", "--success"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("alertOnSuccess"));
}

#[test]
fn help_lists_subcommands() {
    let output = bin().arg("--help").output().unwrap();
    assert!(output.status.success());
    let text = String::from_utf8(output.stdout).unwrap();
    for sub in ["watch", "classify", "test-alert", "config"] {
        assert!(text.contains(sub), "missing {sub}");
    }
}
