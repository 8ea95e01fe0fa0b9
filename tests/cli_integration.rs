// CLI integration tests: exit codes and output formats.
use std::path::{Path, PathBuf};
use std::process::Command;

use serde_json::Value;

fn cmd() -> Command {
    let exe = env!("CARGO_BIN_EXE_p11probe");
    let mut command = Command::new(exe);
    command.env_remove("P11PROBE_MODULE").env_remove("RUST_LOG");
    command
}

fn fixture(stem: &str) -> Option<PathBuf> {
    let Some(dir) = option_env!("P11PROBE_FIXTURE_DIR") else {
        eprintln!("skipping: fixture providers were not built");
        return None;
    };
    Some(Path::new(dir).join(format!("lib{stem}.so")))
}

fn parse_json_line(output: &[u8]) -> Value {
    let text = String::from_utf8_lossy(output);
    let line = text.lines().next().expect("json line");
    serde_json::from_str(line).expect("valid json")
}

// Log lines may precede the error object on stderr.
fn parse_error_line(stderr: &[u8]) -> Value {
    let text = String::from_utf8_lossy(stderr);
    let line = text.lines().last().expect("error line");
    serde_json::from_str(line).expect("valid json")
}

#[test]
fn text_output_lists_fixture_token() {
    let Some(lib) = fixture("fixture_p11") else {
        return;
    };

    let output = cmd().arg(&lib).output().expect("run");

    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).expect("utf8");
    assert!(stdout.contains("Token 0x1 Info:"));
    assert!(stdout.contains("\tLabel: fixture-token"));
    assert!(stdout.contains("Slot 0x1 Info"));
    assert!(stdout.contains("\tDescription: Fixture Slot"));
}

#[test]
fn json_output_with_all_slots() {
    let Some(lib) = fixture("fixture_p11") else {
        return;
    };

    let output = cmd()
        .arg(&lib)
        .args(["--all-slots", "--json"])
        .output()
        .expect("run");

    assert!(output.status.success());
    let value = parse_json_line(&output.stdout);
    assert_eq!(value["module"], lib.display().to_string());
    assert_eq!(value["library"]["description"], "Fixture Provider");
    let slots = value["slots"].as_array().expect("slots");
    assert_eq!(slots.len(), 2);
    assert_eq!(slots[0]["token"]["model"], "FX-1");
    assert!(slots[1].get("token").is_none());
}

#[test]
fn module_from_environment() {
    let Some(lib) = fixture("fixture_p11") else {
        return;
    };

    let output = cmd()
        .env("P11PROBE_MODULE", &lib)
        .arg("--json")
        .output()
        .expect("run");

    assert!(output.status.success());
    let value = parse_json_line(&output.stdout);
    assert_eq!(value["slots"][0]["id"], 1);
}

#[test]
fn missing_module_exit_code() {
    let temp = tempfile::tempdir().expect("tempdir");
    let missing = temp.path().join("libmissing.so");

    let output = cmd().arg(&missing).output().expect("run");

    assert_eq!(output.status.code().unwrap(), 1);
    let err = parse_error_line(&output.stderr);
    assert_eq!(err["error"]["kind"], "Probe");
    assert_eq!(err["error"]["path"], missing.display().to_string());
}

#[test]
fn exhausted_candidates_exit_code() {
    let temp = tempfile::tempdir().expect("tempdir");

    let output = cmd()
        .arg("--candidate")
        .arg(temp.path().join("liba.so"))
        .arg("--candidate")
        .arg(temp.path().join("libb.so"))
        .output()
        .expect("run");

    assert_eq!(output.status.code().unwrap(), 1);
    let err = parse_error_line(&output.stderr);
    let message = err["error"]["message"].as_str().expect("message");
    assert!(message.contains("liba.so"));
    assert!(message.contains("libb.so"));
}

#[test]
fn entry_point_failure_exit_code() {
    let Some(lib) = fixture("fixture_p11_fails") else {
        return;
    };

    let output = cmd().arg(&lib).output().expect("run");

    assert_eq!(output.status.code().unwrap(), 1);
    let err = parse_error_line(&output.stderr);
    assert_eq!(err["error"]["symbol"], "C_GetFunctionList");
    assert_eq!(err["error"]["rv"], 5);
}

#[test]
fn usage_exit_code() {
    let output = cmd().arg("--no-such-flag").output().expect("run");
    assert_eq!(output.status.code().unwrap(), 2);
    let err = parse_error_line(&output.stderr);
    assert_eq!(err["error"]["kind"], "Usage");
}
