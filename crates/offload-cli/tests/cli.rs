//! Runs the `offload` binary against temporary manifests.

use std::io::Write;
use std::process::{Command, Output};

use tempfile::NamedTempFile;

const MANIFEST: &str = r#"{
    "maxWorkers": 2,
    "functions": [
        { "name": "double", "body": "x => x * 2" },
        { "name": "greet", "body": "(who) => ({ greeting: 'hello ' + who.name })" },
        { "name": "fail", "body": "() => { throw new TypeError('bad input'); }" }
    ]
}"#;

fn manifest() -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(MANIFEST.as_bytes()).unwrap();
    file
}

fn offload(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_offload"))
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run offload")
}

#[test]
fn call_prints_raw_json() {
    let file = manifest();
    let output = offload(&["call", "-m", file.path().to_str().unwrap(), "double", "[21]"]);

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "42");
}

#[test]
fn call_with_object_argument() {
    let file = manifest();
    let output = offload(&[
        "call",
        "-m",
        file.path().to_str().unwrap(),
        "greet",
        r#"{"name": "world"}"#,
    ]);

    assert!(output.status.success());
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value, serde_json::json!({"greeting": "hello world"}));
}

#[test]
fn call_failure_exits_non_zero() {
    let file = manifest();
    let output = offload(&["call", "-m", file.path().to_str().unwrap(), "fail"]);

    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
    assert!(String::from_utf8_lossy(&output.stderr).contains("TypeError: bad input"));
}

#[test]
fn call_unknown_function() {
    let file = manifest();
    let output = offload(&["call", "-m", file.path().to_str().unwrap(), "missing"]);

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Unknown function: missing"));
}

#[test]
fn watch_reports_final_stats() {
    let file = manifest();
    let output = offload(&[
        "watch",
        "-m",
        file.path().to_str().unwrap(),
        "-n",
        "6",
        "-i",
        "20",
        "double",
        "[4]",
    ]);

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("completed 6 | failed 0"), "stdout: {}", stdout);
    assert!(stdout.lines().any(|line| line.starts_with("double")));
}

#[test]
fn program_prints_function_table() {
    let file = manifest();
    let output = offload(&["program", "-m", file.path().to_str().unwrap()]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("// offload worker program v3"));
    assert!(stdout.contains("\"double\": ("));
    assert!(stdout.contains("var deps = {};"));
}
