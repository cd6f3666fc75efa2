#![cfg(all(unix, feature = "cli"))]

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = PathBuf::from(format!(
        "/tmp/pccli-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

fn spawn_loopback(sock_path: &Path, extra: &[&str]) -> Child {
    let child = Command::new(env!("CARGO_BIN_EXE_polycrypt"))
        .arg("--log-level")
        .arg("error")
        .arg("loopback")
        .arg(sock_path)
        .args(extra)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .expect("loopback command should start");

    let start = Instant::now();
    while !sock_path.exists() {
        assert!(
            start.elapsed() < Duration::from_secs(3),
            "loopback backend did not bind in time"
        );
        thread::sleep(Duration::from_millis(25));
    }
    child
}

fn run_cli(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_polycrypt"))
        .arg("--log-level")
        .arg("error")
        .args(args)
        .output()
        .expect("run command should execute")
}

fn wait_for_exit(child: &mut Child, timeout: Duration) -> std::process::ExitStatus {
    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait().expect("child status should be readable") {
            return status;
        }
        if start.elapsed() >= timeout {
            let _ = child.kill();
            panic!("loopback backend did not exit in time");
        }
        thread::sleep(Duration::from_millis(25));
    }
}

#[test]
fn digest_round_trip_through_loopback_backend() {
    let dir = unique_temp_dir("digest");
    let sock_path = dir.join("loopback.sock");
    let mut backend = spawn_loopback(&sock_path, &["--once"]);
    let sock = sock_path.to_str().expect("socket path should be utf-8");

    let output = run_cli(&[
        "--format",
        "json",
        "run",
        sock,
        "--op",
        "digest",
        "--algorithm",
        "SHA-256",
        "--data",
        "hello",
        "--chunk-size",
        "2",
        "--timeout",
        "5s",
    ]);
    assert!(
        output.status.success(),
        "run failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let report: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("json report should parse");
    assert_eq!(report["operation"], "digest");
    assert_eq!(report["status"], "completed");
    assert_eq!(report["result_hex"], "68656c6c6f");
    assert_eq!(report["result_size"], 5);

    let status = wait_for_exit(&mut backend, Duration::from_secs(3));
    assert!(status.success());
    assert!(!sock_path.exists(), "socket should be removed on exit");
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn raw_output_writes_result_bytes() {
    let dir = unique_temp_dir("raw");
    let sock_path = dir.join("loopback.sock");
    let input = dir.join("input.bin");
    std::fs::write(&input, [0u8, 159, 146, 150]).expect("input should be writable");
    let mut backend = spawn_loopback(&sock_path, &["--once"]);

    let output = run_cli(&[
        "--format",
        "raw",
        "run",
        sock_path.to_str().expect("socket path should be utf-8"),
        "--op",
        "encrypt",
        "--algorithm",
        r#"{"name": "AES-GCM"}"#,
        "--key",
        r#"{"handle": "k"}"#,
        "--file",
        input.to_str().expect("input path should be utf-8"),
    ]);
    assert!(output.status.success());
    assert_eq!(output.stdout, vec![0u8, 159, 146, 150]);

    wait_for_exit(&mut backend, Duration::from_secs(3));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn request_schema_rejection_fails_the_run() {
    let dir = unique_temp_dir("schema");
    let sock_path = dir.join("loopback.sock");
    let schema_dir = dir.join("schemas");
    std::fs::create_dir_all(&schema_dir).expect("schema dir should be creatable");
    std::fs::write(
        schema_dir.join("create.schema.json"),
        r#"{
            "type": "object",
            "additionalProperties": true,
            "properties": {
                "args": {
                    "type": "object",
                    "additionalProperties": true,
                    "properties": { "algorithm": { "enum": ["SHA-256"] } }
                }
            }
        }"#,
    )
    .expect("schema file should be writable");

    let mut backend = spawn_loopback(
        &sock_path,
        &["--once", "--validate", schema_dir.to_str().expect("utf-8 path")],
    );

    let output = run_cli(&[
        "run",
        sock_path.to_str().expect("socket path should be utf-8"),
        "--op",
        "digest",
        "--algorithm",
        "MD5",
        "--data",
        "x",
    ]);
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("operation failed"), "stderr: {stderr}");
    assert!(
        stderr.contains("validation failed for 'create'"),
        "stderr: {stderr}"
    );
    assert!(!stderr.contains("unspecified backend error"), "stderr: {stderr}");

    wait_for_exit(&mut backend, Duration::from_secs(3));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn run_without_backend_is_transport_error() {
    let dir = unique_temp_dir("absent");
    let sock_path = dir.join("absent.sock");

    let output = run_cli(&[
        "run",
        sock_path.to_str().expect("socket path should be utf-8"),
        "--op",
        "digest",
        "--algorithm",
        "SHA-256",
    ]);
    assert_eq!(output.status.code(), Some(3));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn invalid_signature_hex_is_usage_error() {
    let output = run_cli(&[
        "run",
        "/tmp/never-used.sock",
        "--op",
        "verify",
        "--algorithm",
        "HMAC",
        "--signature",
        "not-hex",
    ]);
    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn version_reports_protocol_marker() {
    let output = run_cli(&["version", "--extended"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("name: polycrypt"));
    assert!(stdout.contains("protocol_marker: PolyCrypt-21A30E0E-1048-4ED0-BF7A-B1E01CA328E9"));
}
