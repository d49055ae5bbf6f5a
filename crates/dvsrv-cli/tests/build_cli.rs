//! Integration tests for `dvsrv build`.

use std::process::Command;
use tempfile::{tempdir, TempDir};

fn cargo_bin(cache: &TempDir) -> Command {
    let mut cmd = Command::new(env!("CARGO"));
    cmd.args(["run", "-q", "-p", "dvsrv-cli", "--bin", "dvsrv", "--"]);
    cmd.env("DVSRV_CACHE_DIR", cache.path());
    cmd.env_remove("MODE");
    cmd.env_remove("VERSION");
    cmd
}

fn project() -> TempDir {
    let dir = tempdir().unwrap();
    std::fs::write(
        dir.path().join("app.ts"),
        "import { greet } from './greet.ts';\nif (self.DEV) console.log('dev');\ngreet(self.VERSION);\n",
    )
    .unwrap();
    std::fs::write(
        dir.path().join("greet.ts"),
        "export function greet(v) { console.log('hello', v); }\n",
    )
    .unwrap();
    dir
}

#[test]
fn test_help_prints_usage_and_exits_1() {
    let cache = tempdir().unwrap();
    let output = cargo_bin(&cache)
        .args(["build", "-h"])
        .output()
        .expect("Failed to run build command");

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("usage:"), "stderr: {stderr}");
}

#[test]
fn test_build_to_stdout() {
    let dir = project();
    let cache = tempdir().unwrap();
    let output = cargo_bin(&cache)
        .env("VERSION", "1.2.3")
        .args(["build", "-q", "--cwd"])
        .arg(dir.path())
        .arg("./app.ts")
        .output()
        .expect("Failed to run build command");

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("if (false)"), "stdout: {stdout}");
    assert!(stdout.contains("greet('1.2.3')"), "stdout: {stdout}");
    assert!(stdout.contains("export function greet"), "stdout: {stdout}");
}

#[test]
fn test_build_writes_out_dir() {
    let dir = project();
    let cache = tempdir().unwrap();
    let out = dir.path().join("dist");

    let output = cargo_bin(&cache)
        .args(["build", "--cwd"])
        .arg(dir.path())
        .arg("-o")
        .arg(&out)
        .arg("./app.ts")
        .output()
        .expect("Failed to run build command");

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    assert!(output.stdout.is_empty());
    assert!(out.join("app.js").is_file());

    let chunks: Vec<_> = std::fs::read_dir(&out)
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().starts_with("chunk-"))
        .collect();
    assert_eq!(chunks.len(), 1);

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("file size:"), "stderr: {stderr}");
    assert!(stderr.contains("gzip size:"), "stderr: {stderr}");
    assert!(stderr.contains("wrote file to:"), "stderr: {stderr}");
}

#[test]
fn test_missing_entry_fails() {
    let dir = tempdir().unwrap();
    let cache = tempdir().unwrap();
    let output = cargo_bin(&cache)
        .args(["build", "-q", "--cwd"])
        .arg(dir.path())
        .arg("./missing.ts")
        .output()
        .expect("Failed to run build command");

    assert!(!output.status.success());
}
