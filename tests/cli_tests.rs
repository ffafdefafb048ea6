//! The `token-authorizer` binary, driven as an operator would from a shell

use std::path::Path;
use std::process::{Command, Output};

use serde_json::Value;
use tempfile::TempDir;

const MEMORY_CONFIG: &str = r#"
store:
  backend: memory
  memory:
    seed:
      - token: abc123
        client_id: tenant-42
"#;

const ARN: &str = "arn:aws:execute-api:us-east-1:123456789012:abcdef/dev/GET/health";

fn write_config(dir: &TempDir, contents: &str) -> std::path::PathBuf {
    let path = dir.path().join("authorizer.yaml");
    std::fs::write(&path, contents).unwrap();
    path
}

fn run(config: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_token-authorizer"))
        .env_remove("RUST_LOG")
        .env_remove("TOKEN_AUTHORIZER_CHECK_TOKEN")
        .args(["--config", config.to_str().unwrap(), "--log-level", "info"])
        .args(args)
        .output()
        .unwrap()
}

#[test]
fn check_prints_parseable_allow_policy() {
    let temp = TempDir::new().unwrap();
    let config = write_config(&temp, MEMORY_CONFIG);

    let out = run(&config, &["check", "abc123", "--resource", ARN]);

    assert_eq!(out.status.code(), Some(0), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    // stdout carries the policy alone; log lines go to stderr
    let policy: Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(policy["policyDocument"]["Statement"][0]["Effect"], "Allow");
    assert_eq!(policy["policyDocument"]["Statement"][0]["Resource"], ARN);
    assert_eq!(policy["usageIdentifierKey"], "tenant-42");
    assert!(String::from_utf8_lossy(&out.stderr).contains("Token authorized"));
}

#[test]
fn check_unknown_token_exits_with_deny_code() {
    let temp = TempDir::new().unwrap();
    let config = write_config(&temp, MEMORY_CONFIG);

    let out = run(&config, &["check", "wrong-token"]);

    assert_eq!(out.status.code(), Some(2));
    let policy: Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(policy["policyDocument"]["Statement"][0]["Effect"], "Deny");
    assert_eq!(policy["policyDocument"]["Statement"][0]["Resource"], "*");
}

#[test]
fn check_refuses_to_start_with_unset_env_seed() {
    let temp = TempDir::new().unwrap();
    let config = write_config(
        &temp,
        r#"
store:
  backend: memory
  memory:
    seed:
      - token: env:TOKEN_AUTHORIZER_TEST_UNSET_CLI_TOKEN
        client_id: tenant-42
"#,
    );

    let out = run(&config, &["check", "env:TOKEN_AUTHORIZER_TEST_UNSET_CLI_TOKEN"]);

    assert_eq!(out.status.code(), Some(1));
    assert!(out.stdout.is_empty());
    assert!(String::from_utf8_lossy(&out.stderr).contains("TOKEN_AUTHORIZER_TEST_UNSET_CLI_TOKEN"));
}

#[test]
fn fingerprint_prints_digest_only() {
    let temp = TempDir::new().unwrap();
    let config = write_config(&temp, MEMORY_CONFIG);

    let out = run(&config, &["fingerprint", "abc123"]);

    assert!(out.status.success());
    assert_eq!(
        String::from_utf8_lossy(&out.stdout).trim(),
        "6ca13d52ca70c883e0f0bb101e425a89e8624de51db2d2392593af6a84118090"
    );
}
