//! CLI integration tests for sluice.
//!
//! These tests cover argument parsing, help output, offline subcommands
//! and exit codes for configuration errors.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;

/// Get a command for the sluice binary.
fn cmd() -> Command {
    Command::cargo_bin("sluice").unwrap()
}

const VALID_CONFIG: &str = r#"
source:
  type: postgres
  host: localhost
  username: etl
  database: ops
  queries:
    extract: SELECT * FROM orders WHERE region = '{region}'
    extract_params:
      region: emea
    iterate: SELECT id FROM batches
target:
  type: redshift
  host: warehouse
  username: loader
  database: dw
  schema: sales
  table: orders
load:
  conflict_key: [id]
  conflict_action: update
"#;

fn config_file(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "{}", contents).unwrap();
    file
}

// =============================================================================
// Help and Version Tests
// =============================================================================

#[test]
fn test_help_shows_all_commands() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("validate"))
        .stdout(predicate::str::contains("health-check"))
        .stdout(predicate::str::contains("queries"));
}

#[test]
fn test_run_subcommand_help() {
    cmd()
        .args(["run", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--dump-csv"))
        .stdout(predicate::str::contains("--chunk-size"));
}

#[test]
fn test_version_flag() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("sluice"));
}

#[test]
fn test_global_flag_defaults() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--run-id"))
        .stdout(predicate::str::contains("--output-json"))
        .stdout(predicate::str::contains("[default: config.yaml]"))
        .stdout(predicate::str::contains("[default: text]"))
        .stdout(predicate::str::contains("[default: info]"));
}

#[test]
fn test_no_subcommand_shows_help() {
    cmd()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage:"));
}

// =============================================================================
// Offline Subcommands
// =============================================================================

#[test]
fn test_validate_accepts_valid_config() {
    let file = config_file(VALID_CONFIG);
    cmd()
        .args(["--config", file.path().to_str().unwrap(), "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid"))
        .stdout(predicate::str::contains("sales.orders"));
}

#[test]
fn test_validate_json_output() {
    let file = config_file(VALID_CONFIG);
    cmd()
        .args(["--config", file.path().to_str().unwrap(), "--output-json", "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"valid\": true"))
        .stdout(predicate::str::contains("\"config_hash\""));
}

#[test]
fn test_queries_resolves_configured_params() {
    let file = config_file(VALID_CONFIG);
    cmd()
        .args(["--config", file.path().to_str().unwrap(), "queries"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[extract]"))
        .stdout(predicate::str::contains("WHERE region = 'emea'"))
        .stdout(predicate::str::contains("[iterate]"))
        .stdout(predicate::str::contains("extract_params").not());
}

// =============================================================================
// Exit Code Tests
// =============================================================================

#[test]
fn test_missing_config_exits_with_code_1() {
    // A missing file is an IO error, not a configuration error
    cmd()
        .args(["--config", "nonexistent_config_file.yaml", "validate"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("IO error"));
}

#[test]
fn test_invalid_yaml_exits_with_code_2() {
    let file = config_file("invalid: yaml: content: [\n");
    cmd()
        .args(["--config", file.path().to_str().unwrap(), "validate"])
        .assert()
        .code(2);
}

#[test]
fn test_update_without_key_exits_with_code_2() {
    let yaml = VALID_CONFIG.replace("  conflict_key: [id]\n", "");
    let file = config_file(&yaml);
    cmd()
        .args(["--config", file.path().to_str().unwrap(), "validate"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("conflict_key must be specified"));
}

#[test]
fn test_unknown_backend_exits_with_code_2() {
    let yaml = VALID_CONFIG.replace("type: redshift", "type: oracle");
    let file = config_file(&yaml);
    cmd()
        .args(["--config", file.path().to_str().unwrap(), "validate"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("oracle"));
}

#[test]
fn test_missing_extract_query_exits_with_code_2() {
    let yaml = VALID_CONFIG.replace("    extract: SELECT", "    other: SELECT");
    let file = config_file(&yaml);
    cmd()
        .args(["--config", file.path().to_str().unwrap(), "validate"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Query not found: 'extract'"));
}
