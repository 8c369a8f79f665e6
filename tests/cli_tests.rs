//! CLI integration tests for the alertwire binary
//!
//! These tests run the compiled binary. Legacy deployment variables are
//! removed from the child environment so the host cannot leak settings in.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;
use tempfile::NamedTempFile;

const LEGACY_VARS: [&str; 5] = [
    "ELASTIC_HOST",
    "ELASTIC_USER",
    "ELASTIC_PASS",
    "TELEGRAM_BOT_TOKEN",
    "TELEGRAM_CHAT_ID",
];

/// Get a Command instance for the alertwire binary
#[allow(deprecated)]
fn alertwire_cmd() -> Command {
    let mut cmd = Command::cargo_bin("alertwire").expect("Failed to find alertwire binary");
    for var in LEGACY_VARS {
        cmd.env_remove(var);
    }
    cmd.env_remove("RUST_LOG");
    cmd
}

fn config_file(contents: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("Failed to create config file");
    file.write_all(contents.as_bytes())
        .expect("Failed to write config file");
    file
}

const VALID_CONFIG: &str = r#"
[elasticsearch]
hosts = ["http://127.0.0.1:9200"]
username = "elastic"
password = "es-secret"

[telegram]
bot_token = "123456:very-secret-token"
chat_id = "-100200300"
"#;

// ============================================================================
// --version / --help
// ============================================================================

#[test]
fn test_version_flag() {
    alertwire_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_help_lists_commands() {
    alertwire_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Delivers Elasticsearch alerts"))
        .stdout(predicate::str::contains("once"))
        .stdout(predicate::str::contains("check-config"))
        .stdout(predicate::str::contains("--dry-run"));
}

// ============================================================================
// check-config
// ============================================================================

#[test]
fn test_check_config_redacts_secrets() {
    let file = config_file(VALID_CONFIG);

    alertwire_cmd()
        .arg("check-config")
        .arg("--config")
        .arg(file.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("-100200300"))
        .stdout(predicate::str::contains("***"))
        .stdout(predicate::str::contains("very-secret-token").not())
        .stdout(predicate::str::contains("es-secret").not())
        .stderr(predicate::str::contains("Configuration is valid."));
}

#[test]
fn test_check_config_missing_file() {
    alertwire_cmd()
        .args(["check-config", "-c", "does/not/exist.toml"])
        .assert()
        .code(78)
        .stderr(predicate::str::contains("configuration file not found"));
}

#[test]
fn test_check_config_requires_telegram_credentials() {
    let file = config_file("[dispatch]\nmax_in_flight = 4\n");

    alertwire_cmd()
        .arg("check-config")
        .arg("-c")
        .arg(file.path())
        .assert()
        .code(78)
        .stderr(predicate::str::contains("telegram.bot_token is required"))
        .stderr(predicate::str::contains("telegram.chat_id is required"));
}

#[test]
fn test_check_config_dry_run_skips_telegram() {
    let file = config_file("[dispatch]\nmax_in_flight = 4\n");

    alertwire_cmd()
        .arg("check-config")
        .arg("--dry-run")
        .arg("-c")
        .arg(file.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("max_in_flight = 4"));
}

#[test]
fn test_check_config_rejects_zero_values() {
    let file = config_file(&format!(
        "{}\n[dispatch]\nmax_in_flight = 0\n\n[schedule]\ninterval_secs = 0\n",
        VALID_CONFIG
    ));

    alertwire_cmd()
        .arg("check-config")
        .arg("-c")
        .arg(file.path())
        .assert()
        .code(78)
        .stderr(predicate::str::contains("dispatch.max_in_flight"))
        .stderr(predicate::str::contains("schedule.interval_secs"));
}

#[test]
fn test_check_config_env_override() {
    let file = config_file(VALID_CONFIG);

    alertwire_cmd()
        .arg("check-config")
        .arg("-c")
        .arg(file.path())
        .env("ALERTWIRE__DISPATCH__FETCH_LIMIT", "7")
        .env("TELEGRAM_CHAT_ID", "-999")
        .assert()
        .success()
        .stdout(predicate::str::contains("fetch_limit = 7"))
        .stdout(predicate::str::contains("-999"));
}

// ============================================================================
// once
// ============================================================================

#[test]
fn test_once_reports_unreachable_cluster() {
    let file = config_file(
        "[elasticsearch]\nhosts = [\"http://127.0.0.1:1\"]\ntimeout_secs = 2\n",
    );

    alertwire_cmd()
        .arg("once")
        .arg("--dry-run")
        .arg("-c")
        .arg(file.path())
        .assert()
        .code(1)
        .stderr(predicate::str::contains(
            "The system is busy, please try again later.",
        ));
}
