//! Tests for configuration loading.

use std::fs;

use psachecker::config::{load_config, load_or_default, parse_config, Config, LogFormat};
use psachecker::types::PolicyVersion;

#[test]
fn parse_full_config() {
    let toml_str = r#"
[policy]
version = "v1.25"

[evaluation]
max_concurrent_resources = 2
timeout_secs = 30

[logging]
level = "debug"
format = "json"
"#;
    let config = parse_config(toml_str).expect("should parse");
    assert_eq!(
        config.policy.version,
        PolicyVersion::Pinned {
            major: 1,
            minor: 25
        }
    );
    assert_eq!(config.evaluation.max_concurrent_resources, 2);
    assert_eq!(config.evaluation.timeout_secs, 30);
    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.logging.format, LogFormat::Json);
}

#[test]
fn partial_sections_keep_defaults() {
    let config = parse_config("[evaluation]\ntimeout_secs = 5\n").expect("should parse");
    assert_eq!(config.evaluation.max_concurrent_resources, 8);
    assert_eq!(config.policy.version, PolicyVersion::Latest);
    assert_eq!(config.logging.format, LogFormat::Text);
}

#[test]
fn invalid_version_is_rejected() {
    assert!(parse_config("[policy]\nversion = \"1.25\"\n").is_err());
}

#[test]
fn zero_concurrency_is_rejected() {
    assert!(parse_config("[evaluation]\nmax_concurrent_resources = 0\n").is_err());
}

#[test]
fn unknown_fields_are_rejected() {
    assert!(parse_config("[evaluation]\nworkers = 4\n").is_err());
}

#[test]
fn load_from_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("config.toml");
    fs::write(&path, "[logging]\nlevel = \"info\"\n").expect("write config");
    let config = load_config(&path).expect("loads");
    assert_eq!(config.logging.level, "info");
    assert_eq!(load_or_default(Some(&path)).expect("loads"), config);
}

#[test]
fn explicit_missing_file_is_an_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = load_or_default(Some(&dir.path().join("absent.toml"))).expect_err("missing");
    assert!(err.to_string().contains("absent.toml"));
}

#[test]
fn defaults_match_documentation() {
    let config = Config::default();
    assert_eq!(config.evaluation.max_concurrent_resources, 8);
    assert_eq!(config.evaluation.timeout_secs, 0);
    assert_eq!(config.logging.level, "warn");
}
