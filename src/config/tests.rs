//! Configuration tests
//!
//! Round-trip guards: every field rendered by `to_toml()` must parse back
//! through `FileConfig` and produce the same effective config.

use super::*;
use std::collections::HashMap;
use std::io::Write;

fn no_env(_: &str) -> Option<String> {
    None
}

fn env_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |name| map.get(name).cloned()
}

// ─────────────────────────────────────────────────────────────────────────────
// Round-trip tests
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_config_roundtrip_default() {
    let config = Config::default();
    let toml_str = config.to_toml();

    let parsed: Result<FileConfig, _> = toml::from_str(&toml_str);
    assert!(
        parsed.is_ok(),
        "Default config should round-trip.\nTOML:\n{}\nError: {:?}",
        toml_str,
        parsed.err()
    );

    let reloaded = Config::from_sources(parsed.unwrap(), no_env).unwrap();
    assert_eq!(reloaded.bind_addr, config.bind_addr);
    assert_eq!(reloaded.anthropic, config.anthropic);
    assert_eq!(reloaded.zai, config.zai);
    assert_eq!(reloaded.routing, config.routing);
    assert_eq!(reloaded.limits, config.limits);
    assert_eq!(reloaded.sanitize, config.sanitize);
    assert_eq!(reloaded.logging, config.logging);
    assert_eq!(reloaded.events, config.events);
}

/// Markers with quotes, backslashes and regex syntax must survive serialization
#[test]
fn test_config_roundtrip_with_awkward_markers() {
    let mut config = Config::default();
    config.routing.subagent_markers = vec![
        r#"re:^You are a "specialist"\s+agent"#.to_string(),
        "C:\\path\\marker".to_string(),
    ];
    config.routing.anthropic_markers = vec!["Plan mode is active".to_string()];
    config.zai.model = Some("glm-4.6".to_string());
    config.limits.pool_timeout = 0.5;
    config.sanitize.system_prompt_file = Some(std::path::PathBuf::from("/tmp/system.md"));

    let toml_str = config.to_toml();
    let parsed: FileConfig = toml::from_str(&toml_str)
        .unwrap_or_else(|e| panic!("should parse:\n{}\n{:?}", toml_str, e));
    let reloaded = Config::from_sources(parsed, no_env).unwrap();

    assert_eq!(reloaded.routing, config.routing);
    assert_eq!(reloaded.zai.model.as_deref(), Some("glm-4.6"));
    assert_eq!(reloaded.limits.pool_timeout, 0.5);
    assert_eq!(reloaded.sanitize.system_prompt_file, config.sanitize.system_prompt_file);
}

// ─────────────────────────────────────────────────────────────────────────────
// Merge precedence
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_partial_file_keeps_defaults() {
    let file: FileConfig = toml::from_str(
        r#"
[limits]
subagent_tool_warning = 12

[routing]
anthropic_markers = ["KEEP-ON-ANTHROPIC"]
"#,
    )
    .unwrap();
    let config = Config::from_sources(file, no_env).unwrap();

    assert_eq!(config.limits.subagent_tool_warning, 12);
    assert_eq!(config.limits.max_body_size, 52_428_800);
    assert_eq!(config.routing.anthropic_markers, vec!["KEEP-ON-ANTHROPIC"]);
    assert_eq!(
        config.routing.subagent_markers,
        RoutingConfig::default().subagent_markers
    );
}

#[test]
fn test_env_overrides_file() {
    let file: FileConfig = toml::from_str(
        r#"
[proxy]
bind_addr = "127.0.0.1:9000"

[zai]
base_url = "https://file.example"
"#,
    )
    .unwrap();
    let env = env_from(&[
        ("ZROUTE_BIND", "0.0.0.0:7000"),
        ("ZAI_BASE_URL", "http://env.example"),
        ("ZROUTE_TOOL_WARNING", "0"),
        ("ZROUTE_LOG_DIR", "/var/log/zroute"),
    ]);
    let config = Config::from_sources(file, env).unwrap();

    assert_eq!(config.bind_addr.to_string(), "0.0.0.0:7000");
    assert_eq!(config.zai.base_url, "http://env.example");
    assert_eq!(config.limits.subagent_tool_warning, 0);
    assert_eq!(config.events.dir, std::path::PathBuf::from("/var/log/zroute"));
}

#[test]
fn test_invalid_bind_is_error() {
    let env = env_from(&[("ZROUTE_BIND", "not an address")]);
    assert!(Config::from_sources(FileConfig::default(), env).is_err());
}

// ─────────────────────────────────────────────────────────────────────────────
// File loading and validation
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_missing_file_yields_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let file = Config::read_file_config(&dir.path().join("absent.toml")).unwrap();
    assert!(file.routing.is_none());
}

#[test]
fn test_malformed_file_is_error() {
    let mut tmp = tempfile::NamedTempFile::new().unwrap();
    writeln!(tmp, "[limits\nmax_body_size = ").unwrap();
    assert!(Config::read_file_config(tmp.path()).is_err());
}

#[test]
fn test_unknown_key_is_error() {
    let mut tmp = tempfile::NamedTempFile::new().unwrap();
    writeln!(tmp, "[limits]\nmax_bodysize = 10").unwrap();
    assert!(Config::read_file_config(tmp.path()).is_err());
}

#[test]
fn test_validate_rejects_bad_regex_marker() {
    let mut config = Config::default();
    config.routing.subagent_markers.push("re:([unclosed".to_string());
    assert!(config.validate().is_err());
}

#[test]
fn test_validate_rejects_zero_connections() {
    let mut config = Config::default();
    config.limits.max_connections = 0;
    assert!(config.validate().is_err());
}

#[test]
fn test_validate_rejects_connections_beyond_semaphore_capacity() {
    let mut config = Config::default();
    config.limits.max_connections = usize::MAX;
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("at most"));

    config.limits.max_connections = tokio::sync::Semaphore::MAX_PERMITS;
    config.validate().unwrap();
}

#[test]
fn test_default_config_validates() {
    Config::default().validate().unwrap();
}
