//! Integration tests for configuration loading, layering and validation

use std::fs;
use std::path::PathBuf;
use surefire_core::config::{
    load_from_file, ConfigBuilder, ConfigError, ConfigOverrides, ConfigSource, UnknownModelPolicy,
    ValidationErrorKind,
};
use surefire_core::ClientConfig;
use tempfile::TempDir;

/// Helper to create a test config file
fn create_test_file(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    path
}

#[test]
fn test_load_valid_yaml_config() {
    std::env::set_var("SUREFIRE_IT_YAML_KEY", "sk-yaml-secret-1234");

    let yaml = r#"
default_model: claude-3-opus
timeout: 30
max_retries: 5
retry_delay: 0.5
preferred_providers: [ClaudeDev, Poe]
provider_weights:
  Poe: 7
unknown_model_policy: fail_closed
api_key: ${SUREFIRE_IT_YAML_KEY}
endpoints:
  - name: local
    base_url: http://localhost:8080/v1
    models: [llama-3]
"#;

    let dir = TempDir::new().unwrap();
    let path = create_test_file(&dir, "surefire.yaml", yaml);

    let config = load_from_file(&path).unwrap();
    assert_eq!(config.default_model, "claude-3-opus");
    assert_eq!(config.timeout, 30.0);
    assert_eq!(config.retries, 5);
    assert_eq!(config.retry_delay, 0.5);
    assert_eq!(config.preferred_providers, vec!["ClaudeDev", "Poe"]);
    assert_eq!(config.provider_weights.get("Poe"), Some(&7));
    assert_eq!(config.unknown_model_policy, UnknownModelPolicy::FailClosed);
    assert_eq!(config.api_key.as_ref().unwrap().expose_secret(), "sk-yaml-secret-1234");
    assert_eq!(config.endpoints[0].models, vec!["llama-3"]);

    // Untouched keys keep their defaults
    assert_eq!(config.max_history_tokens, ClientConfig::default().max_history_tokens);

    std::env::remove_var("SUREFIRE_IT_YAML_KEY");
}

#[test]
fn test_load_valid_json_config() {
    let json = r#"{
        "default_model": "gemini",
        "retries": 2,
        "use_ai_cleaner": true,
        "context_reduction_factor": 0.5
    }"#;

    let dir = TempDir::new().unwrap();
    let path = create_test_file(&dir, "surefire.json", json);

    let config = load_from_file(&path).unwrap();
    assert_eq!(config.default_model, "gemini");
    assert_eq!(config.retries, 2);
    assert!(config.use_ai_cleaner);
    assert_eq!(config.context_reduction_factor, 0.5);
}

#[test]
fn test_empty_file_yields_defaults() {
    let dir = TempDir::new().unwrap();
    let path = create_test_file(&dir, "empty.yaml", "\n");
    assert_eq!(load_from_file(&path).unwrap(), ClientConfig::default());
}

#[test]
fn test_missing_env_var_is_reported() {
    let dir = TempDir::new().unwrap();
    let path = create_test_file(&dir, "c.yaml", "api_key: ${SUREFIRE_IT_DEFINITELY_UNSET}\n");

    match load_from_file(&path) {
        Err(ConfigError::MissingEnvVar { var }) => assert_eq!(var, "SUREFIRE_IT_DEFINITELY_UNSET"),
        other => panic!("expected MissingEnvVar, got {other:?}"),
    }
}

#[test]
fn test_unknown_key_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = create_test_file(&dir, "c.yaml", "retries: 3\nretires: 4\n");
    assert!(matches!(load_from_file(&path), Err(ConfigError::Parse { .. })));
}

#[test]
fn test_parse_error_carries_location() {
    let dir = TempDir::new().unwrap();
    let path = create_test_file(&dir, "c.json", "{\n  \"retries\": ,\n}");

    match load_from_file(&path) {
        Err(ConfigError::Parse { line, .. }) => assert_eq!(line, Some(2)),
        other => panic!("expected a parse error, got {other:?}"),
    }
}

#[test]
fn test_missing_file_is_io_error() {
    let dir = TempDir::new().unwrap();
    let result = load_from_file(dir.path().join("nope.yaml"));
    assert!(matches!(result, Err(ConfigError::Read { .. })));
}

#[test]
fn test_layer_precedence_and_provenance() {
    let dir = TempDir::new().unwrap();
    let path = create_test_file(
        &dir,
        "c.yaml",
        "retries: 4\ntimeout: 10\ndefault_model: gemini\nretry_delay: 1.5\n",
    );

    let resolved = ConfigBuilder::new()
        .file(&path)
        .object(ConfigOverrides {
            timeout: Some(20.0),
            default_model: Some("claude-3-opus".to_string()),
            ..Default::default()
        })
        .overrides(ConfigOverrides {
            default_model: Some("gpt-4o".to_string()),
            ..Default::default()
        })
        .set("max_retries", 6)
        .build()
        .unwrap();

    assert_eq!(resolved.config.retry_delay, 1.5);
    assert_eq!(resolved.config.timeout, 20.0);
    assert_eq!(resolved.config.default_model, "gpt-4o");
    assert_eq!(resolved.config.retries, 6);

    assert_eq!(resolved.source_of("retry_delay"), Some(&ConfigSource::File(path.clone())));
    assert_eq!(resolved.source_of("timeout"), Some(&ConfigSource::Object));
    assert_eq!(resolved.source_of("default_model"), Some(&ConfigSource::Overrides));
    assert_eq!(resolved.source_of("max_retries"), Some(&ConfigSource::Overrides));
    assert_eq!(resolved.source_of("log_level"), Some(&ConfigSource::Default));
}

#[test]
fn test_unknown_override_key_is_rejected() {
    let result = ConfigBuilder::new().set("retry_count", 3).build();
    assert!(matches!(result, Err(ConfigError::Override { .. })));
}

#[test]
fn test_validation_reports_field_path() {
    let result = ConfigBuilder::new().set("retry_jitter", 1.5).build();
    match result {
        Err(ConfigError::Validation(err)) => {
            assert_eq!(err.field_path, "retry_jitter");
            assert!(matches!(err.kind, ValidationErrorKind::OutOfRange { .. }));
        }
        other => panic!("expected validation error, got {other:?}"),
    }
}

#[test]
fn test_duplicate_endpoint_names_rejected() {
    let yaml = r#"
endpoints:
  - name: local
    base_url: http://localhost:1
  - name: local
    base_url: http://localhost:2
"#;
    let dir = TempDir::new().unwrap();
    let path = create_test_file(&dir, "c.yaml", yaml);

    match load_from_file(&path) {
        Err(ConfigError::Validation(err)) => {
            assert_eq!(err.field_path, "endpoints[1].name");
            assert!(matches!(err.kind, ValidationErrorKind::Duplicate { .. }));
        }
        other => panic!("expected validation error, got {other:?}"),
    }
}

#[test]
fn test_bad_proxy_scheme_rejected() {
    let result = ConfigBuilder::new().set("proxy", "ftp://proxy.local:21").build();
    match result {
        Err(ConfigError::Validation(err)) => assert_eq!(err.field_path, "proxy"),
        other => panic!("expected validation error, got {other:?}"),
    }
}

#[test]
fn test_api_key_is_redacted_in_debug() {
    let resolved = ConfigBuilder::new()
        .set("api_key", "sk-live-very-secret-value")
        .build()
        .unwrap();
    let rendered = format!("{:?}", resolved.config);
    assert!(!rendered.contains("very-secret"));
    assert!(rendered.contains("[REDACTED]"));
}
