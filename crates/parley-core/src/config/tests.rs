use super::*;
use crate::llm::resolve::ProviderKind;
use crate::operate::Turns;
use serial_test::serial;
use std::io::Write;
use tempfile::NamedTempFile;

const FULL_CONFIG: &str = r#"
llm:
  provider: anthropic
  model: claude-sonnet-4-20250514
  auth:
    api_key_env: PARLEY_TEST_ANTHROPIC_KEY
  max_tokens: 2048
  temperature: 0.2
retry:
  initial_delay_ms: 500
  max_delay_ms: 8000
  backoff_factor: 3.0
  max_retries: 4
turns: 5
fallback:
  - provider: openai
    model: gpt-4.1
  - provider: openrouter
logging:
  level: debug
"#;

#[test]
fn test_parse_full_config() {
    let config = ConfigLoader::from_str(FULL_CONFIG).unwrap();

    assert_eq!(config.llm.provider.as_deref(), Some("anthropic"));
    assert_eq!(config.llm.max_tokens, Some(2048));
    assert_eq!(config.retry.max_retries, 4);
    assert_eq!(config.retry.to_policy().delay_for_attempt(2), 4500);
    assert_eq!(config.turns, Some(Turns::Limit(5)));
    assert_eq!(config.fallback.len(), 2);
    assert_eq!(config.fallback[1], FallbackEntry::new("openrouter", None));
    assert_eq!(config.logging.level, "debug");
}

#[test]
fn test_defaults_apply_to_empty_document() {
    let config = ConfigLoader::from_str("{}").unwrap();

    assert_eq!(config.retry, RetryConfig::default());
    assert_eq!(config.retry.initial_delay_ms, 1000);
    assert_eq!(config.retry.max_delay_ms, 32000);
    assert!(config.fallback.is_empty());
    assert_eq!(config.logging.level, "info");
    assert!(config.turns.is_none());
}

#[test]
fn test_turns_accepts_boolean() {
    let config = ConfigLoader::from_str("turns: false").unwrap();
    assert_eq!(config.turns.map(|t| t.max_turns()), Some(1));
}

#[test]
fn test_rejects_bad_retry_values() {
    let err = ConfigLoader::from_str("retry: { backoff_factor: 0.5 }").unwrap_err();
    assert!(err.to_string().contains("backoff_factor"));

    let err = ConfigLoader::from_str("retry: { initial_delay_ms: 5000, max_delay_ms: 100 }")
        .unwrap_err();
    assert!(err.to_string().contains("initial_delay_ms"));
}

#[test]
fn test_rejects_unknown_providers() {
    let err = ConfigLoader::from_str("llm: { provider: watsonx }").unwrap_err();
    assert!(matches!(err, LlmError::Config(_)));

    let err = ConfigLoader::from_str("fallback:\n  - provider: nope\n").unwrap_err();
    assert!(err.to_string().contains("fallback[0]"));
}

#[test]
fn test_rejects_unknown_log_level() {
    assert!(ConfigLoader::from_str("logging: { level: loud }").is_err());
}

#[tokio::test]
async fn test_load_from_file() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(FULL_CONFIG.as_bytes()).unwrap();

    let config = load_config(file.path()).await.unwrap();
    assert_eq!(config.llm.model.as_deref(), Some("claude-sonnet-4-20250514"));
}

#[tokio::test]
async fn test_missing_file_is_config_error() {
    let err = load_config("/definitely/not/here.yaml").await.unwrap_err();
    assert!(matches!(err, LlmError::Config(_)));
}

#[test]
#[serial]
fn test_api_key_resolution_order() {
    std::env::set_var("PARLEY_TEST_KEY", "from-env");
    std::env::set_var("OPENROUTER_API_KEY", "from-default");

    let literal = LlmAuth {
        api_key: Some("literal".to_string()),
        api_key_env: Some("PARLEY_TEST_KEY".to_string()),
    };
    assert_eq!(resolve_api_key(ProviderKind::OpenRouter, &literal).unwrap(), "literal");

    let named = LlmAuth {
        api_key: None,
        api_key_env: Some("PARLEY_TEST_KEY".to_string()),
    };
    assert_eq!(resolve_api_key(ProviderKind::OpenRouter, &named).unwrap(), "from-env");

    assert_eq!(
        resolve_api_key(ProviderKind::OpenRouter, &LlmAuth::default()).unwrap(),
        "from-default"
    );

    std::env::remove_var("PARLEY_TEST_KEY");
    std::env::remove_var("OPENROUTER_API_KEY");
}

#[test]
#[serial]
fn test_missing_api_key_names_variables() {
    std::env::remove_var("GEMINI_API_KEY");
    std::env::remove_var("GOOGLE_API_KEY");

    let err = resolve_api_key(ProviderKind::Gemini, &LlmAuth::default()).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("GEMINI_API_KEY"));
    assert!(message.contains("GOOGLE_API_KEY"));

    let named = LlmAuth {
        api_key: None,
        api_key_env: Some("PARLEY_UNSET_VARIABLE".to_string()),
    };
    assert!(resolve_api_key(ProviderKind::Gemini, &named)
        .unwrap_err()
        .to_string()
        .contains("PARLEY_UNSET_VARIABLE"));
}
