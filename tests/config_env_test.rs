//! Config environment variable tests
//!
//! These tests verify that Config::from_env() correctly reads and applies
//! environment variable overrides. Note that Config::from_env() also loads
//! from .env file via dotenvy, so these tests focus on override behavior.
//!
//! Tests use #[serial] to prevent race conditions with shared env vars.

use llm_testgen::config::{Config, LogFormat, ProviderKind};
use serial_test::serial;
use std::env;

#[test]
#[serial]
fn test_config_from_env_loads_successfully() {
    let result = Config::from_env();
    assert!(result.is_ok(), "Config::from_env() should succeed: {:?}", result.err());
}

#[test]
#[serial]
fn test_config_from_env_custom_llm() {
    env::set_var("LLM_BASE_URL", "https://custom.api.com");
    env::set_var("LLM_MODEL", "custom-model");
    env::set_var("LLM_API_KEY", "sk-test");

    let config = Config::from_env().unwrap();
    assert_eq!(config.llm.base_url, "https://custom.api.com");
    assert_eq!(config.llm.model, "custom-model");
    assert!(config.llm.is_token_set());

    env::remove_var("LLM_BASE_URL");
    env::remove_var("LLM_MODEL");
    env::remove_var("LLM_API_KEY");
}

#[test]
#[serial]
fn test_config_from_env_provider_selection() {
    env::set_var("LLM_PROVIDER", "Premium");
    let config = Config::from_env().unwrap();
    assert_eq!(config.llm.provider, ProviderKind::Premium);

    env::set_var("LLM_PROVIDER", "somewhere-else");
    assert!(Config::from_env().is_err());

    env::remove_var("LLM_PROVIDER");
}

#[test]
#[serial]
fn test_config_from_env_generation_depths() {
    env::set_var("MAX_POLY_DEPTH", "4");
    env::set_var("MAX_INPUT_PARAMS_DEPTH", "3");
    env::set_var("PROMPT_MAX_CHARS", "5000");
    env::set_var("MAX_REQUESTS", "3");

    let config = Config::from_env().unwrap();
    assert_eq!(config.generation.max_poly_depth, 4);
    assert_eq!(config.generation.max_input_params_depth, 3);
    assert_eq!(config.generation.prompt_max_chars, 5000);
    assert_eq!(config.generation.max_requests, 3);

    env::remove_var("MAX_POLY_DEPTH");
    env::remove_var("MAX_INPUT_PARAMS_DEPTH");
    env::remove_var("PROMPT_MAX_CHARS");
    env::remove_var("MAX_REQUESTS");
}

#[test]
#[serial]
fn test_config_from_env_rejects_zero_depth() {
    env::set_var("MAX_POLY_DEPTH", "0");
    assert!(Config::from_env().is_err());
    env::remove_var("MAX_POLY_DEPTH");
}

#[test]
#[serial]
fn test_config_from_env_toolchain() {
    let java_home = env::var("JAVA_HOME").ok();
    env::set_var("JAVA_HOME", "/opt/jdk");
    env::set_var("TOOLCHAIN_LIB_DIR", "/opt/libs");
    env::set_var("PROCESS_TIMEOUT_MS", "1234");
    env::set_var("RESULTS_DIR", "/tmp/custom-results");

    let config = Config::from_env().unwrap();
    assert_eq!(config.toolchain.java_home.to_str().unwrap(), "/opt/jdk");
    assert_eq!(config.toolchain.lib_dir.to_str().unwrap(), "/opt/libs");
    assert_eq!(config.toolchain.process_timeout_ms, 1234);
    assert_eq!(
        config.toolchain.results_dir.to_str().unwrap(),
        "/tmp/custom-results"
    );

    match java_home {
        Some(value) => env::set_var("JAVA_HOME", value),
        None => env::remove_var("JAVA_HOME"),
    }
    env::remove_var("TOOLCHAIN_LIB_DIR");
    env::remove_var("PROCESS_TIMEOUT_MS");
    env::remove_var("RESULTS_DIR");
}

#[test]
#[serial]
fn test_config_from_env_results_dir_default() {
    env::remove_var("RESULTS_DIR");

    let config = Config::from_env().unwrap();
    assert!(config.toolchain.results_dir.ends_with("llm-testgen-results"));
}

#[test]
#[serial]
fn test_config_from_env_custom_database() {
    env::set_var("DATABASE_PATH", "/custom/path.db");
    env::set_var("DATABASE_MAX_CONNECTIONS", "10");

    let config = Config::from_env().unwrap();
    assert_eq!(config.database.path.to_str().unwrap(), "/custom/path.db");
    assert_eq!(config.database.max_connections, 10);

    env::remove_var("DATABASE_PATH");
    env::remove_var("DATABASE_MAX_CONNECTIONS");
}

#[test]
#[serial]
fn test_config_from_env_json_log_format() {
    env::set_var("LOG_FORMAT", "json");

    let config = Config::from_env().unwrap();
    assert_eq!(config.logging.format, LogFormat::Json);

    env::remove_var("LOG_FORMAT");
}

#[test]
#[serial]
fn test_config_from_env_custom_request() {
    env::set_var("REQUEST_TIMEOUT_MS", "90000");
    env::set_var("MAX_RETRIES", "2");
    env::set_var("RETRY_DELAY_MS", "2000");

    let config = Config::from_env().unwrap();
    assert_eq!(config.request.timeout_ms, 90000);
    assert_eq!(config.request.max_retries, 2);
    assert_eq!(config.request.retry_delay_ms, 2000);

    env::remove_var("REQUEST_TIMEOUT_MS");
    env::remove_var("MAX_RETRIES");
    env::remove_var("RETRY_DELAY_MS");
}

#[test]
#[serial]
fn test_config_from_env_search() {
    env::set_var("SEARCH_GENERATOR_JAR", "/opt/generator.jar");
    env::set_var("SEARCH_POLL_INTERVAL_MS", "250");

    let config = Config::from_env().unwrap();
    assert_eq!(
        config.search.jar.as_deref().and_then(|p| p.to_str()),
        Some("/opt/generator.jar")
    );
    assert_eq!(config.search.poll_interval_ms, 250);

    env::remove_var("SEARCH_GENERATOR_JAR");
    env::remove_var("SEARCH_POLL_INTERVAL_MS");
}
