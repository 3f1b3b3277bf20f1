use std::env;
use std::path::PathBuf;

use crate::error::AppError;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub llm: LlmConfig,
    pub generation: GenerationConfig,
    pub toolchain: ToolchainConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub request: RequestConfig,
    pub search: SearchConfig,
}

/// Generation provider configuration
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub provider: ProviderKind,
}

/// Which provider implementation serves generation requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    /// HTTP chat-completions provider
    Default,
    /// Licensed provider, only usable when linked into the build
    Premium,
}

/// Prompt sizing and request policy
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub max_poly_depth: u32,
    pub max_input_params_depth: u32,
    pub prompt_max_chars: usize,
    pub max_requests: u32,
}

/// JDK and library locations used to compile and run generated tests
#[derive(Debug, Clone)]
pub struct ToolchainConfig {
    pub java_home: PathBuf,
    pub lib_dir: PathBuf,
    pub process_timeout_ms: u64,
    pub results_dir: PathBuf,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: u32,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// HTTP request configuration
#[derive(Debug, Clone)]
pub struct RequestConfig {
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

/// Search-based generator configuration
#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub jar: Option<PathBuf>,
    pub poll_interval_ms: u64,
    pub timeout_ms: u64,
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let llm = LlmConfig {
            api_key: env::var("LLM_API_KEY").unwrap_or_default(),
            base_url: env::var("LLM_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com".to_string()),
            model: env::var("LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            provider: match env::var("LLM_PROVIDER")
                .unwrap_or_else(|_| "default".to_string())
                .to_lowercase()
                .as_str()
            {
                "default" => ProviderKind::Default,
                "premium" => ProviderKind::Premium,
                other => {
                    return Err(AppError::Config {
                        message: format!("Unknown LLM_PROVIDER: {}", other),
                    })
                }
            },
        };

        let generation = GenerationConfig {
            max_poly_depth: parse_env("MAX_POLY_DEPTH", 2),
            max_input_params_depth: parse_env("MAX_INPUT_PARAMS_DEPTH", 2),
            prompt_max_chars: parse_env("PROMPT_MAX_CHARS", 12000),
            max_requests: parse_env("MAX_REQUESTS", 1),
        };

        if generation.max_poly_depth == 0 || generation.max_input_params_depth == 0 {
            return Err(AppError::Config {
                message: "MAX_POLY_DEPTH and MAX_INPUT_PARAMS_DEPTH must be at least 1".to_string(),
            });
        }

        let toolchain = ToolchainConfig {
            java_home: PathBuf::from(env::var("JAVA_HOME").unwrap_or_default()),
            lib_dir: PathBuf::from(env::var("TOOLCHAIN_LIB_DIR").unwrap_or_else(|_| "./lib".to_string())),
            process_timeout_ms: parse_env("PROCESS_TIMEOUT_MS", 30000),
            results_dir: env::var("RESULTS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| env::temp_dir().join("llm-testgen-results")),
        };

        let database = DatabaseConfig {
            path: PathBuf::from(
                env::var("DATABASE_PATH").unwrap_or_else(|_| "./data/testgen.db".to_string()),
            ),
            max_connections: parse_env("DATABASE_MAX_CONNECTIONS", 5),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        let request = RequestConfig {
            timeout_ms: parse_env("REQUEST_TIMEOUT_MS", 60000),
            max_retries: parse_env("MAX_RETRIES", 0),
            retry_delay_ms: parse_env("RETRY_DELAY_MS", 1000),
        };

        let search = SearchConfig {
            jar: env::var("SEARCH_GENERATOR_JAR").ok().map(PathBuf::from),
            poll_interval_ms: parse_env("SEARCH_POLL_INTERVAL_MS", 500),
            timeout_ms: parse_env("SEARCH_TIMEOUT_MS", 600_000),
        };

        Ok(Config {
            llm,
            generation,
            toolchain,
            database,
            logging,
            request,
            search,
        })
    }
}

impl LlmConfig {
    /// Whether a credential has been configured
    pub fn is_token_set(&self) -> bool {
        !self.api_key.trim().is_empty()
    }
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 60000,
            max_retries: 0,
            retry_delay_ms: 1000,
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_poly_depth: 2,
            max_input_params_depth: 2,
            prompt_max_chars: 12000,
            max_requests: 1,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            jar: None,
            poll_interval_ms: 500,
            timeout_ms: 600_000,
        }
    }
}

impl ToolchainConfig {
    /// Absolute path of a bundled library jar
    pub fn library(&self, name: &str) -> PathBuf {
        self.lib_dir.join(name)
    }

    /// Classpath for compiling and running generated tests against the project build output.
    pub fn test_classpath(&self, build_path: &str) -> String {
        let libs = [
            "junit-4.13.jar",
            "hamcrest-core-1.3.jar",
            "mockito-core-5.0.0.jar",
        ];
        let mut entries: Vec<String> = libs
            .iter()
            .map(|lib| self.library(lib).display().to_string())
            .collect();
        entries.push(build_path.to_string());
        entries.join(CLASSPATH_SEPARATOR)
    }
}

/// Platform classpath separator
#[cfg(windows)]
pub const CLASSPATH_SEPARATOR: &str = ";";
/// Platform classpath separator
#[cfg(not(windows))]
pub const CLASSPATH_SEPARATOR: &str = ":";
