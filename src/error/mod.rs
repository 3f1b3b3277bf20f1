use std::path::PathBuf;

use thiserror::Error;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Generation error: {0}")]
    Llm(#[from] LlmError),

    #[error("Build error: {0}")]
    Build(#[from] BuildError),

    #[error("Coverage error: {0}")]
    Coverage(#[from] CoverageError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Storage layer errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database connection failed: {message}")]
    Connection { message: String },

    #[error("Query failed: {message}")]
    Query { message: String },

    #[error("Session not found: {session_id}")]
    SessionNotFound { session_id: String },

    #[error("Migration failed: {message}")]
    Migration { message: String },

    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// Generation provider and response assembly errors
#[derive(Debug, Clone, Error)]
pub enum LlmError {
    #[error("{provider} test generation feature is not available in this build")]
    Unavailable { provider: String },

    #[error("Invalid credential for {provider} provided")]
    Auth { provider: String },

    #[error("{message}")]
    Transport { status: Option<u16>, message: String },

    #[error("Could not assemble tests from the response: {message}")]
    Assembly { message: String },
}

impl LlmError {
    /// Whether the error ends the generation session.
    ///
    /// Unavailable providers and rejected credentials cannot be fixed by
    /// another turn, transport and assembly failures can.
    pub fn is_terminal(&self) -> bool {
        matches!(self, LlmError::Unavailable { .. } | LlmError::Auth { .. })
    }

    /// Text shown to the user when the session stops on this error.
    pub fn user_message(&self) -> String {
        match self {
            LlmError::Transport {
                status: Some(code), ..
            } => format!("Generation request failed ({}): {}", code, self),
            LlmError::Transport { status: None, .. } => {
                format!("Generation request failed: {}", self)
            }
            _ => self.to_string(),
        }
    }

    /// Short kind tag used in logs and persisted session records.
    pub fn kind(&self) -> &'static str {
        match self {
            LlmError::Unavailable { .. } => "unavailable",
            LlmError::Auth { .. } => "auth",
            LlmError::Transport { .. } => "transport",
            LlmError::Assembly { .. } => "assembly",
        }
    }
}

/// Toolchain and process errors
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Toolchain binary '{binary}' not found under {}", home.display())]
    ToolNotFound { binary: String, home: PathBuf },

    #[error("Failed to start {program}: {message}")]
    Spawn { program: String, message: String },

    #[error("{program} did not finish within {timeout_ms}ms")]
    Timeout { program: String, timeout_ms: u64 },

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Coverage collection errors
#[derive(Debug, Error)]
pub enum CoverageError {
    #[error("Coverage report was not produced: {}", path.display())]
    ArtifactMissing { path: PathBuf },

    #[error("Malformed coverage report {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("Build error during coverage run: {0}")]
    Build(#[from] BuildError),
}

/// Session-level pipeline failures
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Type not found in source roots: {class_fqn}")]
    TypeNotFound { class_fqn: String },

    #[error("Method not found in {class_fqn}: {descriptor}")]
    MethodNotFound { class_fqn: String, descriptor: String },

    #[error("Line {line} is outside of {class_fqn}")]
    LineOutOfRange { class_fqn: String, line: u32 },

    #[error("None of the {candidates} generated test cases compiled")]
    NothingCompiled { candidates: usize },

    #[error("Generated test suite failed to compile: {output}")]
    SuiteCompilation { output: String },

    #[error("Test generation was cancelled")]
    Cancelled,

    #[error("{0}")]
    Generation(#[from] LlmError),

    #[error("{0}")]
    Coverage(#[from] CoverageError),

    #[error("{0}")]
    Build(#[from] BuildError),
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type alias for provider operations
pub type LlmResult<T> = Result<T, LlmError>;

/// Result type alias for toolchain operations
pub type BuildResult<T> = Result<T, BuildError>;

/// Result type alias for coverage collection
pub type CoverageResult<T> = Result<T, CoverageError>;

/// Result type alias for pipeline sessions
pub type PipelineResult<T> = Result<T, PipelineError>;
