//! # LLM Test Generation
//!
//! Generates JUnit tests for a Java class, method or line with a language
//! model, then validates every candidate by compiling it, running it on its
//! own under the JaCoCo agent and reading back the covered lines.
//!
//! ## Architecture
//!
//! ```text
//! SourceIndex → context → prompt → llm (provider) → build (javac/java)
//!                                                      ↓
//!                          ResultListener ← report ← coverage (JaCoCo XML)
//!                                             ↓
//!                                       SQLite (history)
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use llm_testgen::build::{BuildAndRunEngine, SystemCommandRunner};
//! use llm_testgen::context::CodeFragmentTarget;
//! use llm_testgen::llm::resolve_provider;
//! use llm_testgen::pipeline::{
//!     CancellationFlag, GenerationPipeline, GenerationRequest, LogProgress, SessionContext,
//! };
//! use llm_testgen::source::SourceIndex;
//! use llm_testgen::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let index = Arc::new(SourceIndex::scan(&["src/main/java".into()])?);
//!     let provider = resolve_provider(&config.llm, config.request.clone())?;
//!     let engine = BuildAndRunEngine::new(config.toolchain.clone(), Arc::new(SystemCommandRunner));
//!     let pipeline =
//!         GenerationPipeline::new(index, provider, &config.llm.api_key, engine, config.generation);
//!
//!     let mut session = SessionContext::new(
//!         &config.toolchain.results_dir,
//!         CancellationFlag::new(),
//!         Arc::new(LogProgress),
//!     );
//!     let request = GenerationRequest {
//!         class_fqn: "pkg.Calc".into(),
//!         target: CodeFragmentTarget::Method("add(int,int)".into()),
//!         classpath: "build/classes".into(),
//!         class_files: "build/classes".into(),
//!     };
//!     let outcome = pipeline.run(&request, &mut session).await?;
//!     println!("{} tests collected", outcome.report.len());
//!     Ok(())
//! }
//! ```

/// Compiling and running generated tests.
pub mod build;
/// Configuration loaded from the environment.
pub mod config;
/// Context selection over the type hierarchy.
pub mod context;
/// Coverage extraction from JaCoCo reports and stack traces.
pub mod coverage;
/// Error types and result aliases for the application.
pub mod error;
/// Generation providers, conversation and response assembly.
pub mod llm;
/// Session orchestration.
pub mod pipeline;
/// Bounded-size request rendering.
pub mod prompt;
/// Prompt wording.
pub mod prompts;
/// Coverage report and passing-test set.
pub mod report;
/// Search-based generator adapter.
pub mod search;
/// Java source index.
pub mod source;
/// SQLite storage layer for session history.
pub mod storage;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use pipeline::{GenerationOutcome, GenerationPipeline, GenerationRequest};
