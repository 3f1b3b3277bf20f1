use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use llm_testgen::{
    build::{BuildAndRunEngine, SystemCommandRunner},
    config::{Config, LogFormat, ProviderKind, CLASSPATH_SEPARATOR},
    context::CodeFragmentTarget,
    error::AppError,
    llm::resolve_provider,
    pipeline::{
        user_message, CancellationFlag, GenerationPipeline, GenerationRequest, LogProgress,
        SessionContext,
    },
    report::{Report, ResultListener},
    search::{ProcessSearchGenerator, ResultWatcher, SearchGenerator, SearchRequest},
    source::SourceIndex,
    storage::{SqliteStorage, Storage},
};

/// Generate and validate unit tests for Java code
#[derive(Parser)]
#[command(name = "llm-testgen", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate tests with the language model
    Generate(GenerateArgs),
    /// Generate tests with the search-based generator
    Search(SearchArgs),
    /// List recent generation sessions
    History {
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    /// Show a session and its collected test cases
    Show { session_id: String },
    /// Delete a session and its collected test cases
    Delete { session_id: String },
}

#[derive(Args)]
struct GenerateArgs {
    /// Java source root, repeatable
    #[arg(long = "source-root", required = true)]
    source_roots: Vec<PathBuf>,
    /// Project build output and dependencies
    #[arg(long)]
    classpath: String,
    /// Fully-qualified class under test
    #[arg(long = "class")]
    class_fqn: String,
    /// Method descriptor, e.g. `add(int,int)`
    #[arg(long, conflicts_with = "line")]
    method: Option<String>,
    /// Source line number
    #[arg(long)]
    line: Option<u32>,
    /// Compiled project classes, defaults to the first classpath entry
    #[arg(long)]
    classfiles: Option<PathBuf>,
}

#[derive(Args)]
struct SearchArgs {
    #[arg(long)]
    project: PathBuf,
    #[arg(long)]
    classpath: String,
    #[arg(long = "class")]
    class_fqn: String,
    #[arg(long)]
    method: Option<String>,
}

/// Logs every finished report.
struct LogListener;

impl ResultListener for LogListener {
    fn test_generation_result(&self, report: &Report, result_name: &str, file_url: &str) {
        info!(
            result = %result_name,
            file = %file_url,
            tests = report.len(),
            covered_lines = report.all_covered_lines.len(),
            "Received test result"
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize logging
    init_logging(&config);

    info!(version = env!("CARGO_PKG_VERSION"), "llm-testgen starting...");

    match cli.command {
        Command::Generate(args) => generate(config, args).await,
        Command::Search(args) => search(config, args).await,
        Command::History { limit } => history(&config, limit).await,
        Command::Show { session_id } => show(&config, &session_id).await,
        Command::Delete { session_id } => {
            let storage = open_storage(&config).await?;
            delete(&storage, &session_id).await?;
            println!("Deleted session {}", session_id);
            Ok(())
        }
    }
}

async fn open_storage(config: &Config) -> anyhow::Result<SqliteStorage> {
    match SqliteStorage::new(&config.database).await {
        Ok(s) => {
            info!(path = %config.database.path.display(), "Database initialized");
            Ok(s)
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize database");
            Err(e.into())
        }
    }
}

async fn generate(config: Config, args: GenerateArgs) -> anyhow::Result<()> {
    if config.llm.provider == ProviderKind::Default && !config.llm.is_token_set() {
        return Err(AppError::Config {
            message: "LLM_API_KEY is required for test generation".to_string(),
        }
        .into());
    }

    let storage = open_storage(&config).await?;
    let index = Arc::new(SourceIndex::scan(&args.source_roots)?);
    info!(types = index.len(), "Source index built");

    let provider = resolve_provider(&config.llm, config.request.clone())?;
    let engine = BuildAndRunEngine::new(config.toolchain.clone(), Arc::new(SystemCommandRunner));

    let target = match (args.method, args.line) {
        (Some(method), _) => CodeFragmentTarget::Method(method),
        (None, Some(line)) => CodeFragmentTarget::Line(line),
        (None, None) => CodeFragmentTarget::Class,
    };
    let class_files = args.classfiles.unwrap_or_else(|| {
        PathBuf::from(
            args.classpath
                .split(CLASSPATH_SEPARATOR)
                .next()
                .unwrap_or_default(),
        )
    });
    let request = GenerationRequest {
        class_fqn: args.class_fqn,
        target,
        classpath: args.classpath,
        class_files,
    };

    let pipeline = GenerationPipeline::new(
        index,
        provider,
        config.llm.api_key.clone(),
        engine,
        config.generation.clone(),
    )
    .with_storage(Arc::new(storage))
    .with_listener(Arc::new(LogListener));

    let cancel = CancellationFlag::new();
    spawn_ctrl_c(cancel.clone());

    let results_root = config.toolchain.results_dir.clone();
    let worker = tokio::spawn(async move {
        let mut session = SessionContext::new(&results_root, cancel, Arc::new(LogProgress));
        pipeline.run(&request, &mut session).await
    });

    match worker.await? {
        Ok(outcome) => {
            if let Some(warning) = outcome.request.reduction_warning() {
                eprintln!("{}", warning);
            }
            for name in outcome.passing.names() {
                info!(test = %name, "Passing test");
            }
            info!(suite = %outcome.suite_path.display(), "Generated suite saved");
            println!("{}", serde_json::to_string_pretty(&outcome.report)?);
            Ok(())
        }
        Err(e) => {
            eprintln!("{}", user_message(&e));
            Err(e.into())
        }
    }
}

async fn search(config: Config, args: SearchArgs) -> anyhow::Result<()> {
    let jar = config.search.jar.clone().ok_or_else(|| AppError::Config {
        message: "SEARCH_GENERATOR_JAR is not set".to_string(),
    })?;

    let runner = Arc::new(SystemCommandRunner);
    let engine = BuildAndRunEngine::new(config.toolchain.clone(), runner.clone());
    let java = engine.find_binary("java")?;

    let generator = ProcessSearchGenerator::new(
        java,
        jar,
        config.toolchain.results_dir.clone(),
        &config.search,
        runner,
    );
    let result_path = generator
        .launch(&SearchRequest {
            project_path: args.project,
            classpath: args.classpath,
            class_fqn: args.class_fqn,
            method: args.method,
        })
        .await?;

    let cancel = CancellationFlag::new();
    spawn_ctrl_c(cancel.clone());

    let watcher = ResultWatcher::new(result_path, &config.search, cancel);
    match watcher.watch(&LogListener).await? {
        Some(report) => println!("{}", serde_json::to_string_pretty(&report)?),
        None => warn!(result = %watcher.result_name(), "Search cancelled"),
    }
    Ok(())
}

async fn history(config: &Config, limit: u32) -> anyhow::Result<()> {
    let storage = open_storage(config).await?;
    for session in storage.list_sessions(limit).await? {
        println!(
            "{}  {}  {:<12}  {}  {}",
            session.id,
            session.created_at.format("%Y-%m-%d %H:%M:%S"),
            session.status,
            session.class_fqn,
            session.target
        );
    }
    Ok(())
}

async fn show(config: &Config, session_id: &str) -> anyhow::Result<()> {
    let storage = open_storage(config).await?;
    let session = storage
        .get_session(session_id)
        .await?
        .ok_or_else(|| llm_testgen::error::StorageError::SessionNotFound {
            session_id: session_id.to_string(),
        })?;
    let cases = storage.get_test_cases(session_id).await?;

    let value = serde_json::json!({
        "session": session,
        "test_cases": cases,
    });
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

async fn delete(storage: &dyn Storage, session_id: &str) -> anyhow::Result<()> {
    if storage.get_session(session_id).await?.is_none() {
        return Err(llm_testgen::error::StorageError::SessionNotFound {
            session_id: session_id.to_string(),
        }
        .into());
    }
    storage.delete_session(session_id).await?;
    info!(session_id = %session_id, "Session deleted");
    Ok(())
}

/// Set `cancel` when Ctrl-C is pressed.
fn spawn_ctrl_c(cancel: CancellationFlag) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling after the current step");
            cancel.cancel();
        }
    });
}

/// Initialize tracing/logging
fn init_logging(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llm_testgen::storage::SessionRecord;

    #[test]
    fn test_parse_delete_command() {
        let cli = Cli::try_parse_from(["llm-testgen", "delete", "s1"]).unwrap();
        assert!(matches!(cli.command, Command::Delete { session_id } if session_id == "s1"));
    }

    #[tokio::test]
    async fn test_delete_removes_existing_session() {
        let storage = SqliteStorage::new_in_memory().await.unwrap();
        let record = SessionRecord::new("s1", "pkg.Calc", &CodeFragmentTarget::Class, "/tmp/r");
        storage.create_session(&record).await.unwrap();

        delete(&storage, "s1").await.unwrap();
        assert!(storage.get_session("s1").await.unwrap().is_none());

        let err = delete(&storage, "s1").await.unwrap_err();
        assert!(err.to_string().contains("s1"));
    }
}
