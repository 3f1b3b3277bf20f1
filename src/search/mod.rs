//! Search-based test generation through an external generator.
//!
//! The generator runs as a background process and writes a JSON report to
//! the result path it was given. [`ResultWatcher`] polls for that file and
//! hands the normalized report to a [`ResultListener`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::build::{CommandRunner, CommandSpec};
use crate::config::SearchConfig;
use crate::error::{BuildError, BuildResult, CoverageError, CoverageResult};
use crate::pipeline::{CancellationFlag, RESULT_DIR_PREFIX};
use crate::report::{Report, ResultListener};

/// File the generator writes inside its result directory.
pub const REPORT_FILE_NAME: &str = "report.json";

/// Inputs for one search-based generation.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub project_path: PathBuf,
    pub classpath: String,
    pub class_fqn: String,
    pub method: Option<String>,
}

/// Starts a search-based generation and returns where its report will appear.
#[async_trait]
pub trait SearchGenerator: Send + Sync {
    async fn launch(&self, request: &SearchRequest) -> BuildResult<PathBuf>;
}

/// Runs the generator jar as a child process.
pub struct ProcessSearchGenerator {
    java: PathBuf,
    jar: PathBuf,
    results_root: PathBuf,
    timeout: Duration,
    runner: Arc<dyn CommandRunner>,
}

impl ProcessSearchGenerator {
    pub fn new(
        java: PathBuf,
        jar: PathBuf,
        results_root: PathBuf,
        config: &SearchConfig,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            java,
            jar,
            results_root,
            timeout: Duration::from_millis(config.timeout_ms),
            runner,
        }
    }

    fn command(&self, request: &SearchRequest, result_dir: &Path) -> CommandSpec {
        let mut spec = CommandSpec::new(&self.java)
            .arg("-jar")
            .arg(self.jar.display().to_string())
            .arg("-base_dir")
            .arg(request.project_path.display().to_string())
            .arg("-projectCP")
            .arg(&request.classpath)
            .arg("-class")
            .arg(&request.class_fqn);
        if let Some(method) = &request.method {
            spec = spec.arg(format!("-Dtarget_method={}", method));
        }
        spec.arg(format!(
            "-Dreport_path={}",
            result_dir.join(REPORT_FILE_NAME).display()
        ))
    }
}

#[async_trait]
impl SearchGenerator for ProcessSearchGenerator {
    async fn launch(&self, request: &SearchRequest) -> BuildResult<PathBuf> {
        let result_dir = self
            .results_root
            .join(format!("{}{}", RESULT_DIR_PREFIX, Uuid::new_v4()));
        tokio::fs::create_dir_all(&result_dir)
            .await
            .map_err(|e| BuildError::Io {
                path: result_dir.clone(),
                source: e,
            })?;

        let spec = self.command(request, &result_dir);
        let runner = self.runner.clone();
        let timeout = self.timeout;
        info!(
            class = %request.class_fqn,
            result_dir = %result_dir.display(),
            "Launching search-based generator"
        );

        tokio::spawn(async move {
            match runner.run(&spec, timeout).await {
                Ok(output) if output.timed_out => warn!("Search-based generator timed out"),
                Ok(output) => debug!(status = ?output.status, "Search-based generator exited"),
                Err(e) => warn!(error = %e, "Search-based generator failed to start"),
            }
        });

        Ok(result_dir.join(REPORT_FILE_NAME))
    }
}

/// Polls for a generator report and delivers it.
pub struct ResultWatcher {
    result_path: PathBuf,
    result_name: String,
    poll_interval: Duration,
    timeout: Duration,
    cancel: CancellationFlag,
}

impl ResultWatcher {
    pub fn new(result_path: PathBuf, config: &SearchConfig, cancel: CancellationFlag) -> Self {
        let result_name = result_path
            .parent()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| result_path.display().to_string());
        Self {
            result_path,
            result_name,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            timeout: Duration::from_millis(config.timeout_ms),
            cancel,
        }
    }

    /// Identifier passed to the listener.
    pub fn result_name(&self) -> &str {
        &self.result_name
    }

    /// Wait for the report and hand it to `listener`.
    ///
    /// Returns `None` when cancelled first.
    pub async fn watch(&self, listener: &dyn ResultListener) -> CoverageResult<Option<Report>> {
        let start = Instant::now();
        let mut last_error = None;

        loop {
            if self.cancel.is_cancelled() {
                info!(result = %self.result_name, "Stopped waiting for search result");
                return Ok(None);
            }

            if self.result_path.exists() {
                match read_report(&self.result_path).await {
                    Ok(report) => {
                        let report = report.normalized();
                        info!(
                            result = %self.result_name,
                            tests = report.len(),
                            "Search result received"
                        );
                        listener.test_generation_result(
                            &report,
                            &self.result_name,
                            &self.result_path.display().to_string(),
                        );
                        return Ok(Some(report));
                    }
                    // The generator may still be writing the file
                    Err(e) => {
                        debug!(error = %e, "Search result not readable yet");
                        last_error = Some(e);
                    }
                }
            }

            if start.elapsed() >= self.timeout {
                return Err(last_error.unwrap_or_else(|| {
                    CoverageError::Build(BuildError::Timeout {
                        program: "search-based generator".to_string(),
                        timeout_ms: self.timeout.as_millis() as u64,
                    })
                }));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

async fn read_report(path: &Path) -> CoverageResult<Report> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| CoverageError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
    serde_json::from_str(&text).map_err(|e| CoverageError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}
