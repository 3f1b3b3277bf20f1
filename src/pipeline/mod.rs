//! Generation-validation pipeline.
//!
//! One [`GenerationPipeline::run`] call drives a session from context
//! selection to the final report:
//!
//! 1. select the context types and render a request within budget
//! 2. ask the provider for tests and assemble them
//! 3. compile every candidate on its own, keep the ones that compile
//! 4. compile the final suite and collect coverage per test case
//! 5. persist the session and hand the report to the listener

mod context;

pub use context::{
    CancellationFlag, LogProgress, ProgressSink, SessionContext, SessionState, RESULT_DIR_PREFIX,
};

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::build::BuildAndRunEngine;
use crate::config::GenerationConfig;
use crate::context::{select_context, CodeFragmentTarget, PromptDepths};
use crate::coverage::{CollectionRequest, CoverageCollector};
use crate::error::{PipelineError, PipelineResult};
use crate::llm::{GeneratedTestCase, GeneratedTestSuite, GenerationClient, GenerationProvider};
use crate::prompt::{BuiltRequest, RequestBuilder};
use crate::prompts::{render, COMPILATION_FEEDBACK};
use crate::report::{PassingTests, Report, ResultListener};
use crate::source::{SourceIndex, TypeResolver};
use crate::storage::{SessionRecord, Storage, StoredTestCase};

/// What to generate tests for and where the project lives.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub class_fqn: String,
    pub target: CodeFragmentTarget,
    /// Project build output plus dependencies
    pub classpath: String,
    /// Compiled project classes, used to build the coverage report
    pub class_files: PathBuf,
}

/// Result of a finished session.
#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    pub report: Report,
    pub passing: PassingTests,
    /// Saved suite with every compilable test case
    pub suite_path: PathBuf,
    pub request: BuiltRequest,
    /// Generation requests sent, including correction turns
    pub requests: u32,
    /// Collection stopped early on cancellation
    pub cancelled: bool,
}

/// Runs generation sessions against one project.
pub struct GenerationPipeline {
    index: Arc<SourceIndex>,
    provider: Arc<dyn GenerationProvider>,
    credential: String,
    engine: BuildAndRunEngine,
    generation: GenerationConfig,
    storage: Option<Arc<dyn Storage>>,
    listener: Option<Arc<dyn ResultListener>>,
}

impl GenerationPipeline {
    /// Create a pipeline without persistence or listener.
    pub fn new(
        index: Arc<SourceIndex>,
        provider: Arc<dyn GenerationProvider>,
        credential: impl Into<String>,
        engine: BuildAndRunEngine,
        generation: GenerationConfig,
    ) -> Self {
        Self {
            index,
            provider,
            credential: credential.into(),
            engine,
            generation,
            storage: None,
            listener: None,
        }
    }

    /// Record sessions and test cases in `storage`.
    pub fn with_storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Deliver finished reports to `listener`.
    pub fn with_listener(mut self, listener: Arc<dyn ResultListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Run one session to completion.
    ///
    /// On failure the session ends in [`SessionState::Failed`] and the error
    /// carries the message to show the user.
    pub async fn run(
        &self,
        request: &GenerationRequest,
        session: &mut SessionContext,
    ) -> PipelineResult<GenerationOutcome> {
        info!(
            session_id = %session.id(),
            class = %request.class_fqn,
            target = %request.target,
            "Generation session started"
        );

        let mut record = SessionRecord::new(
            session.id().to_string(),
            &request.class_fqn,
            &request.target,
            session.result_dir().display().to_string(),
        );
        if let Some(storage) = &self.storage {
            if let Err(e) = storage.create_session(&record).await {
                warn!(session_id = %record.id, error = %e, "Failed to record session");
            }
        }

        let result = self.execute(request, session, &mut record).await;

        match &result {
            Ok(outcome) => {
                record = record.with_status(session.state());
                self.persist(&record, Some(outcome)).await;
                info!(
                    session_id = %session.id(),
                    tests = outcome.report.len(),
                    passing = outcome.passing.len(),
                    covered_lines = outcome.report.all_covered_lines.len(),
                    "Generation session finished"
                );
            }
            Err(e) => {
                session.transition(SessionState::Failed);
                let message = user_message(e);
                error!(session_id = %session.id(), error = %message, "Generation session failed");
                session.progress(&message);
                record = record
                    .with_status(SessionState::Failed)
                    .with_error(message);
                self.persist(&record, None).await;
            }
        }

        result
    }

    async fn execute(
        &self,
        request: &GenerationRequest,
        session: &mut SessionContext,
        record: &mut SessionRecord,
    ) -> PipelineResult<GenerationOutcome> {
        let resolver: &dyn TypeResolver = self.index.as_ref();
        let cut = resolver
            .resolve(&request.class_fqn)
            .ok_or_else(|| PipelineError::TypeNotFound {
                class_fqn: request.class_fqn.clone(),
            })?;

        let depths = PromptDepths::new(
            self.generation.max_poly_depth,
            self.generation.max_input_params_depth,
        );
        let context = select_context(resolver, cut, depths);
        session.transition(SessionState::ContextSelected);
        session.progress(&format!(
            "Collected {} context types for {}",
            context.types.len(),
            cut.simple_name
        ));

        let builder = RequestBuilder::new(resolver, self.generation.prompt_max_chars);
        let built = builder.build_within_budget(&context, &request.target)?;
        record.poly_depth = Some(built.depths.polymorphism);
        record.input_params_depth = Some(built.depths.input_params);
        record.poly_depth_reductions = built.poly_depth_reductions;
        record.input_params_depth_reductions = built.input_params_depth_reductions;
        if let Some(warning) = built.reduction_warning() {
            warn!(
                poly_depth = built.depths.polymorphism,
                input_params_depth = built.depths.input_params,
                "Request was reduced to fit the provider budget"
            );
            session.progress(&warning);
        }
        session.transition(SessionState::PromptBuilt);

        let test_class = format!("{}Test", cut.simple_name);
        let classpath = self.engine.toolchain().test_classpath(&request.classpath);
        let max_requests = self.generation.max_requests.max(1);

        let mut client = GenerationClient::new(self.provider.clone(), self.credential.clone());
        let mut prompt = built.text.clone();
        let mut requests = 0;

        let (suite, compilable) = loop {
            if session.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }

            requests += 1;
            record.requests = requests;
            session.transition(SessionState::Requested);
            session.progress(&format!(
                "Generating tests with {} ({}/{})",
                client.provider_name(),
                requests,
                max_requests
            ));

            let suite = client.request(&prompt, &cut.package).await?;
            session.transition(SessionState::Assembled);
            info!(
                session_id = %session.id(),
                candidates = suite.test_cases.len(),
                turn = requests,
                "Generated test candidates"
            );

            let (compilable, errors) = self
                .compile_candidates(&suite, &test_class, &classpath, session)
                .await?;
            if !compilable.is_empty() {
                break (suite, compilable);
            }

            if requests >= max_requests {
                return Err(PipelineError::NothingCompiled {
                    candidates: suite.test_cases.len(),
                });
            }
            info!(
                session_id = %session.id(),
                turn = requests,
                "No candidate compiled, requesting a correction"
            );
            prompt = render(COMPILATION_FEEDBACK, &[("errors", errors.trim())]);
        };
        session.transition(SessionState::Compiled);

        let suite_path = self
            .compile_suite(&suite, &compilable, &test_class, &classpath, session)
            .await?;

        let test_class_fqn = qualified(&cut.package, &test_class);
        let target_source_path = cut.qualified_file_path();
        let collection = CollectionRequest {
            target_class_fqn: &cut.qualified_name,
            target_source_path: &target_source_path,
            test_class_fqn: &test_class_fqn,
            classpath: &classpath,
            class_files: &request.class_files,
            source_roots: self.index.roots(),
        };

        session.progress("Collecting coverage");
        let report = CoverageCollector::new(&self.engine)
            .collect(&collection, &compilable, session)
            .await?;
        session.transition(SessionState::Executed);
        let cancelled = session.is_cancelled();
        if cancelled {
            info!(collected = report.len(), "Returning partial report after cancellation");
        }
        session.transition(SessionState::Collected);

        if let Some(listener) = &self.listener {
            listener.test_generation_result(
                &report,
                &format!("{}{}", RESULT_DIR_PREFIX, session.id()),
                &suite_path.display().to_string(),
            );
        }
        session.transition(SessionState::Reported);

        Ok(GenerationOutcome {
            report,
            passing: session.passing().clone(),
            suite_path,
            request: built,
            requests,
            cancelled,
        })
    }

    /// Compile each candidate in its own file.
    ///
    /// Returns the compilable cases and the collected compiler output.
    async fn compile_candidates(
        &self,
        suite: &GeneratedTestSuite,
        test_class: &str,
        classpath: &str,
        session: &SessionContext,
    ) -> PipelineResult<(Vec<GeneratedTestCase>, String)> {
        let mut compilable = Vec::new();
        let mut errors = String::new();

        for (index, case) in suite.test_cases.iter().enumerate() {
            if !case.expected_to_compile {
                debug!(test = %case.name, "Skipping truncated test case");
                errors.push_str(&format!("{}: the method is incomplete\n", case.name));
                continue;
            }

            let class_name = format!("{}Case{}", test_class, index);
            let code = suite.render_single(&class_name, case);
            let path = self
                .engine
                .save_generated_tests(
                    &suite.package,
                    &code,
                    session.result_dir(),
                    &format!("{}.java", class_name),
                )
                .await?;

            let result = self.engine.compile(&path, classpath).await?;
            if result.success {
                compilable.push(case.clone());
            } else {
                debug!(test = %case.name, "Test case does not compile");
                errors.push_str(&result.output);
                errors.push('\n');
            }
        }

        session.progress(&format!(
            "{} of {} test cases compiled",
            compilable.len(),
            suite.test_cases.len()
        ));
        Ok((compilable, errors))
    }

    /// Save and compile the suite of compilable cases.
    async fn compile_suite(
        &self,
        suite: &GeneratedTestSuite,
        cases: &[GeneratedTestCase],
        test_class: &str,
        classpath: &str,
        session: &SessionContext,
    ) -> PipelineResult<PathBuf> {
        let refs: Vec<&GeneratedTestCase> = cases.iter().collect();
        let code = suite.render(test_class, &refs);
        let path = self
            .engine
            .save_generated_tests(
                &suite.package,
                &code,
                session.result_dir(),
                &format!("{}.java", test_class),
            )
            .await?;

        let result = self.engine.compile(&path, classpath).await?;
        if !result.success {
            return Err(PipelineError::SuiteCompilation {
                output: result.output,
            });
        }
        Ok(path)
    }

    async fn persist(&self, record: &SessionRecord, outcome: Option<&GenerationOutcome>) {
        let Some(storage) = &self.storage else {
            return;
        };

        if let Err(e) = storage.update_session(record).await {
            warn!(session_id = %record.id, error = %e, "Failed to update session");
        }
        if let Some(outcome) = outcome {
            let cases = StoredTestCase::from_report(&record.id, &outcome.report, &outcome.passing);
            if let Err(e) = storage.save_test_cases(&record.id, &cases).await {
                warn!(session_id = %record.id, error = %e, "Failed to save test cases");
            }
        }
    }

    /// Source index the pipeline resolves types against.
    pub fn index(&self) -> &SourceIndex {
        &self.index
    }
}

/// Message shown to the user for a failed session.
pub fn user_message(error: &PipelineError) -> String {
    match error {
        PipelineError::Generation(e) => e.user_message(),
        other => other.to_string(),
    }
}

fn qualified(package: &str, simple_name: &str) -> String {
    if package.is_empty() {
        simple_name.to_string()
    } else {
        format!("{}.{}", package, simple_name)
    }
}
