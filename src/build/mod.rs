//! Compiles generated tests and runs them under the coverage agent.
//!
//! Every external step goes through a [`CommandRunner`], so the engine can be
//! exercised without a JDK installed.

mod runner;

pub use runner::{CommandOutput, CommandRunner, CommandSpec, SystemCommandRunner};

#[cfg(test)]
pub use runner::MockCommandRunner;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::{ToolchainConfig, CLASSPATH_SEPARATOR};
use crate::error::{BuildError, BuildResult};

/// Main class of the single-test JUnit runner jar.
pub const RUNNER_MAIN: &str = "org.jetbrains.research.SingleJUnitTestRunner";

const AGENT_JAR: &str = "jacocoagent.jar";
const CLI_JAR: &str = "jacococli.jar";
const RUNNER_JAR: &str = "JUnitRunner.jar";

/// Outcome of compiling one source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilationResult {
    pub success: bool,
    /// Combined compiler output
    pub output: String,
}

/// One test method run under the coverage agent.
#[derive(Debug, Clone)]
pub struct TestRun<'a> {
    /// Class under test; scopes the recorded coverage
    pub target_class_fqn: &'a str,
    /// Generated test class
    pub test_class_fqn: &'a str,
    pub test_name: &'a str,
    /// Project classpath including dependencies
    pub classpath: &'a str,
    /// Root of the saved test sources and classes
    pub result_dir: &'a Path,
    /// Coverage data written by the agent
    pub exec_path: &'a Path,
}

/// Compiler, runner and report generator for one toolchain.
#[derive(Clone)]
pub struct BuildAndRunEngine {
    toolchain: ToolchainConfig,
    runner: Arc<dyn CommandRunner>,
    /// Binaries already located under the runtime home
    binaries: Arc<Mutex<HashMap<String, PathBuf>>>,
}

impl BuildAndRunEngine {
    /// Create an engine over the given toolchain.
    pub fn new(toolchain: ToolchainConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            toolchain,
            runner,
            binaries: Arc::default(),
        }
    }

    /// Toolchain settings.
    pub fn toolchain(&self) -> &ToolchainConfig {
        &self.toolchain
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.toolchain.process_timeout_ms)
    }

    /// Locate a JDK binary (`javac`, `java`) under the runtime home.
    ///
    /// `<home>/bin` is tried first; otherwise the home is searched in file
    /// name order. The result is cached for the engine's lifetime.
    pub fn find_binary(&self, name: &str) -> BuildResult<PathBuf> {
        let mut binaries = self.binaries.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(path) = binaries.get(name) {
            return Ok(path.clone());
        }

        let file_names = [name.to_string(), format!("{}.exe", name)];
        let home = &self.toolchain.java_home;
        let direct = file_names
            .iter()
            .map(|f| home.join("bin").join(f))
            .find(|p| p.is_file());

        let path = match direct {
            Some(path) => path,
            None => WalkDir::new(home)
                .follow_links(true)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .find(|e| {
                    let in_bin = e
                        .path()
                        .parent()
                        .and_then(|p| p.file_name())
                        .is_some_and(|n| n == "bin");
                    in_bin && file_names.iter().any(|f| e.file_name() == f.as_str())
                })
                .map(|e| e.into_path())
                .ok_or_else(|| BuildError::ToolNotFound {
                    binary: name.to_string(),
                    home: home.clone(),
                })?,
        };

        debug!(binary = %name, path = %path.display(), "Located JDK binary");
        binaries.insert(name.to_string(), path.clone());
        Ok(path)
    }

    /// Compile one source file against `classpath`.
    ///
    /// Success means the `.class` file appeared next to the source.
    pub async fn compile(&self, source: &Path, classpath: &str) -> BuildResult<CompilationResult> {
        let javac = self.find_binary("javac")?;
        let class_file = source.with_extension("class");

        if class_file.exists() {
            tokio::fs::remove_file(&class_file)
                .await
                .map_err(|e| BuildError::Io {
                    path: class_file.clone(),
                    source: e,
                })?;
        }

        let spec = CommandSpec::new(javac)
            .arg("-cp")
            .arg(classpath)
            .arg(source.display().to_string());
        let output = self.runner.run(&spec, self.timeout()).await?;

        let success = class_file.exists();
        let mut text = output.stdout;
        text.push_str(&output.stderr);
        if output.timed_out {
            text.push_str(&format!(
                "\nCompilation timed out after {}ms",
                self.toolchain.process_timeout_ms
            ));
        }

        debug!(source = %source.display(), success, "Compiled test file");
        Ok(CompilationResult {
            success,
            output: text,
        })
    }

    /// Run a single test method with the coverage agent attached.
    ///
    /// Returns the error output; empty means the test passed.
    pub async fn run_test(&self, run: &TestRun<'_>) -> BuildResult<String> {
        let java = self.find_binary("java")?;

        let agent = format!(
            "-javaagent:{}=destfile={},append=false,includes={}",
            self.toolchain.library(AGENT_JAR).display(),
            run.exec_path.display(),
            run.target_class_fqn
        );
        let classpath = [
            run.classpath.to_string(),
            self.toolchain.library(RUNNER_JAR).display().to_string(),
            run.result_dir.display().to_string(),
        ]
        .join(CLASSPATH_SEPARATOR);

        let spec = CommandSpec::new(java)
            .arg(agent)
            .arg("-cp")
            .arg(classpath)
            .arg(RUNNER_MAIN)
            .arg(format!("{}#{}", run.test_class_fqn, run.test_name));
        let output = self.runner.run(&spec, self.timeout()).await?;

        if output.timed_out {
            warn!(test = %run.test_name, "Test execution timed out");
            return Ok(format!(
                "Test execution timed out after {}ms",
                self.toolchain.process_timeout_ms
            ));
        }

        debug!(
            test = %run.test_name,
            passed = output.stderr.trim().is_empty(),
            "Executed test case"
        );
        Ok(output.stderr)
    }

    /// Convert a coverage-exec file into an XML report.
    pub async fn generate_coverage_xml(
        &self,
        exec_path: &Path,
        class_files: &Path,
        source_roots: &[PathBuf],
        xml_path: &Path,
    ) -> BuildResult<CommandOutput> {
        let java = self.find_binary("java")?;

        let mut spec = CommandSpec::new(java)
            .arg("-jar")
            .arg(self.toolchain.library(CLI_JAR).display().to_string())
            .arg("report")
            .arg(exec_path.display().to_string())
            .arg("--classfiles")
            .arg(class_files.display().to_string());
        for root in source_roots {
            spec = spec
                .arg("--sourcefiles")
                .arg(root.display().to_string());
        }
        spec = spec.arg("--xml").arg(xml_path.display().to_string());

        let output = self.runner.run(&spec, self.timeout()).await?;
        if output.status != Some(0) {
            warn!(
                exec = %exec_path.display(),
                status = ?output.status,
                stderr = %output.stderr.trim(),
                "Coverage report generation reported a failure"
            );
        }
        Ok(output)
    }

    /// Write a test file under `result_dir`, mirroring the package as directories.
    pub async fn save_generated_tests(
        &self,
        package: &str,
        code: &str,
        result_dir: &Path,
        file_name: &str,
    ) -> BuildResult<PathBuf> {
        let dir = package_dir(result_dir, package);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| BuildError::Io {
                path: dir.clone(),
                source: e,
            })?;

        let path = dir.join(file_name);
        tokio::fs::write(&path, code)
            .await
            .map_err(|e| BuildError::Io {
                path: path.clone(),
                source: e,
            })?;

        info!(path = %path.display(), "Saved generated tests");
        Ok(path)
    }
}

/// Directory for `package` under `root`.
pub fn package_dir(root: &Path, package: &str) -> PathBuf {
    package
        .split('.')
        .filter(|segment| !segment.is_empty())
        .fold(root.to_path_buf(), |dir, segment| dir.join(segment))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::always;
    use tempfile::TempDir;

    fn fake_jdk() -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("jdk").join("bin");
        std::fs::create_dir_all(&bin).unwrap();
        std::fs::write(bin.join("javac"), "").unwrap();
        std::fs::write(bin.join("java"), "").unwrap();
        dir
    }

    fn toolchain(home: &Path) -> ToolchainConfig {
        ToolchainConfig {
            java_home: home.to_path_buf(),
            lib_dir: PathBuf::from("/opt/libs"),
            process_timeout_ms: 1000,
            results_dir: home.join("results"),
        }
    }

    #[test]
    fn test_package_dir() {
        let root = Path::new("/r");
        assert_eq!(package_dir(root, "a.b.c"), PathBuf::from("/r/a/b/c"));
        assert_eq!(package_dir(root, ""), PathBuf::from("/r"));
    }

    #[test]
    fn test_find_binary() {
        let jdk = fake_jdk();
        let engine = BuildAndRunEngine::new(toolchain(jdk.path()), Arc::new(SystemCommandRunner));

        let javac = engine.find_binary("javac").unwrap();
        assert!(javac.ends_with("jdk/bin/javac"));
        assert!(matches!(
            engine.find_binary("jshell"),
            Err(BuildError::ToolNotFound { .. })
        ));
    }

    #[test]
    fn test_find_binary_prefers_home_bin() {
        let home = tempfile::tempdir().unwrap();
        for dir in ["bin", "jre/bin"] {
            let bin = home.path().join(dir);
            std::fs::create_dir_all(&bin).unwrap();
            std::fs::write(bin.join("java"), "").unwrap();
        }
        let engine = BuildAndRunEngine::new(toolchain(home.path()), Arc::new(SystemCommandRunner));

        assert_eq!(engine.find_binary("java").unwrap(), home.path().join("bin").join("java"));
    }

    #[test]
    fn test_find_binary_is_cached() {
        let jdk = fake_jdk();
        let engine = BuildAndRunEngine::new(toolchain(jdk.path()), Arc::new(SystemCommandRunner));

        let first = engine.find_binary("java").unwrap();
        std::fs::remove_file(&first).unwrap();

        // Clones share the cache
        assert_eq!(engine.clone().find_binary("java").unwrap(), first);
        assert!(engine.find_binary("javac").unwrap().ends_with("jdk/bin/javac"));
    }

    #[tokio::test]
    async fn test_compile_success_is_judged_by_class_file() {
        let jdk = fake_jdk();
        let source = jdk.path().join("CalcTest.java");
        std::fs::write(&source, "class CalcTest {}").unwrap();
        let class_file = jdk.path().join("CalcTest.class");

        let mut runner = MockCommandRunner::new();
        let expected = class_file.clone();
        runner
            .expect_run()
            .withf(|spec, _| spec.args[0] == "-cp" && spec.args[1] == "cp")
            .times(1)
            .returning(move |_, _| {
                std::fs::write(&expected, "").unwrap();
                Ok(CommandOutput {
                    status: Some(0),
                    ..Default::default()
                })
            });

        let engine = BuildAndRunEngine::new(toolchain(jdk.path()), Arc::new(runner));
        let result = engine.compile(&source, "cp").await.unwrap();
        assert!(result.success);
    }

    #[tokio::test]
    async fn test_compile_failure_keeps_output() {
        let jdk = fake_jdk();
        let source = jdk.path().join("BrokenTest.java");

        let mut runner = MockCommandRunner::new();
        runner.expect_run().with(always(), always()).returning(|_, _| {
            Ok(CommandOutput {
                status: Some(1),
                stderr: "BrokenTest.java:3: error: ';' expected".to_string(),
                ..Default::default()
            })
        });

        let engine = BuildAndRunEngine::new(toolchain(jdk.path()), Arc::new(runner));
        let result = engine.compile(&source, "cp").await.unwrap();
        assert!(!result.success);
        assert!(result.output.contains("';' expected"));
    }

    #[tokio::test]
    async fn test_run_test_builds_agent_command() {
        let jdk = fake_jdk();
        let result_dir = jdk.path().join("results");
        let exec = result_dir.join("jacoco-x.exec");

        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|spec, _| {
                spec.args[0].starts_with("-javaagent:/opt/libs/jacocoagent.jar=destfile=")
                    && spec.args[0].ends_with(",append=false,includes=pkg.Calc")
                    && spec.args[2].contains("JUnitRunner.jar")
                    && spec.args[3] == RUNNER_MAIN
                    && spec.args[4] == "pkg.CalcTest#testAdd"
            })
            .returning(|_, _| Ok(CommandOutput::default()));

        let engine = BuildAndRunEngine::new(toolchain(jdk.path()), Arc::new(runner));
        let error = engine
            .run_test(&TestRun {
                target_class_fqn: "pkg.Calc",
                test_class_fqn: "pkg.CalcTest",
                test_name: "testAdd",
                classpath: "cp",
                result_dir: &result_dir,
                exec_path: &exec,
            })
            .await
            .unwrap();
        assert!(error.is_empty());
    }

    #[tokio::test]
    async fn test_save_generated_tests_mirrors_package() {
        let dir = tempfile::tempdir().unwrap();
        let engine = BuildAndRunEngine::new(toolchain(dir.path()), Arc::new(SystemCommandRunner));

        let path = engine
            .save_generated_tests("pkg.sub", "class T {}", dir.path(), "T.java")
            .await
            .unwrap();
        assert_eq!(path, dir.path().join("pkg").join("sub").join("T.java"));
        assert_eq!(std::fs::read_to_string(path).unwrap(), "class T {}");
    }
}
