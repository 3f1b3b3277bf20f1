//! Coverage extraction for generated test cases.
//!
//! Each test case runs on its own under the coverage agent. The exec file is
//! converted to XML and the covered lines of the target source file are read
//! from it. Lines the agent misses because a test threw are recovered from
//! the stack trace in the error output.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::build::{BuildAndRunEngine, TestRun};
use crate::error::{CoverageError, CoverageResult};
use crate::llm::GeneratedTestCase;
use crate::pipeline::SessionContext;
use crate::report::{Report, TestCase};

/// Separator between frames in a Java stack trace.
pub const FRAME_SEPARATOR: &str = "\n\tat ";

/// Inputs shared by every test case of one collection pass.
#[derive(Debug, Clone)]
pub struct CollectionRequest<'a> {
    pub target_class_fqn: &'a str,
    /// Source path relative to its root, e.g. `pkg/Calc.java`
    pub target_source_path: &'a str,
    pub test_class_fqn: &'a str,
    pub classpath: &'a str,
    /// Compiled project classes used for the report
    pub class_files: &'a Path,
    pub source_roots: &'a [PathBuf],
}

/// Runs test cases and turns their coverage into a [`Report`].
pub struct CoverageCollector<'a> {
    engine: &'a BuildAndRunEngine,
}

impl<'a> CoverageCollector<'a> {
    pub fn new(engine: &'a BuildAndRunEngine) -> Self {
        Self { engine }
    }

    /// Collect coverage for each case in order.
    ///
    /// A missing XML report aborts the pass. Cancellation is checked between
    /// cases and returns what was collected so far.
    pub async fn collect(
        &self,
        request: &CollectionRequest<'_>,
        cases: &[GeneratedTestCase],
        session: &mut SessionContext,
    ) -> CoverageResult<Report> {
        info!(
            class = %request.target_class_fqn,
            cases = cases.len(),
            "Test collection begins"
        );
        let mut report = Report::new();

        for (index, case) in cases.iter().enumerate() {
            if session.is_cancelled() {
                info!(collected = report.len(), "Coverage collection cancelled");
                break;
            }
            session.progress(&format!(
                "Running test {} ({}/{})",
                case.name,
                index + 1,
                cases.len()
            ));

            let data_file = session.result_dir().join(data_file_name());
            let exec_path = data_file.with_extension("exec");
            let xml_path = data_file.with_extension("xml");

            let error_output = self
                .engine
                .run_test(&TestRun {
                    target_class_fqn: request.target_class_fqn,
                    test_class_fqn: request.test_class_fqn,
                    test_name: &case.name,
                    classpath: request.classpath,
                    result_dir: session.result_dir(),
                    exec_path: &exec_path,
                })
                .await?;

            self.engine
                .generate_coverage_xml(
                    &exec_path,
                    request.class_files,
                    request.source_roots,
                    &xml_path,
                )
                .await?;

            if !xml_path.exists() {
                error!(path = %xml_path.display(), test = %case.name, "Coverage report missing");
                return Err(CoverageError::ArtifactMissing { path: xml_path });
            }

            let mut covered = parse_coverage_file(&xml_path, request.target_source_path)?;

            if error_output.trim().is_empty() {
                session.passing_mut().add_passing_test(&case.name);
            } else {
                let recovered = lines_from_stack_trace(&error_output, request.target_class_fqn);
                debug!(test = %case.name, recovered = ?recovered, "Recovered lines from stack trace");
                covered.extend(recovered);
                session.passing_mut().remove_from_passing_test(&case.name);
            }

            info!(test = %case.name, lines = covered.len(), "Test case collected");
            report.insert(TestCase::new(&case.name, &case.source, covered));
        }

        Ok(report.normalized())
    }
}

/// Random base name for a pair of exec/XML files.
fn data_file_name() -> String {
    let random = Uuid::new_v4().simple().to_string();
    format!("jacoco-{}", &random[..20])
}

/// Read an XML coverage report from disk.
pub fn parse_coverage_file(path: &Path, source_path: &str) -> CoverageResult<BTreeSet<u32>> {
    let xml = std::fs::read_to_string(path).map_err(|e| CoverageError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    parse_coverage_xml(&xml, source_path).map_err(|message| CoverageError::Parse {
        path: path.to_path_buf(),
        message,
    })
}

/// Lines with no missed instructions in the `<sourcefile>` matching `source_path`.
///
/// `source_path` is the package path of the file (`pkg/Calc.java`); the
/// report stores the package and the simple file name separately.
pub fn parse_coverage_xml(xml: &str, source_path: &str) -> Result<BTreeSet<u32>, String> {
    let mut reader = Reader::from_str(xml);
    let mut lines = BTreeSet::new();
    let mut package = String::new();
    let mut in_target = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"package" => package = attribute(&e, b"name")?.unwrap_or_default(),
                b"sourcefile" => {
                    let name = attribute(&e, b"name")?.unwrap_or_default();
                    in_target = name == source_path
                        || (!package.is_empty() && format!("{}/{}", package, name) == source_path);
                }
                b"line" if in_target => collect_line(&e, &mut lines)?,
                _ => {}
            },
            Ok(Event::Empty(e)) => {
                if in_target && e.name().as_ref() == b"line" {
                    collect_line(&e, &mut lines)?;
                }
            }
            Ok(Event::End(e)) => match e.name().as_ref() {
                b"sourcefile" => in_target = false,
                b"package" => package.clear(),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(format!(
                    "error at position {}: {}",
                    reader.buffer_position(),
                    e
                ))
            }
        }
    }

    Ok(lines)
}

fn collect_line(element: &BytesStart<'_>, lines: &mut BTreeSet<u32>) -> Result<(), String> {
    if attribute(element, b"mi")?.as_deref() != Some("0") {
        return Ok(());
    }
    let nr = attribute(element, b"nr")?.ok_or_else(|| "line without nr".to_string())?;
    let nr = nr
        .parse::<u32>()
        .map_err(|e| format!("invalid line number '{}': {}", nr, e))?;
    lines.insert(nr);
    Ok(())
}

fn attribute(element: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>, String> {
    for attr in element.attributes() {
        let attr = attr.map_err(|e| e.to_string())?;
        if attr.key.as_ref() == key {
            let value = attr.unescape_value().map_err(|e| e.to_string())?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

/// Lines of `class_fqn` named in the frames of a stack trace.
///
/// The text before the first frame (the exception message) is ignored.
/// Frames of nested classes (`Outer$Inner`) count as the outer class.
pub fn lines_from_stack_trace(error_output: &str, class_fqn: &str) -> BTreeSet<u32> {
    let normalized = error_output.replace("\r\n", "\n");
    let nested_prefix = format!("{}$", class_fqn);

    normalized
        .split(FRAME_SEPARATOR)
        .skip(1)
        .filter_map(|frame| {
            let frame = frame.lines().next()?;
            let (method, location) = frame.split_once('(')?;
            let (class, _) = method.trim().rsplit_once('.')?;
            if class != class_fqn && !class.starts_with(&nested_prefix) {
                return None;
            }
            let (_, line) = location.rsplit_once(':')?;
            line.trim_end_matches(')').trim().parse::<u32>().ok()
        })
        .collect()
}
