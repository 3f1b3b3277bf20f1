//! Per-class coverage report and the passing-test set.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Coverage of one test case.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    pub name: String,
    pub source: String,
    pub covered_lines: BTreeSet<u32>,
    /// Reserved, always empty for generated tests
    #[serde(default)]
    pub covered_branches: BTreeSet<u32>,
    /// Reserved, always empty for generated tests
    #[serde(default)]
    pub covered_mutants: BTreeSet<String>,
}

impl TestCase {
    /// Create a case with line coverage only.
    pub fn new(
        name: impl Into<String>,
        source: impl Into<String>,
        covered_lines: BTreeSet<u32>,
    ) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            covered_lines,
            ..Default::default()
        }
    }
}

/// Coverage results keyed by test name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub test_cases: BTreeMap<String, TestCase>,
    /// Union of every case's covered lines, filled by [`Report::normalized`]
    #[serde(default)]
    pub all_covered_lines: BTreeSet<u32>,
}

impl Report {
    /// Create an empty report.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a case under its name.
    pub fn insert(&mut self, case: TestCase) {
        self.test_cases.insert(case.name.clone(), case);
    }

    /// Look up a case.
    pub fn get(&self, name: &str) -> Option<&TestCase> {
        self.test_cases.get(name)
    }

    /// Number of cases.
    pub fn len(&self) -> usize {
        self.test_cases.len()
    }

    /// Whether the report has no cases.
    pub fn is_empty(&self) -> bool {
        self.test_cases.is_empty()
    }

    /// Canonical form: keys equal case names, totals recomputed.
    ///
    /// Normalizing a normalized report returns it unchanged.
    pub fn normalized(&self) -> Report {
        let test_cases: BTreeMap<String, TestCase> = self
            .test_cases
            .values()
            .map(|case| (case.name.clone(), case.clone()))
            .collect();
        let all_covered_lines = test_cases
            .values()
            .flat_map(|case| case.covered_lines.iter().copied())
            .collect();

        Report {
            test_cases,
            all_covered_lines,
        }
    }
}

/// Names of test cases whose last run produced no error output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassingTests {
    names: BTreeSet<String>,
}

impl PassingTests {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a test as passing.
    pub fn add_passing_test(&mut self, name: &str) {
        self.names.insert(name.to_string());
    }

    /// Mark a test as failing.
    pub fn remove_from_passing_test(&mut self, name: &str) {
        self.names.remove(name);
    }

    /// Whether the test passed.
    pub fn is_passing(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    /// Passing test names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    /// Number of passing tests.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether no test passed.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Receives finished reports.
pub trait ResultListener: Send + Sync {
    /// Called once per finished generation with the normalized report.
    fn test_generation_result(&self, report: &Report, result_name: &str, file_url: &str);
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn lines(values: &[u32]) -> BTreeSet<u32> {
        values.iter().copied().collect()
    }

    #[test]
    fn test_normalized_is_idempotent() {
        let mut report = Report::new();
        report.insert(TestCase::new("b", "src b", lines(&[12, 10])));
        report.insert(TestCase::new("a", "src a", lines(&[10, 11])));

        let once = report.normalized();
        let twice = once.normalized();

        assert_eq!(once, twice);
        assert_eq!(once.all_covered_lines, lines(&[10, 11, 12]));
        let names: Vec<&String> = once.test_cases.keys().collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_normalized_rekeys_by_name() {
        let mut report = Report::new();
        report
            .test_cases
            .insert("stale".to_string(), TestCase::new("fresh", "", lines(&[1])));

        let normalized = report.normalized();
        assert!(normalized.get("stale").is_none());
        assert!(normalized.get("fresh").is_some());
    }

    #[test]
    fn test_passing_set() {
        let mut passing = PassingTests::new();
        passing.add_passing_test("t1");
        passing.add_passing_test("t2");
        passing.remove_from_passing_test("t1");
        passing.remove_from_passing_test("missing");

        assert!(!passing.is_passing("t1"));
        assert!(passing.is_passing("t2"));
        assert_eq!(passing.names().collect::<Vec<_>>(), vec!["t2"]);
    }

    #[test]
    fn test_report_json_shape() {
        let mut report = Report::new();
        report.insert(TestCase::new("t", "code", lines(&[3])));

        let value = serde_json::to_value(report.normalized()).unwrap();
        assert_eq!(value["test_cases"]["t"]["covered_lines"], serde_json::json!([3]));
        assert_eq!(value["all_covered_lines"], serde_json::json!([3]));
    }
}
