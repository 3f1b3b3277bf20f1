//! Unit tests for storage record types.

use super::*;
use crate::report::TestCase;

#[test]
fn test_session_record_new() {
    let record = SessionRecord::new(
        "sess-1",
        "pkg.Calc",
        &CodeFragmentTarget::Method("add(int,int)".to_string()),
        "/tmp/r",
    );

    assert_eq!(record.target, "method add(int,int)");
    assert_eq!(record.status, "idle");
    assert_eq!(record.requests, 0);
    assert!(record.error.is_none());
    assert_eq!(record.created_at, record.updated_at);
}

#[test]
fn test_session_record_failure() {
    let record = SessionRecord::new("s", "pkg.Calc", &CodeFragmentTarget::Class, "/tmp/r")
        .with_status(SessionState::Failed)
        .with_error("Invalid credential for OpenAI provided");

    assert_eq!(record.status, "failed");
    assert_eq!(
        record.error.as_deref(),
        Some("Invalid credential for OpenAI provided")
    );
}

#[test]
fn test_stored_cases_from_report() {
    let mut report = Report::new();
    report.insert(TestCase::new("a", "src", [10].into_iter().collect()));
    report.insert(TestCase::new("b", "src", [22].into_iter().collect()));
    let mut passing = PassingTests::new();
    passing.add_passing_test("a");

    let cases = StoredTestCase::from_report("s", &report, &passing);
    assert_eq!(cases.len(), 2);
    assert!(cases[0].passing);
    assert!(!cases[1].passing);
    assert_eq!(cases[1].covered_lines, std::collections::BTreeSet::from([22]));
}

#[test]
fn test_session_record_serde() {
    let record = SessionRecord::new("s", "pkg.Calc", &CodeFragmentTarget::Line(12), "/tmp/r");
    let json = serde_json::to_string(&record).unwrap();
    let back: SessionRecord = serde_json::from_str(&json).unwrap();
    assert_eq!(back, record);
}
