//! Integration tests for SQLite storage layer
//!
//! Tests database operations using an in-memory SQLite database, plus one
//! file-backed database to check migrations and reopening.

use chrono::{Duration, Utc};
use pretty_assertions::assert_eq;
use std::collections::BTreeSet;

use llm_testgen::config::DatabaseConfig;
use llm_testgen::context::CodeFragmentTarget;
use llm_testgen::error::StorageError;
use llm_testgen::pipeline::SessionState;
use llm_testgen::report::{PassingTests, Report, TestCase};
use llm_testgen::storage::{SessionRecord, SqliteStorage, Storage, StoredTestCase};

/// Create an in-memory storage instance for testing
async fn create_test_storage() -> SqliteStorage {
    SqliteStorage::new_in_memory()
        .await
        .expect("Failed to create in-memory storage")
}

fn session(id: &str) -> SessionRecord {
    SessionRecord::new(
        id,
        "pkg.Calc",
        &CodeFragmentTarget::Method("add(int,int)".to_string()),
        format!("/tmp/test_gen_result_{}", id),
    )
}

fn calc_report() -> (Report, PassingTests) {
    let mut report = Report::new();
    report.insert(TestCase::new(
        "testAdd_shouldReturn5",
        "@Test\npublic void testAdd_shouldReturn5() {}",
        BTreeSet::from([10]),
    ));
    report.insert(TestCase::new(
        "testDivide_byZero",
        "@Test\npublic void testDivide_byZero() {}",
        BTreeSet::from([20, 22]),
    ));
    let mut passing = PassingTests::new();
    passing.add_passing_test("testAdd_shouldReturn5");
    (report.normalized(), passing)
}

#[cfg(test)]
mod session_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_create_and_get_session() {
        let storage = create_test_storage().await;
        let record = session("s1");

        storage.create_session(&record).await.unwrap();
        let retrieved = storage.get_session("s1").await.unwrap().unwrap();

        assert_eq!(retrieved.class_fqn, "pkg.Calc");
        assert_eq!(retrieved.target, "method add(int,int)");
        assert_eq!(retrieved.status, "idle");
        assert_eq!(retrieved.poly_depth, None);
        assert_eq!(retrieved.created_at.timestamp(), record.created_at.timestamp());
    }

    #[tokio::test]
    async fn test_get_nonexistent_session() {
        let storage = create_test_storage().await;
        assert!(storage.get_session("nonexistent-id").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_session() {
        let storage = create_test_storage().await;
        let mut record = session("s1");
        storage.create_session(&record).await.unwrap();

        record.poly_depth = Some(1);
        record.input_params_depth = Some(2);
        record.poly_depth_reductions = 1;
        record.requests = 2;
        let record = record
            .with_status(SessionState::Failed)
            .with_error("Invalid credential for OpenAI provided");
        storage.update_session(&record).await.unwrap();

        let retrieved = storage.get_session("s1").await.unwrap().unwrap();
        assert_eq!(retrieved.status, "failed");
        assert_eq!(retrieved.poly_depth, Some(1));
        assert_eq!(retrieved.input_params_depth, Some(2));
        assert_eq!(retrieved.poly_depth_reductions, 1);
        assert_eq!(retrieved.requests, 2);
        assert_eq!(
            retrieved.error.as_deref(),
            Some("Invalid credential for OpenAI provided")
        );
    }

    #[tokio::test]
    async fn test_update_missing_session_fails() {
        let storage = create_test_storage().await;
        let err = storage.update_session(&session("ghost")).await.unwrap_err();
        assert!(matches!(err, StorageError::SessionNotFound { .. }));
    }

    #[tokio::test]
    async fn test_list_sessions_newest_first() {
        let storage = create_test_storage().await;
        let now = Utc::now();

        for (i, id) in ["old", "middle", "new"].iter().enumerate() {
            let mut record = session(id);
            record.created_at = now - Duration::minutes(10 - i as i64);
            storage.create_session(&record).await.unwrap();
        }

        let ids: Vec<String> = storage
            .list_sessions(2)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec!["new".to_string(), "middle".to_string()]);
    }
}

#[cfg(test)]
mod test_case_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_save_and_get_test_cases() {
        let storage = create_test_storage().await;
        storage.create_session(&session("s1")).await.unwrap();

        let (report, passing) = calc_report();
        let cases = StoredTestCase::from_report("s1", &report, &passing);
        storage.save_test_cases("s1", &cases).await.unwrap();

        let stored = storage.get_test_cases("s1").await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].name, "testAdd_shouldReturn5");
        assert!(stored[0].passing);
        assert_eq!(stored[0].covered_lines, BTreeSet::from([10]));
        assert_eq!(stored[1].name, "testDivide_byZero");
        assert!(!stored[1].passing);
        assert_eq!(stored[1].covered_lines, BTreeSet::from([20, 22]));
    }

    #[tokio::test]
    async fn test_save_replaces_previous_cases() {
        let storage = create_test_storage().await;
        storage.create_session(&session("s1")).await.unwrap();

        let (report, passing) = calc_report();
        let cases = StoredTestCase::from_report("s1", &report, &passing);
        storage.save_test_cases("s1", &cases).await.unwrap();
        storage.save_test_cases("s1", &cases[..1]).await.unwrap();

        let stored = storage.get_test_cases("s1").await.unwrap();
        assert_eq!(stored.len(), 1);
    }

    #[tokio::test]
    async fn test_cases_require_existing_session() {
        let storage = create_test_storage().await;
        let (report, passing) = calc_report();
        let cases = StoredTestCase::from_report("missing", &report, &passing);

        assert!(storage.save_test_cases("missing", &cases).await.is_err());
    }

    #[tokio::test]
    async fn test_delete_session_cascades() {
        let storage = create_test_storage().await;
        storage.create_session(&session("s1")).await.unwrap();
        let (report, passing) = calc_report();
        storage
            .save_test_cases("s1", &StoredTestCase::from_report("s1", &report, &passing))
            .await
            .unwrap();

        storage.delete_session("s1").await.unwrap();

        assert!(storage.get_session("s1").await.unwrap().is_none());
        assert!(storage.get_test_cases("s1").await.unwrap().is_empty());
    }
}

#[tokio::test]
async fn test_file_database_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let config = DatabaseConfig {
        path: dir.path().join("nested").join("testgen.db"),
        max_connections: 2,
    };

    {
        let storage = SqliteStorage::new(&config).await.unwrap();
        storage.create_session(&session("persisted")).await.unwrap();
        storage.pool().close().await;
    }

    let storage = SqliteStorage::new(&config).await.unwrap();
    assert!(storage.get_session("persisted").await.unwrap().is_some());
}
