//! Storage layer for generation session history.
//!
//! This module provides SQLite-based storage for generation sessions and
//! the test cases collected for them.

mod sqlite;

#[cfg(test)]
#[path = "types_tests.rs"]
mod types_tests;

pub use sqlite::SqliteStorage;

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::context::CodeFragmentTarget;
use crate::error::StorageResult;
use crate::pipeline::SessionState;
use crate::report::{PassingTests, Report};

/// One generation session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Session UUID.
    pub id: String,
    /// Class under test.
    pub class_fqn: String,
    /// Human-readable target (`class`, `method add(int,int)`, `line 12`).
    pub target: String,
    /// Last session state.
    pub status: String,
    /// Polymorphism depth the final request was built with.
    pub poly_depth: Option<u32>,
    /// Input-parameter depth the final request was built with.
    pub input_params_depth: Option<u32>,
    pub poly_depth_reductions: u32,
    pub input_params_depth_reductions: u32,
    /// Generation requests sent.
    pub requests: u32,
    /// User-facing error for failed sessions.
    pub error: Option<String>,
    pub result_dir: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionRecord {
    /// Create a record for a session that just started.
    pub fn new(
        id: impl Into<String>,
        class_fqn: impl Into<String>,
        target: &CodeFragmentTarget,
        result_dir: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            class_fqn: class_fqn.into(),
            target: target.to_string(),
            status: SessionState::Idle.as_str().to_string(),
            poly_depth: None,
            input_params_depth: None,
            poly_depth_reductions: 0,
            input_params_depth_reductions: 0,
            requests: 0,
            error: None,
            result_dir: result_dir.into(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Record a state change.
    pub fn with_status(mut self, state: SessionState) -> Self {
        self.status = state.as_str().to_string();
        self.updated_at = Utc::now();
        self
    }

    /// Record the failure message.
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// A test case collected in a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredTestCase {
    pub session_id: String,
    pub name: String,
    pub source: String,
    pub covered_lines: BTreeSet<u32>,
    pub passing: bool,
    pub created_at: DateTime<Utc>,
}

impl StoredTestCase {
    /// Flatten a report into storable cases.
    pub fn from_report(session_id: &str, report: &Report, passing: &PassingTests) -> Vec<Self> {
        let now = Utc::now();
        report
            .test_cases
            .values()
            .map(|case| Self {
                session_id: session_id.to_string(),
                name: case.name.clone(),
                source: case.source.clone(),
                covered_lines: case.covered_lines.clone(),
                passing: passing.is_passing(&case.name),
                created_at: now,
            })
            .collect()
    }
}

/// Storage trait for session persistence
#[async_trait]
pub trait Storage: Send + Sync {
    /// Create a new session.
    async fn create_session(&self, session: &SessionRecord) -> StorageResult<()>;
    /// Get a session by ID.
    async fn get_session(&self, id: &str) -> StorageResult<Option<SessionRecord>>;
    /// Update an existing session.
    async fn update_session(&self, session: &SessionRecord) -> StorageResult<()>;
    /// Most recent sessions first.
    async fn list_sessions(&self, limit: u32) -> StorageResult<Vec<SessionRecord>>;
    /// Delete a session and its test cases.
    async fn delete_session(&self, id: &str) -> StorageResult<()>;

    /// Store the collected test cases of a session, replacing earlier ones.
    async fn save_test_cases(&self, session_id: &str, cases: &[StoredTestCase])
        -> StorageResult<()>;
    /// Test cases of a session ordered by name.
    async fn get_test_cases(&self, session_id: &str) -> StorageResult<Vec<StoredTestCase>>;
}
