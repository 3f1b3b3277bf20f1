use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::collections::BTreeSet;
use std::str::FromStr;
use tracing::{debug, info};

use super::{SessionRecord, Storage, StoredTestCase};
use crate::config::DatabaseConfig;
use crate::error::{StorageError, StorageResult};

/// Static migrator that embeds migrations at compile time
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// SQLite-backed storage implementation
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Create a new SQLite storage instance
    pub async fn new(config: &DatabaseConfig) -> StorageResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Connection {
                message: format!("Failed to create database directory: {}", e),
            })?;
        }

        let database_url = format!("sqlite://{}?mode=rwc", config.path.display());

        let options = SqliteConnectOptions::from_str(&database_url)
            .map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to connect to database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Create an in-memory storage instance (for tests)
    pub async fn new_in_memory() -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .foreign_keys(true);

        // Every connection to :memory: opens its own database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to connect to database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Run database migrations using embedded sqlx migrations
    async fn run_migrations(&self) -> StorageResult<()> {
        info!("Running database migrations...");

        MIGRATOR.run(&self.pool).await.map_err(|e| StorageError::Migration {
            message: format!("Failed to run migrations: {}", e),
        })?;

        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get the underlying pool for advanced queries
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn create_session(&self, session: &SessionRecord) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sessions (id, class_fqn, target, status, poly_depth, input_params_depth,
                poly_depth_reductions, input_params_depth_reductions, requests, error, result_dir,
                created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&session.id)
        .bind(&session.class_fqn)
        .bind(&session.target)
        .bind(&session.status)
        .bind(session.poly_depth.map(i64::from))
        .bind(session.input_params_depth.map(i64::from))
        .bind(i64::from(session.poly_depth_reductions))
        .bind(i64::from(session.input_params_depth_reductions))
        .bind(i64::from(session.requests))
        .bind(&session.error)
        .bind(&session.result_dir)
        .bind(session.created_at.to_rfc3339())
        .bind(session.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        debug!(session_id = %session.id, "Session created");
        Ok(())
    }

    async fn get_session(&self, id: &str) -> StorageResult<Option<SessionRecord>> {
        let row: Option<SessionRow> = sqlx::query_as(
            r#"
            SELECT id, class_fqn, target, status, poly_depth, input_params_depth,
                poly_depth_reductions, input_params_depth_reductions, requests, error, result_dir,
                created_at, updated_at
            FROM sessions
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.into()))
    }

    async fn update_session(&self, session: &SessionRecord) -> StorageResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET status = ?, poly_depth = ?, input_params_depth = ?, poly_depth_reductions = ?,
                input_params_depth_reductions = ?, requests = ?, error = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&session.status)
        .bind(session.poly_depth.map(i64::from))
        .bind(session.input_params_depth.map(i64::from))
        .bind(i64::from(session.poly_depth_reductions))
        .bind(i64::from(session.input_params_depth_reductions))
        .bind(i64::from(session.requests))
        .bind(&session.error)
        .bind(session.updated_at.to_rfc3339())
        .bind(&session.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::SessionNotFound {
                session_id: session.id.clone(),
            });
        }

        Ok(())
    }

    async fn list_sessions(&self, limit: u32) -> StorageResult<Vec<SessionRecord>> {
        let rows: Vec<SessionRow> = sqlx::query_as(
            r#"
            SELECT id, class_fqn, target, status, poly_depth, input_params_depth,
                poly_depth_reductions, input_params_depth_reductions, requests, error, result_dir,
                created_at, updated_at
            FROM sessions
            ORDER BY created_at DESC
            LIMIT ?
            "#,
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    async fn delete_session(&self, id: &str) -> StorageResult<()> {
        sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn save_test_cases(
        &self,
        session_id: &str,
        cases: &[StoredTestCase],
    ) -> StorageResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM test_cases WHERE session_id = ?")
            .bind(session_id)
            .execute(&mut *tx)
            .await?;

        for case in cases {
            let covered_lines =
                serde_json::to_string(&case.covered_lines).map_err(|e| StorageError::Query {
                    message: format!("Failed to serialize covered lines: {}", e),
                })?;

            sqlx::query(
                r#"
                INSERT INTO test_cases (session_id, name, source, covered_lines, passing, created_at)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(session_id)
            .bind(&case.name)
            .bind(&case.source)
            .bind(&covered_lines)
            .bind(case.passing)
            .bind(case.created_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!(session_id, cases = cases.len(), "Test cases saved");
        Ok(())
    }

    async fn get_test_cases(&self, session_id: &str) -> StorageResult<Vec<StoredTestCase>> {
        let rows: Vec<TestCaseRow> = sqlx::query_as(
            r#"
            SELECT session_id, name, source, covered_lines, passing, created_at
            FROM test_cases
            WHERE session_id = ?
            ORDER BY name ASC
            "#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }
}

fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

// Internal row types for SQLx mapping
#[derive(sqlx::FromRow)]
struct SessionRow {
    id: String,
    class_fqn: String,
    target: String,
    status: String,
    poly_depth: Option<i64>,
    input_params_depth: Option<i64>,
    poly_depth_reductions: i64,
    input_params_depth_reductions: i64,
    requests: i64,
    error: Option<String>,
    result_dir: String,
    created_at: String,
    updated_at: String,
}

impl From<SessionRow> for SessionRecord {
    fn from(row: SessionRow) -> Self {
        Self {
            id: row.id,
            class_fqn: row.class_fqn,
            target: row.target,
            status: row.status,
            poly_depth: row.poly_depth.map(|d| d as u32),
            input_params_depth: row.input_params_depth.map(|d| d as u32),
            poly_depth_reductions: row.poly_depth_reductions as u32,
            input_params_depth_reductions: row.input_params_depth_reductions as u32,
            requests: row.requests as u32,
            error: row.error,
            result_dir: row.result_dir,
            created_at: parse_timestamp(&row.created_at),
            updated_at: parse_timestamp(&row.updated_at),
        }
    }
}

#[derive(sqlx::FromRow)]
struct TestCaseRow {
    session_id: String,
    name: String,
    source: String,
    covered_lines: String,
    passing: bool,
    created_at: String,
}

impl From<TestCaseRow> for StoredTestCase {
    fn from(row: TestCaseRow) -> Self {
        Self {
            session_id: row.session_id,
            name: row.name,
            source: row.source,
            covered_lines: serde_json::from_str::<BTreeSet<u32>>(&row.covered_lines)
                .unwrap_or_default(),
            passing: row.passing,
            created_at: parse_timestamp(&row.created_at),
        }
    }
}
