//! libSQL storage layer (local file, offline).
//!
//! The [`Storage`] struct wraps a libSQL database holding the summarizer
//! response cache and the history of reading runs.
//!
//! **Access rules:**
//! - `cogreader read`: read-write via [`Storage::open`]
//! - `cogreader history`: read-only via [`Storage::open_readonly`]

mod migrations;

use std::path::Path;

use chrono::{DateTime, Utc};
use cogreader_shared::{ReaderError, Result};
use libsql::{Connection, Database, params};
use uuid::Uuid;

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

/// One row of `reading_runs`.
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: String,
    pub source: String,
    pub title: String,
    pub passes: u32,
    pub model_id: String,
    pub started_at: DateTime<Utc>,
    /// `None` while the run is in flight or if it aborted.
    pub finished_at: Option<DateTime<Utc>>,
    pub section_count: Option<u64>,
    pub degraded_count: Option<u64>,
}

fn storage_err(e: impl std::fmt::Display) -> ReaderError {
    ReaderError::Storage(e.to_string())
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ReaderError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ReaderError::Storage(format!(
                "database not found at {}",
                path.display()
            )));
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    ReaderError::Storage(format!("migration v{} failed: {e}", migration.version))
                })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(ReaderError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Summary cache operations
    // -----------------------------------------------------------------------

    /// Get a cached summarizer response.
    pub async fn get_cached_summary(&self, prompt_hash: &str, model_id: &str) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT result_json FROM summary_cache WHERE prompt_hash = ?1 AND model_id = ?2",
                params![prompt_hash, model_id],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row.get::<String>(0).map_err(storage_err)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }

    /// Store a summarizer response (upserts).
    pub async fn set_cached_summary(
        &self,
        prompt_hash: &str,
        model_id: &str,
        task: &str,
        result_json: &str,
    ) -> Result<()> {
        self.check_writable()?;
        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO summary_cache (id, prompt_hash, model_id, task, result_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(prompt_hash, model_id) DO UPDATE SET
                   task = excluded.task,
                   result_json = excluded.result_json,
                   created_at = excluded.created_at",
                params![id.as_str(), prompt_hash, model_id, task, result_json, now.as_str()],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Drop every cached response. Returns the number of rows removed.
    pub async fn clear_summary_cache(&self) -> Result<u64> {
        self.check_writable()?;
        self.conn
            .execute("DELETE FROM summary_cache", params![])
            .await
            .map_err(storage_err)
    }

    // -----------------------------------------------------------------------
    // Run history operations
    // -----------------------------------------------------------------------

    /// Record the start of a reading run.
    pub async fn insert_run(
        &self,
        run_id: &str,
        source: &str,
        title: &str,
        passes: u32,
        model_id: &str,
    ) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO reading_runs (id, source, title, passes, model_id, started_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![run_id, source, title, passes, model_id, now.as_str()],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Mark a run as finished with its final counts.
    pub async fn finish_run(&self, run_id: &str, section_count: usize, degraded_count: usize) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        let updated = self
            .conn
            .execute(
                "UPDATE reading_runs SET finished_at = ?1, section_count = ?2, degraded_count = ?3
                 WHERE id = ?4",
                params![now.as_str(), section_count as i64, degraded_count as i64, run_id],
            )
            .await
            .map_err(storage_err)?;

        if updated == 0 {
            return Err(ReaderError::Storage(format!("unknown run '{run_id}'")));
        }
        Ok(())
    }

    /// Most recent runs first.
    pub async fn list_runs(&self, limit: u32) -> Result<Vec<RunRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, source, title, passes, model_id, started_at, finished_at,
                        section_count, degraded_count
                 FROM reading_runs ORDER BY started_at DESC, id DESC LIMIT ?1",
                params![limit],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_run(&row)?);
        }
        Ok(results)
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ReaderError::Storage(format!("invalid date: {e}")))
}

/// Convert a database row to a [`RunRecord`].
fn row_to_run(row: &libsql::Row) -> Result<RunRecord> {
    let started: String = row.get(5).map_err(storage_err)?;
    let finished: Option<String> = row.get::<String>(6).ok();

    Ok(RunRecord {
        id: row.get::<String>(0).map_err(storage_err)?,
        source: row.get::<String>(1).map_err(storage_err)?,
        title: row.get::<String>(2).map_err(storage_err)?,
        passes: row.get::<u32>(3).map_err(storage_err)?,
        model_id: row.get::<String>(4).map_err(storage_err)?,
        started_at: parse_timestamp(&started)?,
        finished_at: finished.as_deref().map(parse_timestamp).transpose()?,
        section_count: row.get::<i64>(7).ok().map(|v| v as u64),
        degraded_count: row.get::<i64>(8).ok().map(|v| v as u64),
    })
}
