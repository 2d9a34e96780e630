//! SQLite access for the demo workload.
//!
//! The database is opened in WAL mode — replication reads the live WAL file,
//! so this is load-bearing, not a tuning choice. Cross-process contention
//! during a handoff window (the predecessor may still be committing) is left
//! to SQLite's own locking with a generous busy timeout rather than any
//! application-level coordination.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, warn};

/// Busy timeout covering predecessor/successor overlap during handoff.
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("failed to open database: {0}")]
    Open(#[source] sqlx::Error),

    #[error("database query failed: {0}")]
    Query(#[from] sqlx::Error),

    #[error("failed to read schema file {path}: {source}")]
    Schema { path: PathBuf, source: io::Error },
}

/// Timings for one counter-increment transaction.
#[derive(Debug, Clone, Copy)]
pub struct PageViewStats {
    pub count: i64,
    pub insert_time: Duration,
    pub select_time: Duration,
}

/// Handle to the local database file. Owned exclusively by this process;
/// created only after the restore step has completed.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if missing) the database at `path` with the pragmas
    /// replication depends on.
    pub async fn open(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    DatabaseError::Open(sqlx::Error::Io(e))
                })?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(DatabaseError::Open)?;

        info!(path = %path.display(), "Opened database");
        Ok(Self { pool })
    }

    /// Create the application schema on a fresh database. Keyed on the
    /// `page_views` table existing, not on where the file came from — a
    /// restored database already has it.
    pub async fn bootstrap_schema(&self, schema_path: Option<&Path>) -> Result<(), DatabaseError> {
        let initialized: i64 = sqlx::query_scalar(
            "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = 'page_views'",
        )
        .fetch_one(&self.pool)
        .await?;

        if initialized > 0 {
            return Ok(());
        }

        let Some(schema_path) = schema_path else {
            warn!("INITIAL_SCHEMA_PATH not specified and schema is missing");
            return Ok(());
        };

        let sql = std::fs::read_to_string(schema_path).map_err(|e| DatabaseError::Schema {
            path: schema_path.to_path_buf(),
            source: e,
        })?;
        sqlx::raw_sql(&sql).execute(&self.pool).await?;
        info!(schema = %schema_path.display(), "Bootstrapped schema");
        Ok(())
    }

    /// Cheap liveness probe.
    pub async fn health_check(&self) -> Result<(), DatabaseError> {
        sqlx::query_scalar::<_, i64>("SELECT 1 + 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }

    /// One write and one read in a single transaction: insert a page view,
    /// count the total.
    pub async fn record_page_view(&self) -> Result<PageViewStats, DatabaseError> {
        let mut tx = self.pool.begin().await?;

        let start = Instant::now();
        sqlx::query("INSERT INTO page_views DEFAULT VALUES")
            .execute(&mut *tx)
            .await?;
        let insert_time = start.elapsed();

        let start = Instant::now();
        let count: i64 = sqlx::query_scalar("SELECT count(*) FROM page_views")
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;
        let select_time = start.elapsed();

        Ok(PageViewStats {
            count,
            insert_time,
            select_time,
        })
    }

    /// Close the pool. Run before process exit so the last WAL frames are
    /// flushed by SQLite itself.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
