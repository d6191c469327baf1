//! SQLite persistence for the quota ledger and schedule records
//!
//! Every write runs in an immediate transaction: SQLite takes the write lock
//! at `BEGIN`, and a contended lock is waited on for at most the configured
//! busy timeout before surfacing as [`SchedulerError::LockTimeout`].

use rusqlite::{Connection, OpenFlags, Transaction, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::DatabaseConfig;
use crate::scheduler::error::{SchedulerError, SchedulerResult};

/// Database handle
///
/// Holds the location and lock policy only; each operation opens its own
/// connection so concurrent callers never share one.
#[derive(Debug, Clone)]
pub struct Database {
    path: PathBuf,
    lock_timeout: Duration,
}

impl Database {
    /// Handle for the configured location without touching the disk
    ///
    /// Operations fail with [`SchedulerError::StoreUnavailable`] until the
    /// file exists.
    pub fn new(config: &DatabaseConfig) -> Self {
        Self {
            path: config.sqlite_path.clone(),
            lock_timeout: config.lock_timeout(),
        }
    }

    /// Open (or create) the database described by the config
    pub fn open(config: &DatabaseConfig) -> SchedulerResult<Self> {
        Self::open_path(&config.sqlite_path, config.lock_timeout())
    }

    /// Open (or create) a database at `path`
    pub fn open_path(path: impl AsRef<Path>, lock_timeout: Duration) -> SchedulerResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    SchedulerError::unavailable("create_dir", format!("{}: {e}", parent.display()))
                })?;
            }
        }

        let conn = Connection::open(path)
            .map_err(|e| SchedulerError::unavailable("open", format!("{}: {e}", path.display())))?;
        conn.busy_timeout(lock_timeout)?;

        // WAL lets display reads proceed while a reservation holds the write lock
        conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get::<_, String>(0))?;
        conn.execute_batch("PRAGMA synchronous=NORMAL;")?;

        Self::create_schema(&conn)?;

        tracing::info!(path = %path.display(), "Schedule database initialized");
        Ok(Self {
            path: path.to_path_buf(),
            lock_timeout,
        })
    }

    /// Create database schema
    fn create_schema(conn: &Connection) -> SchedulerResult<()> {
        conn.execute_batch(
            r#"
                CREATE TABLE IF NOT EXISTS daily_quota (
                    date TEXT PRIMARY KEY,
                    quota_used INTEGER NOT NULL DEFAULT 0 CHECK (quota_used >= 0),
                    quota_limit INTEGER NOT NULL,
                    upload_count INTEGER NOT NULL DEFAULT 0 CHECK (upload_count >= 0),
                    final_uploaded INTEGER NOT NULL DEFAULT 0 CHECK (final_uploaded >= 0),
                    short_uploaded INTEGER NOT NULL DEFAULT 0 CHECK (short_uploaded >= 0),
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS scheduled_uploads (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    video_path TEXT NOT NULL,
                    video_type TEXT NOT NULL,
                    scheduled_publish_time TEXT NOT NULL,
                    publish_date TEXT NOT NULL,
                    publish_slot TEXT NOT NULL,
                    upload_status TEXT NOT NULL DEFAULT 'scheduled',
                    external_id TEXT,
                    error_message TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_scheduled_uploads_path
                    ON scheduled_uploads(video_path);

                CREATE INDEX IF NOT EXISTS idx_scheduled_uploads_day
                    ON scheduled_uploads(publish_date, upload_status);
                "#,
        )
        .map_err(|e| SchedulerError::from_sqlite("create_schema", e))?;

        Ok(())
    }

    /// Database file location
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bounded lock wait
    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    /// Open a connection to an existing database
    ///
    /// Never creates the file: a missing database is an unreachable store.
    pub fn connect(&self) -> SchedulerResult<Connection> {
        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| SchedulerError::unavailable("connect", format!("{}: {e}", self.path.display())))?;

        conn.busy_timeout(self.lock_timeout)?;
        conn.execute_batch("PRAGMA synchronous=NORMAL;")?;
        Ok(conn)
    }

    /// Run a read-only operation without taking the write lock
    pub fn read<T, F>(&self, operation: &str, f: F) -> SchedulerResult<T>
    where
        F: FnOnce(&Connection) -> SchedulerResult<T>,
    {
        let conn = self.connect()?;
        f(&conn).map_err(|e| tag_operation(operation, e))
    }

    /// Run `f` inside an immediate transaction
    ///
    /// The write lock is held from `BEGIN` until commit. SQLite's write lock
    /// covers the whole database, so writers to different days also queue
    /// behind each other; readers are not blocked under WAL. Any error
    /// returned by `f` drops the transaction, rolling back everything it
    /// wrote.
    pub fn write<T, F>(&self, operation: &str, f: F) -> SchedulerResult<T>
    where
        F: FnOnce(&Transaction<'_>) -> SchedulerResult<T>,
    {
        let mut conn = self.connect()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| SchedulerError::from_sqlite(operation, e))?;

        let value = f(&tx).map_err(|e| tag_operation(operation, e))?;

        tx.commit()
            .map_err(|e| SchedulerError::from_sqlite(operation, e))?;
        Ok(value)
    }

    /// Check that the store is reachable
    pub fn ping(&self) -> SchedulerResult<()> {
        self.read("ping", |conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
            Ok(())
        })
    }
}

/// Replace the generic "sqlite" operation label with the caller's
fn tag_operation(operation: &str, err: SchedulerError) -> SchedulerError {
    match err {
        SchedulerError::Storage { operation: op, reason } if op == "sqlite" => {
            SchedulerError::Storage {
                operation: operation.to_string(),
                reason,
            }
        }
        SchedulerError::StoreUnavailable { operation: op, reason } if op == "sqlite" => {
            SchedulerError::StoreUnavailable {
                operation: operation.to_string(),
                reason,
            }
        }
        SchedulerError::LockTimeout { operation: op, reason } if op == "sqlite" => {
            SchedulerError::LockTimeout {
                operation: operation.to_string(),
                reason,
            }
        }
        other => other,
    }
}
