//! Embedded database with a single-writer discipline
//!
//! Wraps a local libsql database (single file plus WAL sibling). Read handles
//! are independent connections and may be used concurrently; mutation happens
//! on exactly one writer connection, which [`take_writer`](Store::take_writer)
//! hands out once. The sole legitimate holder is the write queue worker.

mod schema;
pub mod write_queue;

pub use write_queue::{WriteQueue, WriteStmt};

use std::fs::File;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use libsql::Connection;

use crate::config::DatabaseConfig;
use crate::error::{Error, Result};
use crate::util::now_ts;

/// Outcome classification for writer-side failures
///
/// `Conflict` is retryable (SQLITE_BUSY-class contention); `Fatal` is not.
#[derive(Debug)]
pub enum StoreError {
    Conflict(String),
    Fatal(String),
}

impl StoreError {
    pub(crate) fn classify(err: libsql::Error) -> Self {
        let text = err.to_string();
        let lower = text.to_lowercase();
        if lower.contains("busy")
            || lower.contains("locked")
            || lower.contains("interrupted")
            || lower.contains("disk i/o")
        {
            Self::Conflict(text)
        } else {
            Self::Fatal(text)
        }
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Conflict(msg) => write!(f, "retryable store conflict: {}", msg),
            Self::Fatal(msg) => write!(f, "fatal store error: {}", msg),
        }
    }
}

/// The embedded store
pub struct Store {
    db: libsql::Database,
    /// Advisory lock held for the process lifetime; released on drop
    _lock: File,
    lock_path: PathBuf,
    writer_taken: AtomicBool,
}

impl Store {
    /// Open the database, refusing if another process holds it
    ///
    /// Startup work, in order: acquire the lock file, enable WAL and foreign
    /// keys, create the schema if absent, sweep expired sessions, run
    /// one-time migrations.
    pub async fn open(config: &DatabaseConfig) -> Result<Self> {
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let lock_path = config.path.with_extension("lock");
        let lock = File::create(&lock_path)?;
        lock.try_lock().map_err(|_| {
            Error::Store(format!(
                "another process holds the database at '{}'",
                config.path.display()
            ))
        })?;

        let db = libsql::Builder::new_local(&config.path)
            .build()
            .await
            .map_err(|e| {
                Error::Store(format!(
                    "failed to open database at '{}': {}",
                    config.path.display(),
                    e
                ))
            })?;

        let store = Self {
            db,
            _lock: lock,
            lock_path,
            writer_taken: AtomicBool::new(false),
        };

        let conn = store.connect()?;
        for pragma in ["PRAGMA journal_mode=WAL", "PRAGMA foreign_keys=ON"] {
            let mut rows = conn
                .query(pragma, ())
                .await
                .map_err(|e| Error::Store(format!("{} failed: {}", pragma, e)))?;
            // Pragmas may return a result row; drain it
            while rows
                .next()
                .await
                .map_err(|e| Error::Store(format!("{} failed: {}", pragma, e)))?
                .is_some()
            {}
        }

        schema::ensure_schema(&conn).await?;
        store.sweep_expired_sessions(&conn).await?;
        schema::run_migrations(&conn).await?;

        tracing::info!(path = %config.path.display(), "Store opened");
        Ok(store)
    }

    /// Independent connection for concurrent reads
    ///
    /// Callers drop the handle when done. Read handles never block the writer
    /// under WAL, and vice versa.
    pub fn read_handle(&self) -> Result<Connection> {
        self.connect()
    }

    /// Hand out the single writer connection
    ///
    /// A second call is an invariant violation: the write queue worker is the
    /// only legitimate holder.
    pub fn take_writer(&self) -> Result<Connection> {
        if self.writer_taken.swap(true, Ordering::SeqCst) {
            return Err(Error::Internal(
                "writer connection requested twice; only the write queue may hold it".into(),
            ));
        }
        self.connect()
    }

    fn connect(&self) -> Result<Connection> {
        self.db
            .connect()
            .map_err(|e| Error::Store(format!("failed to open connection: {}", e)))
    }

    /// Delete session rows whose expiry has passed (startup-only sweep;
    /// expired tokens are otherwise treated lazily at validation time)
    async fn sweep_expired_sessions(&self, conn: &Connection) -> Result<()> {
        let swept = conn
            .execute(
                "DELETE FROM sessions WHERE expires_at <= ?1",
                libsql::params![now_ts()],
            )
            .await
            .map_err(|e| Error::Store(format!("session sweep failed: {}", e)))?;
        if swept > 0 {
            tracing::info!(swept, "Removed expired sessions at startup");
        }
        Ok(())
    }

    /// Mark the store closed; called after the write queue has drained
    ///
    /// The advisory lock itself releases when the handle drops; removing the
    /// marker keeps operators from mistaking it for a live hold.
    pub fn close(&self) {
        if let Err(e) = std::fs::remove_file(&self.lock_path) {
            tracing::debug!("Could not remove lock file: {}", e);
        }
        tracing::info!("Store closed");
    }
}

/// Flush the WAL into the main database file
///
/// Issued by the write queue worker on its own connection.
pub(crate) async fn checkpoint(conn: &Connection) -> std::result::Result<(), StoreError> {
    let mut rows = conn
        .query("PRAGMA wal_checkpoint(TRUNCATE)", ())
        .await
        .map_err(StoreError::classify)?;
    while rows.next().await.map_err(StoreError::classify)?.is_some() {}
    Ok(())
}
