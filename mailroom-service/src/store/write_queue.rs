//! In-process write serializer
//!
//! Every mutation in the service flows through this queue. A single worker
//! task owns the writer connection, applies each submission (one statement or
//! an atomic batch) with bounded retries on retryable conflicts, and issues
//! periodic WAL checkpoints. Submitters always observe a definite outcome;
//! retries surface only as latency.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use libsql::{Connection, TransactionBehavior, Value};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::StoreError;
use crate::config::DatabaseConfig;
use crate::error::{Error, Result};

/// Retry attempts per submission
const MAX_ATTEMPTS: u32 = 3;
/// Base backoff; doubles per attempt (100, 200, 400 ms)
const BACKOFF_BASE: Duration = Duration::from_millis(100);

/// One parameterized SQL statement headed for the writer
#[derive(Debug, Clone)]
pub struct WriteStmt {
    pub sql: String,
    pub params: Vec<Value>,
}

impl WriteStmt {
    pub fn new(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

/// Param helper: TEXT value
pub fn text(value: impl Into<String>) -> Value {
    Value::Text(value.into())
}

/// Param helper: nullable TEXT value
pub fn opt_text(value: Option<String>) -> Value {
    match value {
        Some(v) => Value::Text(v),
        None => Value::Null,
    }
}

/// Param helper: INTEGER value
pub fn integer(value: i64) -> Value {
    Value::Integer(value)
}

struct Job {
    stmts: Vec<WriteStmt>,
    reply: oneshot::Sender<Result<()>>,
}

/// Serialized write path in front of the store
pub struct WriteQueue {
    tx: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    depth: Arc<AtomicUsize>,
    soft_limit: usize,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl WriteQueue {
    /// Start the worker on the store's writer connection
    pub fn start(writer: Connection, config: &DatabaseConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let depth = Arc::new(AtomicUsize::new(0));

        let worker = tokio::spawn(worker_loop(
            writer,
            rx,
            Arc::clone(&depth),
            config.checkpoint_every_writes,
            Duration::from_secs(config.checkpoint_interval_secs),
        ));

        Self {
            tx: Mutex::new(Some(tx)),
            depth,
            soft_limit: config.write_queue_soft_limit,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Enqueue a single mutation and await its outcome
    pub async fn submit(&self, stmt: WriteStmt) -> Result<()> {
        self.submit_batch(vec![stmt]).await
    }

    /// Enqueue an atomic batch and await its outcome
    ///
    /// The batch commits or rolls back as one transaction; readers never see
    /// a partial application.
    pub async fn submit_batch(&self, stmts: Vec<WriteStmt>) -> Result<()> {
        let reply = self.enqueue(stmts)?;
        reply
            .await
            .map_err(|_| Error::Internal("write worker dropped a pending submission".into()))?
    }

    /// Enqueue without awaiting; the returned receiver resolves to the outcome
    ///
    /// Used by the audit sink's fire-and-forget path.
    pub fn enqueue(&self, stmts: Vec<WriteStmt>) -> Result<oneshot::Receiver<Result<()>>> {
        if self.depth.load(Ordering::Relaxed) > self.soft_limit {
            return Err(Error::Busy);
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        let guard = self.tx.lock().expect("write queue sender lock poisoned");
        let tx = guard
            .as_ref()
            .ok_or_else(|| Error::Internal("write queue is shut down".into()))?;

        self.depth.fetch_add(1, Ordering::Relaxed);
        if tx.send(Job {
            stmts,
            reply: reply_tx,
        })
        .is_err()
        {
            // The receiver is only gone if the worker died abnormally; the
            // service has no partial mode without its writer.
            tracing::error!("Write worker is gone; terminating");
            std::process::abort();
        }

        Ok(reply_rx)
    }

    /// Current queue depth, for health reporting
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    /// Stop accepting work, drain in-flight submissions, final checkpoint
    pub async fn shutdown(&self) {
        let tx = self
            .tx
            .lock()
            .expect("write queue sender lock poisoned")
            .take();
        drop(tx);

        let worker = self
            .worker
            .lock()
            .expect("write queue worker lock poisoned")
            .take();
        if let Some(handle) = worker {
            if let Err(e) = handle.await {
                tracing::error!("Write worker terminated abnormally: {}", e);
            }
        }
        tracing::info!("Write queue drained and stopped");
    }
}

async fn worker_loop(
    conn: Connection,
    mut rx: mpsc::UnboundedReceiver<Job>,
    depth: Arc<AtomicUsize>,
    checkpoint_every: u64,
    checkpoint_interval: Duration,
) {
    let mut writes_since_checkpoint: u64 = 0;
    let mut last_checkpoint = Instant::now();

    loop {
        let job = tokio::select! {
            job = rx.recv() => job,
            _ = tokio::time::sleep_until(last_checkpoint + checkpoint_interval) => {
                if writes_since_checkpoint > 0 {
                    run_checkpoint(&conn).await;
                    writes_since_checkpoint = 0;
                }
                last_checkpoint = Instant::now();
                continue;
            }
        };

        let Some(job) = job else {
            break;
        };
        depth.fetch_sub(1, Ordering::Relaxed);

        let outcome = apply_with_retry(&conn, &job.stmts).await;
        let succeeded = outcome.is_ok();
        // The submitter may have abandoned its future (request deadline);
        // the write itself is already durable either way.
        let _ = job.reply.send(outcome);

        if succeeded {
            writes_since_checkpoint += 1;
            if writes_since_checkpoint >= checkpoint_every
                || last_checkpoint.elapsed() >= checkpoint_interval
            {
                run_checkpoint(&conn).await;
                writes_since_checkpoint = 0;
                last_checkpoint = Instant::now();
            }
        }
    }

    // Drained; leave the WAL flushed before the store closes.
    run_checkpoint(&conn).await;
}

async fn apply_with_retry(conn: &Connection, stmts: &[WriteStmt]) -> Result<()> {
    let mut attempt = 1;
    loop {
        match apply_once(conn, stmts).await {
            Ok(()) => return Ok(()),
            Err(StoreError::Conflict(msg)) if attempt < MAX_ATTEMPTS => {
                let backoff = BACKOFF_BASE * 2u32.pow(attempt - 1);
                tracing::debug!(attempt, "Retrying write after conflict: {}", msg);
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(StoreError::Conflict(msg)) => {
                return Err(Error::Store(format!(
                    "write failed after {} attempts: {}",
                    MAX_ATTEMPTS, msg
                )));
            }
            Err(StoreError::Fatal(msg)) => {
                // Uniqueness violations surface as Conflict to the caller;
                // everything else is a store fault.
                if msg.to_lowercase().contains("unique constraint") {
                    return Err(Error::Conflict("value already exists".into()));
                }
                return Err(Error::Store(msg));
            }
        }
    }
}

async fn apply_once(conn: &Connection, stmts: &[WriteStmt]) -> std::result::Result<(), StoreError> {
    if let [stmt] = stmts {
        conn.execute(&stmt.sql, stmt.params.clone())
            .await
            .map_err(StoreError::classify)?;
        return Ok(());
    }

    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .await
        .map_err(StoreError::classify)?;
    for stmt in stmts {
        // Rollback on drop if any statement fails
        tx.execute(&stmt.sql, stmt.params.clone())
            .await
            .map_err(StoreError::classify)?;
    }
    tx.commit().await.map_err(StoreError::classify)
}

async fn run_checkpoint(conn: &Connection) {
    match super::checkpoint(conn).await {
        Ok(()) => tracing::debug!("WAL checkpoint complete"),
        Err(e) => tracing::warn!("WAL checkpoint failed: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;
    use tempfile::TempDir;

    async fn test_queue(dir: &TempDir) -> (Store, WriteQueue) {
        let config = DatabaseConfig {
            path: dir.path().join("queue.db"),
            ..Default::default()
        };
        let store = Store::open(&config).await.unwrap();
        let writer = store.take_writer().unwrap();
        let queue = WriteQueue::start(writer, &config);
        (store, queue)
    }

    #[tokio::test]
    async fn test_submit_applies_write() {
        let dir = TempDir::new().unwrap();
        let (store, queue) = test_queue(&dir).await;

        queue
            .submit(WriteStmt::new(
                "INSERT INTO system_settings (key, value, updated_at) VALUES (?1, ?2, ?3)",
                vec![text("k"), text("v"), text(chrono::Utc::now().to_rfc3339())],
            ))
            .await
            .unwrap();

        let conn = store.read_handle().unwrap();
        let mut rows = conn
            .query("SELECT value FROM system_settings WHERE key = 'k'", ())
            .await
            .unwrap();
        let value: String = rows.next().await.unwrap().unwrap().get(0).unwrap();
        assert_eq!(value, "v");

        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_batch_is_atomic() {
        let dir = TempDir::new().unwrap();
        let (store, queue) = test_queue(&dir).await;
        let now = chrono::Utc::now().to_rfc3339();

        let result = queue
            .submit_batch(vec![
                WriteStmt::new(
                    "INSERT INTO system_settings (key, value, updated_at) VALUES (?1, ?2, ?3)",
                    vec![text("a"), text("1"), text(now.clone())],
                ),
                WriteStmt::new("INSERT INTO nonexistent_table VALUES (1)", vec![]),
            ])
            .await;
        assert!(result.is_err());

        let conn = store.read_handle().unwrap();
        let mut rows = conn
            .query("SELECT COUNT(*) FROM system_settings", ())
            .await
            .unwrap();
        let count: i64 = rows.next().await.unwrap().unwrap().get(0).unwrap();
        assert_eq!(count, 0, "failed batch must leave no partial rows");

        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_unique_violation_surfaces_as_conflict() {
        let dir = TempDir::new().unwrap();
        let (_store, queue) = test_queue(&dir).await;
        let now = chrono::Utc::now().to_rfc3339();

        let insert = WriteStmt::new(
            "INSERT INTO users (id, username, password_hash, full_name, role, created_at, updated_at) \
             VALUES (?1, 'jdoe', 'h', 'Jane', 'operator', ?2, ?2)",
            vec![text("u1"), text(now.clone())],
        );
        queue.submit(insert).await.unwrap();

        let duplicate = WriteStmt::new(
            "INSERT INTO users (id, username, password_hash, full_name, role, created_at, updated_at) \
             VALUES (?1, 'jdoe', 'h', 'Jane Again', 'operator', ?2, ?2)",
            vec![text("u2"), text(now)],
        );
        let result = queue.submit(duplicate).await;
        assert!(matches!(result, Err(Error::Conflict(_))));

        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_soft_limit_returns_busy() {
        let dir = TempDir::new().unwrap();
        let config = DatabaseConfig {
            path: dir.path().join("busy.db"),
            write_queue_soft_limit: 0,
            ..Default::default()
        };
        let store = Store::open(&config).await.unwrap();
        let writer = store.take_writer().unwrap();
        let queue = WriteQueue::start(writer, &config);

        // Force depth above the zero threshold by enqueueing without awaiting.
        queue.depth.fetch_add(1, Ordering::Relaxed);
        let result = queue
            .submit(WriteStmt::new("SELECT 1", vec![]))
            .await;
        assert!(matches!(result, Err(Error::Busy)));
        queue.depth.fetch_sub(1, Ordering::Relaxed);

        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_work() {
        let dir = TempDir::new().unwrap();
        let (_store, queue) = test_queue(&dir).await;
        queue.shutdown().await;

        let result = queue.submit(WriteStmt::new("SELECT 1", vec![])).await;
        assert!(result.is_err());
    }
}
