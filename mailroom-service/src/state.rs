//! Application state: process-wide values constructed at boot
//!
//! Everything is built once in [`AppState::initialize`] and passed by
//! reference through axum; tests construct their own instances. Startup
//! ordering: open store (schema, sweep, migrations) -> start the write queue
//! worker -> build services -> construct the pipeline.

use std::sync::Arc;
use std::time::Instant;

use libsql::Connection;
use serde_json::json;

use crate::audit::{AuditRecord, AuditSink, AuthEventKind};
use crate::auth::{IdentityService, PasswordHasher};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::middleware::RateLimiter;
use crate::packages::PackageCore;
use crate::settings::SettingsStore;
use crate::store::write_queue::text;
use crate::store::{Store, WriteQueue, WriteStmt};
use crate::util::now_ts;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<Store>,
    pub queue: Arc<WriteQueue>,
    pub audit: AuditSink,
    pub settings: SettingsStore,
    pub identity: IdentityService,
    pub packages: PackageCore,
    pub rate_limiter: Arc<RateLimiter>,
    pub started_at: Instant,
}

impl AppState {
    /// Build the full service graph
    pub async fn initialize(config: Config) -> Result<Self> {
        let store = Arc::new(Store::open(&config.database).await?);
        let writer = store.take_writer()?;
        let queue = Arc::new(WriteQueue::start(writer, &config.database));

        let audit = AuditSink::new(Arc::clone(&queue));
        let settings = SettingsStore::new(Arc::clone(&queue));
        let hasher = PasswordHasher::new(&config.passwords)?;
        let identity = IdentityService::new(
            Arc::clone(&queue),
            audit.clone(),
            hasher,
            config.sessions.clone(),
            config.logins.clone(),
        );
        let packages = PackageCore::new(Arc::clone(&queue), config.uploads.clone());
        let rate_limiter = Arc::new(RateLimiter::new(&config.rate_limit));

        let state = Self {
            config: Arc::new(config),
            store,
            queue,
            audit,
            settings,
            identity,
            packages,
            rate_limiter,
            started_at: Instant::now(),
        };

        state.ensure_bootstrap_admin().await?;
        Ok(state)
    }

    /// Short-lived read handle for the current request
    pub fn read_handle(&self) -> Result<Connection> {
        self.store.read_handle()
    }

    /// Drain writes, final checkpoint, close the store
    pub async fn shutdown(&self) {
        self.queue.shutdown().await;
        self.store.close();
    }

    /// First boot on an empty database: create the initial super admin
    ///
    /// The generated password is printed once to the log and must be changed
    /// at first login.
    async fn ensure_bootstrap_admin(&self) -> Result<()> {
        let conn = self.read_handle()?;
        let mut rows = conn
            .query("SELECT COUNT(*) FROM users", ())
            .await
            .map_err(|e| Error::Store(format!("user count failed: {}", e)))?;
        let count: i64 = match rows
            .next()
            .await
            .map_err(|e| Error::Store(format!("user count failed: {}", e)))?
        {
            Some(row) => row
                .get(0)
                .map_err(|e| Error::Store(format!("user count failed: {}", e)))?,
            None => 0,
        };
        if count > 0 {
            return Ok(());
        }

        let password = format!("Boot-{}!", crate::auth::generate_token());
        let hash = self.identity.hasher().hash(&password)?;
        let id = uuid::Uuid::new_v4();

        self.queue
            .submit_batch(vec![
                WriteStmt::new(
                    "INSERT INTO users (id, username, password_hash, full_name, role, is_active, \
                     must_change_password, password_history, failed_login_count, locked_until, \
                     created_at, updated_at) \
                     VALUES (?1, 'admin', ?2, 'Administrator', 'super_admin', 1, 1, '[]', 0, NULL, ?3, ?3)",
                    vec![text(id.to_string()), text(hash), text(now_ts())],
                ),
                AuditSink::stmt(
                    AuthEventKind::UserCreated,
                    &AuditRecord::for_user(id)
                        .with_username("admin")
                        .with_detail(json!({ "bootstrap": true, "role": "super_admin" })),
                ),
            ])
            .await?;

        tracing::warn!(
            "Created bootstrap super admin 'admin' with one-time password: {} \
             (a password change is forced at first login)",
            password
        );
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::TempDir;

    pub(crate) async fn test_state(dir: &TempDir) -> AppState {
        let mut config = Config::default();
        config.database.path = dir.path().join("app.db");
        config.uploads.dir = dir.path().join("uploads");
        config.passwords.argon2_time_cost = 1;
        config.passwords.argon2_memory_cost_kib = 1024;
        config.logins.failure_delay_ms = 0;
        AppState::initialize(config).await.unwrap()
    }

    #[tokio::test]
    async fn test_initialize_creates_bootstrap_admin_once() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir).await;

        let conn = state.read_handle().unwrap();
        let admin = state
            .identity
            .user_by_username(&conn, "admin")
            .await
            .unwrap()
            .unwrap();
        assert!(admin.must_change_password);
        assert_eq!(admin.role, crate::domain::Role::SuperAdmin);

        // A second boot on the same database does not create another
        state.shutdown().await;
        drop(conn);
        drop(state);

        let state = test_state(&dir).await;
        let conn = state.read_handle().unwrap();
        let mut rows = conn.query("SELECT COUNT(*) FROM users", ()).await.unwrap();
        let count: i64 = rows.next().await.unwrap().unwrap().get(0).unwrap();
        assert_eq!(count, 1);
        state.shutdown().await;
    }
}
