//! Append-only audit trail
//!
//! Records security- and data-relevant actions as `auth_events` rows through
//! the write queue. Standalone records are fire-and-forget: a logging failure
//! must never fail the originating business operation. Operations that need
//! audit durability before returning success compose the insert into their
//! own atomic batch via [`AuditSink::stmt`].
//!
//! Secrets (passwords, raw tokens, cookie values) are never recorded.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use libsql::Connection;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::store::write_queue::{opt_text, text};
use crate::store::{WriteQueue, WriteStmt};
use crate::util::{now_ts, parse_ts};

/// Upper bound on the serialized detail payload
const DETAIL_MAX_BYTES: usize = 2048;

/// Categories of audit events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthEventKind {
    Login,
    LoginFailed,
    Logout,
    PasswordChanged,
    PasswordReset,
    UserCreated,
    UserUpdated,
    UserDeactivated,
    AccountLocked,
    AccountUnlocked,
    PackageCreated,
    PackageStatusChanged,
    RecipientCreated,
    RecipientUpdated,
    RecipientImported,
    ExportGenerated,
    SystemSettingsChange,
}

impl AuthEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::LoginFailed => "login_failed",
            Self::Logout => "logout",
            Self::PasswordChanged => "password_changed",
            Self::PasswordReset => "password_reset",
            Self::UserCreated => "user_created",
            Self::UserUpdated => "user_updated",
            Self::UserDeactivated => "user_deactivated",
            Self::AccountLocked => "account_locked",
            Self::AccountUnlocked => "account_unlocked",
            Self::PackageCreated => "package_created",
            Self::PackageStatusChanged => "package_status_changed",
            Self::RecipientCreated => "recipient_created",
            Self::RecipientUpdated => "recipient_updated",
            Self::RecipientImported => "recipient_imported",
            Self::ExportGenerated => "export_generated",
            Self::SystemSettingsChange => "system_settings_change",
        }
    }
}

impl std::fmt::Display for AuthEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recorded audit event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthEvent {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub kind: String,
    pub username_attempted: Option<String>,
    pub client_ip: Option<String>,
    pub detail: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Context for one audit record
#[derive(Debug, Default, Clone)]
pub struct AuditRecord {
    pub user_id: Option<Uuid>,
    pub username: Option<String>,
    pub client_ip: Option<String>,
    pub detail: Option<serde_json::Value>,
}

impl AuditRecord {
    pub fn for_user(user_id: Uuid) -> Self {
        Self {
            user_id: Some(user_id),
            ..Default::default()
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_ip(mut self, ip: Option<String>) -> Self {
        self.client_ip = ip;
        self
    }

    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

/// Audit event recorder
#[derive(Clone)]
pub struct AuditSink {
    queue: Arc<WriteQueue>,
}

impl AuditSink {
    pub fn new(queue: Arc<WriteQueue>) -> Self {
        Self { queue }
    }

    /// Build the insert for composing into a business op's atomic batch
    pub fn stmt(kind: AuthEventKind, record: &AuditRecord) -> WriteStmt {
        let detail = record.detail.as_ref().map(bounded_detail);

        WriteStmt::new(
            "INSERT INTO auth_events (id, user_id, kind, username_attempted, client_ip, detail, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            vec![
                text(Uuid::new_v4().to_string()),
                opt_text(record.user_id.map(|u| u.to_string())),
                text(kind.as_str()),
                opt_text(record.username.clone()),
                opt_text(record.client_ip.clone()),
                opt_text(detail),
                text(now_ts()),
            ],
        )
    }

    /// Record a standalone event, fire-and-forget
    ///
    /// Failures are logged, never propagated.
    pub fn record(&self, kind: AuthEventKind, record: AuditRecord) {
        let stmt = Self::stmt(kind, &record);
        match self.queue.enqueue(vec![stmt]) {
            Ok(receiver) => {
                tokio::spawn(async move {
                    match receiver.await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => tracing::warn!(kind = %kind, "Audit record failed: {}", e),
                        Err(_) => tracing::warn!(kind = %kind, "Audit record abandoned"),
                    }
                });
            }
            Err(e) => tracing::warn!(kind = %kind, "Audit record not enqueued: {}", e),
        }
    }

    /// Page through recorded events, newest first
    pub async fn list_events(
        &self,
        conn: &Connection,
        page: u32,
        limit: u32,
    ) -> Result<Vec<AuthEvent>> {
        let limit = limit.clamp(1, 200) as i64;
        let offset = (page.max(1) as i64 - 1) * limit;

        let mut rows = conn
            .query(
                "SELECT id, user_id, kind, username_attempted, client_ip, detail, created_at \
                 FROM auth_events ORDER BY created_at DESC, id DESC LIMIT ?1 OFFSET ?2",
                libsql::params![limit, offset],
            )
            .await
            .map_err(|e| Error::Store(format!("audit query failed: {}", e)))?;

        let mut events = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| Error::Store(format!("audit row read failed: {}", e)))?
        {
            events.push(row_to_event(&row)?);
        }
        Ok(events)
    }
}

fn bounded_detail(detail: &serde_json::Value) -> String {
    let mut serialized = detail.to_string();
    if serialized.len() > DETAIL_MAX_BYTES {
        serialized.truncate(DETAIL_MAX_BYTES);
    }
    serialized
}

fn row_to_event(row: &libsql::Row) -> Result<AuthEvent> {
    let read = |msg: &str, e: libsql::Error| Error::Store(format!("{}: {}", msg, e));

    let id_str: String = row.get(0).map_err(|e| read("audit id", e))?;
    let user_id_str: Option<String> = row.get(1).ok();
    let kind: String = row.get(2).map_err(|e| read("audit kind", e))?;
    let username: Option<String> = row.get(3).ok();
    let client_ip: Option<String> = row.get(4).ok();
    let detail_str: Option<String> = row.get(5).ok();
    let created_str: String = row.get(6).map_err(|e| read("audit created_at", e))?;

    Ok(AuthEvent {
        id: Uuid::parse_str(&id_str)
            .map_err(|e| Error::Store(format!("bad audit id: {}", e)))?,
        user_id: user_id_str
            .map(|s| Uuid::parse_str(&s))
            .transpose()
            .map_err(|e| Error::Store(format!("bad audit user id: {}", e)))?,
        kind,
        username_attempted: username,
        client_ip,
        detail: detail_str.and_then(|s| serde_json::from_str(&s).ok()),
        created_at: parse_ts(&created_str)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::store::Store;
    use tempfile::TempDir;

    #[test]
    fn test_kind_strings_are_stable() {
        assert_eq!(AuthEventKind::Login.as_str(), "login");
        assert_eq!(AuthEventKind::LoginFailed.as_str(), "login_failed");
        assert_eq!(AuthEventKind::AccountLocked.as_str(), "account_locked");
        assert_eq!(
            AuthEventKind::SystemSettingsChange.as_str(),
            "system_settings_change"
        );
    }

    #[test]
    fn test_detail_is_bounded() {
        let oversized = serde_json::json!({ "blob": "x".repeat(DETAIL_MAX_BYTES * 2) });
        assert!(bounded_detail(&oversized).len() <= DETAIL_MAX_BYTES);
    }

    #[tokio::test]
    async fn test_record_and_list_roundtrip() {
        let dir = TempDir::new().unwrap();
        let config = DatabaseConfig {
            path: dir.path().join("audit.db"),
            ..Default::default()
        };
        let store = Store::open(&config).await.unwrap();
        let queue = Arc::new(WriteQueue::start(store.take_writer().unwrap(), &config));
        let sink = AuditSink::new(Arc::clone(&queue));

        // Durable path: submit the stmt directly rather than fire-and-forget
        let record = AuditRecord::default()
            .with_username("ghost")
            .with_ip(Some("10.0.0.9".into()))
            .with_detail(serde_json::json!({ "reason": "unknown_user" }));
        queue
            .submit(AuditSink::stmt(AuthEventKind::LoginFailed, &record))
            .await
            .unwrap();

        let conn = store.read_handle().unwrap();
        let events = sink.list_events(&conn, 1, 50).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, "login_failed");
        assert_eq!(events[0].username_attempted.as_deref(), Some("ghost"));
        assert_eq!(
            events[0].detail.as_ref().unwrap()["reason"],
            serde_json::json!("unknown_user")
        );

        queue.shutdown().await;
    }
}
