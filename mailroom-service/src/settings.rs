//! Process-wide key/value settings
//!
//! Currently a single tunable lives here: the external base URL embedded in
//! package deep-links when printing scannable stickers. Reads tolerate the
//! settings table being absent (older databases); writes require it.

use std::sync::Arc;

use libsql::Connection;
use serde_json::json;
use uuid::Uuid;

use crate::audit::{AuditRecord, AuditSink, AuthEventKind};
use crate::error::{Error, Result};
use crate::store::write_queue::{opt_text, text};
use crate::store::{WriteQueue, WriteStmt};
use crate::util::now_ts;

/// Key for the external base URL used in printed sticker deep-links
pub const QR_BASE_URL: &str = "qr_base_url";

/// Settings reader/writer
#[derive(Clone)]
pub struct SettingsStore {
    queue: Arc<WriteQueue>,
}

impl SettingsStore {
    pub fn new(queue: Arc<WriteQueue>) -> Self {
        Self { queue }
    }

    /// Read a setting; `None` when unset or when the table does not exist
    pub async fn get(&self, conn: &Connection, key: &str) -> Result<Option<String>> {
        let query = conn
            .query(
                "SELECT value FROM system_settings WHERE key = ?1",
                libsql::params![key],
            )
            .await;

        let mut rows = match query {
            Ok(rows) => rows,
            Err(e) if e.to_string().to_lowercase().contains("no such table") => {
                return Ok(None);
            }
            Err(e) => return Err(Error::Store(format!("settings read failed: {}", e))),
        };

        match rows
            .next()
            .await
            .map_err(|e| Error::Store(format!("settings row read failed: {}", e)))?
        {
            Some(row) => {
                let value: String = row
                    .get(0)
                    .map_err(|e| Error::Store(format!("settings value read failed: {}", e)))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Write a setting and its audit record in one atomic batch
    ///
    /// URL-valued keys are normalized first. Returns the stored value.
    pub async fn set(
        &self,
        conn: &Connection,
        key: &str,
        value: &str,
        actor_id: Uuid,
        actor_username: &str,
        client_ip: Option<String>,
    ) -> Result<String> {
        let stored = if key == QR_BASE_URL {
            normalize_url(value)?
        } else {
            value.trim().to_string()
        };

        let old = self.get(conn, key).await?;

        let upsert = WriteStmt::new(
            "INSERT INTO system_settings (key, value, updated_by, updated_at) \
             VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(key) DO UPDATE SET \
               value = excluded.value, \
               updated_by = excluded.updated_by, \
               updated_at = excluded.updated_at",
            vec![
                text(key),
                text(stored.clone()),
                opt_text(Some(actor_username.to_string())),
                text(now_ts()),
            ],
        );

        let audit = AuditSink::stmt(
            AuthEventKind::SystemSettingsChange,
            &AuditRecord::for_user(actor_id)
                .with_username(actor_username)
                .with_ip(client_ip)
                .with_detail(json!({
                    "key": key,
                    "old": old,
                    "new": stored,
                })),
        );

        self.queue.submit_batch(vec![upsert, audit]).await?;
        Ok(stored)
    }
}

/// Validate and normalize a URL value: http(s) scheme, trailing slash stripped
fn normalize_url(value: &str) -> Result<String> {
    let trimmed = value.trim();
    if !trimmed.starts_with("http://") && !trimmed.starts_with("https://") {
        return Err(Error::Validation(
            "base URL must start with http:// or https://".into(),
        ));
    }
    Ok(trimmed.trim_end_matches('/').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::store::Store;
    use tempfile::TempDir;

    #[test]
    fn test_normalize_url_strips_trailing_slash() {
        assert_eq!(
            normalize_url("https://mail.example.com/").unwrap(),
            "https://mail.example.com"
        );
        assert_eq!(
            normalize_url("http://10.1.2.3:8000").unwrap(),
            "http://10.1.2.3:8000"
        );
    }

    #[test]
    fn test_normalize_url_rejects_other_schemes() {
        assert!(normalize_url("ftp://example.com").is_err());
        assert!(normalize_url("example.com").is_err());
        assert!(normalize_url("javascript:alert(1)").is_err());
    }

    #[tokio::test]
    async fn test_get_tolerates_missing_table() {
        let dir = TempDir::new().unwrap();
        let config = DatabaseConfig {
            path: dir.path().join("settings.db"),
            ..Default::default()
        };
        let store = Store::open(&config).await.unwrap();
        let queue = Arc::new(WriteQueue::start(store.take_writer().unwrap(), &config));
        let settings = SettingsStore::new(Arc::clone(&queue));

        let conn = store.read_handle().unwrap();
        conn.execute("DROP TABLE system_settings", ()).await.unwrap();

        let value = settings.get(&conn, QR_BASE_URL).await.unwrap();
        assert_eq!(value, None);

        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_set_records_audit_event() {
        let dir = TempDir::new().unwrap();
        let config = DatabaseConfig {
            path: dir.path().join("settings.db"),
            ..Default::default()
        };
        let store = Store::open(&config).await.unwrap();
        let queue = Arc::new(WriteQueue::start(store.take_writer().unwrap(), &config));
        let settings = SettingsStore::new(Arc::clone(&queue));

        let conn = store.read_handle().unwrap();
        let actor = Uuid::new_v4();
        let stored = settings
            .set(&conn, QR_BASE_URL, "https://mail.example.com/", actor, "root", None)
            .await
            .unwrap();
        assert_eq!(stored, "https://mail.example.com");

        assert_eq!(
            settings.get(&conn, QR_BASE_URL).await.unwrap().as_deref(),
            Some("https://mail.example.com")
        );

        let mut rows = conn
            .query(
                "SELECT kind, detail FROM auth_events ORDER BY created_at DESC LIMIT 1",
                (),
            )
            .await
            .unwrap();
        let row = rows.next().await.unwrap().unwrap();
        let kind: String = row.get(0).unwrap();
        let detail: String = row.get(1).unwrap();
        assert_eq!(kind, "system_settings_change");
        assert!(detail.contains("\"new\":\"https://mail.example.com\""));

        queue.shutdown().await;
    }
}
