//! Package lifecycle: state machine, immutable event log, read projections
//!
//! Every transition is one atomic batch through the write queue: the status
//! update, the package event, and the audit record commit together or not at
//! all.

pub mod attachments;
pub mod recipients;
pub mod search;

pub use attachments::UploadedFile;
pub use recipients::{ImportReport, ImportRow, NewRecipient, RecipientChanges};
pub use search::{PackageSearch, PackageSummary};

use std::sync::Arc;

use chrono::Utc;
use libsql::Connection;
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::audit::{AuditRecord, AuditSink, AuthEventKind};
use crate::config::UploadConfig;
use crate::domain::{Attachment, Package, PackageEvent, PackageStatus, User};
use crate::error::{Error, Result};
use crate::store::write_queue::{integer, opt_text, text};
use crate::store::{WriteQueue, WriteStmt};
use crate::util::{fmt_ts, parse_ts};

/// Maximum length of package notes
const NOTES_MAX: usize = 500;

const PACKAGE_COLUMNS: &str =
    "id, tracking_no, carrier, recipient_id, status, notes, created_by, created_at, updated_at";

/// Input for registering a package
#[derive(Debug, Clone)]
pub struct NewPackage {
    pub tracking_no: String,
    pub carrier: String,
    pub recipient_id: Uuid,
    pub notes: Option<String>,
}

/// Counts for the dashboard projection
#[derive(Debug, Clone, Serialize)]
pub struct DashboardSummary {
    pub total: u64,
    pub registered: u64,
    pub awaiting_pickup: u64,
    pub out_for_delivery: u64,
    pub delivered: u64,
    pub returned: u64,
    pub registered_today: u64,
}

/// One row of the reports projection
#[derive(Debug, Clone, Serialize)]
pub struct ReportRow {
    pub tracking_no: String,
    pub carrier: String,
    pub status: PackageStatus,
    pub recipient_name: String,
    pub department: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Package state machine and write contracts
#[derive(Clone)]
pub struct PackageCore {
    queue: Arc<WriteQueue>,
    uploads: UploadConfig,
}

impl PackageCore {
    pub fn new(queue: Arc<WriteQueue>, uploads: UploadConfig) -> Self {
        Self { queue, uploads }
    }

    pub(crate) fn queue(&self) -> &WriteQueue {
        &self.queue
    }

    pub fn uploads(&self) -> &UploadConfig {
        &self.uploads
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    /// Register a package, optionally with a validated photo
    ///
    /// Preconditions: the recipient exists and is active. Side effects commit
    /// as one batch: the package row, the registration event, the optional
    /// attachment row, and the audit record.
    pub async fn register(
        &self,
        conn: &Connection,
        actor: &User,
        input: NewPackage,
        photo: Option<UploadedFile>,
        client_ip: Option<String>,
    ) -> Result<Package> {
        let tracking_no = input.tracking_no.trim().to_string();
        if tracking_no.is_empty() {
            return Err(Error::Validation("Tracking number is required".into()));
        }
        let carrier = input.carrier.trim().to_string();
        if carrier.is_empty() {
            return Err(Error::Validation("Carrier is required".into()));
        }
        let notes = validate_notes(input.notes)?;

        let recipient = self
            .recipient_by_id(conn, input.recipient_id)
            .await?
            .ok_or_else(|| Error::Validation("Recipient does not exist".into()))?;
        if !recipient.is_active {
            return Err(Error::Validation(
                "Recipient is inactive and cannot receive packages".into(),
            ));
        }

        let now = Utc::now();
        let package = Package {
            id: Uuid::new_v4(),
            tracking_no,
            carrier,
            recipient_id: recipient.id,
            status: PackageStatus::Registered,
            notes,
            created_by: actor.id,
            created_at: now,
            updated_at: now,
        };

        let mut stmts = vec![
            WriteStmt::new(
                "INSERT INTO packages (id, tracking_no, carrier, recipient_id, status, notes, \
                 created_by, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
                vec![
                    text(package.id.to_string()),
                    text(package.tracking_no.clone()),
                    text(package.carrier.clone()),
                    text(package.recipient_id.to_string()),
                    text(package.status.as_str()),
                    opt_text(package.notes.clone()),
                    text(package.created_by.to_string()),
                    text(fmt_ts(now)),
                ],
            ),
            event_stmt(package.id, None, PackageStatus::Registered, None, actor.id),
        ];

        // The file hits disk before the metadata row; a crash in between
        // leaves an orphan file, never a dangling row.
        if let Some(file) = photo {
            let upload = attachments::validate_upload(&self.uploads, &file)?;
            attachments::persist(&self.uploads, &upload, &file.bytes).await?;
            stmts.push(attachment_stmt(package.id, actor.id, &upload));
        }

        stmts.push(AuditSink::stmt(
            AuthEventKind::PackageCreated,
            &AuditRecord::for_user(actor.id)
                .with_username(&actor.username)
                .with_ip(client_ip)
                .with_detail(json!({
                    "package_id": package.id,
                    "tracking_no": package.tracking_no,
                    "recipient_id": package.recipient_id,
                })),
        ));

        self.queue.submit_batch(stmts).await?;
        Ok(package)
    }

    /// Attach a photo to an existing package
    pub async fn add_photo(
        &self,
        conn: &Connection,
        actor: &User,
        package_id: Uuid,
        file: UploadedFile,
    ) -> Result<Attachment> {
        let package = self
            .package_by_id(conn, package_id)
            .await?
            .ok_or_else(|| Error::NotFound("Package not found".into()))?;

        let upload = attachments::validate_upload(&self.uploads, &file)?;
        attachments::persist(&self.uploads, &upload, &file.bytes).await?;

        let attachment = Attachment {
            id: Uuid::new_v4(),
            package_id: package.id,
            original_filename: upload.original_filename.clone(),
            stored_path: upload.relative_path.clone(),
            mime_type: upload.mime_type.clone(),
            byte_size: upload.byte_size,
            uploaded_by: actor.id,
            created_at: Utc::now(),
        };

        self.queue
            .submit(attachment_stmt_from(&attachment))
            .await?;
        Ok(attachment)
    }

    // ------------------------------------------------------------------
    // Status transitions
    // ------------------------------------------------------------------

    /// Apply a status transition under the state machine policy
    pub async fn change_status(
        &self,
        conn: &Connection,
        actor: &User,
        package_id: Uuid,
        new_status: PackageStatus,
        notes: Option<String>,
        client_ip: Option<String>,
    ) -> Result<Package> {
        let notes = validate_notes(notes)?;
        let mut package = self
            .package_by_id(conn, package_id)
            .await?
            .ok_or_else(|| Error::NotFound("Package not found".into()))?;

        if !package.status.can_transition_to(new_status) {
            return Err(Error::Validation(format!(
                "Cannot change status from {} to {}",
                package.status, new_status
            )));
        }

        let now = Utc::now();
        let stmts = vec![
            WriteStmt::new(
                "UPDATE packages SET status = ?1, updated_at = ?2 WHERE id = ?3",
                vec![
                    text(new_status.as_str()),
                    text(fmt_ts(now)),
                    text(package.id.to_string()),
                ],
            ),
            event_stmt(
                package.id,
                Some(package.status),
                new_status,
                notes.clone(),
                actor.id,
            ),
            AuditSink::stmt(
                AuthEventKind::PackageStatusChanged,
                &AuditRecord::for_user(actor.id)
                    .with_username(&actor.username)
                    .with_ip(client_ip)
                    .with_detail(json!({
                        "package_id": package.id,
                        "old_status": package.status.as_str(),
                        "new_status": new_status.as_str(),
                    })),
            ),
        ];

        self.queue.submit_batch(stmts).await?;

        package.status = new_status;
        package.updated_at = now;
        Ok(package)
    }

    // ------------------------------------------------------------------
    // Read projections
    // ------------------------------------------------------------------

    pub async fn package_by_id(&self, conn: &Connection, id: Uuid) -> Result<Option<Package>> {
        let sql = format!("SELECT {} FROM packages WHERE id = ?1", PACKAGE_COLUMNS);
        let mut rows = conn
            .query(&sql, libsql::params![id.to_string()])
            .await
            .map_err(|e| Error::Store(format!("package lookup failed: {}", e)))?;
        match next_row(&mut rows).await? {
            Some(row) => Ok(Some(row_to_package(&row)?)),
            None => Ok(None),
        }
    }

    /// Event timeline, oldest first with id tie-break
    pub async fn timeline(&self, conn: &Connection, package_id: Uuid) -> Result<Vec<PackageEvent>> {
        let mut rows = conn
            .query(
                "SELECT id, package_id, old_status, new_status, notes, actor_id, created_at \
                 FROM package_events WHERE package_id = ?1 ORDER BY created_at ASC, id ASC",
                libsql::params![package_id.to_string()],
            )
            .await
            .map_err(|e| Error::Store(format!("timeline query failed: {}", e)))?;
        let mut events = Vec::new();
        while let Some(row) = next_row(&mut rows).await? {
            events.push(row_to_event(&row)?);
        }
        Ok(events)
    }

    pub async fn attachments_for(
        &self,
        conn: &Connection,
        package_id: Uuid,
    ) -> Result<Vec<Attachment>> {
        let mut rows = conn
            .query(
                "SELECT id, package_id, original_filename, stored_path, mime_type, byte_size, \
                 uploaded_by, created_at \
                 FROM attachments WHERE package_id = ?1 ORDER BY created_at ASC",
                libsql::params![package_id.to_string()],
            )
            .await
            .map_err(|e| Error::Store(format!("attachment query failed: {}", e)))?;
        let mut result = Vec::new();
        while let Some(row) = next_row(&mut rows).await? {
            result.push(row_to_attachment(&row)?);
        }
        Ok(result)
    }

    /// Dashboard counts: totals per status plus today's registrations
    pub async fn dashboard_summary(&self, conn: &Connection) -> Result<DashboardSummary> {
        let mut summary = DashboardSummary {
            total: 0,
            registered: 0,
            awaiting_pickup: 0,
            out_for_delivery: 0,
            delivered: 0,
            returned: 0,
            registered_today: 0,
        };

        let mut rows = conn
            .query("SELECT status, COUNT(*) FROM packages GROUP BY status", ())
            .await
            .map_err(|e| Error::Store(format!("dashboard query failed: {}", e)))?;
        while let Some(row) = next_row(&mut rows).await? {
            let status: String = row
                .get(0)
                .map_err(|e| Error::Store(format!("dashboard status: {}", e)))?;
            let count: i64 = row
                .get(1)
                .map_err(|e| Error::Store(format!("dashboard count: {}", e)))?;
            let count = count.max(0) as u64;
            summary.total += count;
            match PackageStatus::parse(&status) {
                Some(PackageStatus::Registered) => summary.registered = count,
                Some(PackageStatus::AwaitingPickup) => summary.awaiting_pickup = count,
                Some(PackageStatus::OutForDelivery) => summary.out_for_delivery = count,
                Some(PackageStatus::Delivered) => summary.delivered = count,
                Some(PackageStatus::Returned) => summary.returned = count,
                None => {}
            }
        }

        let midnight = Utc::now()
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .expect("midnight is always valid")
            .and_utc();
        let mut rows = conn
            .query(
                "SELECT COUNT(*) FROM packages WHERE created_at >= ?1",
                libsql::params![fmt_ts(midnight)],
            )
            .await
            .map_err(|e| Error::Store(format!("dashboard query failed: {}", e)))?;
        if let Some(row) = next_row(&mut rows).await? {
            let count: i64 = row
                .get(0)
                .map_err(|e| Error::Store(format!("dashboard count: {}", e)))?;
            summary.registered_today = count.max(0) as u64;
        }

        Ok(summary)
    }

    /// Date-ranged rows for the reports preview and CSV export
    pub async fn report_rows(
        &self,
        conn: &Connection,
        from: Option<chrono::DateTime<Utc>>,
        to: Option<chrono::DateTime<Utc>>,
    ) -> Result<Vec<ReportRow>> {
        let mut sql = String::from(
            "SELECT p.tracking_no, p.carrier, p.status, r.name, r.department, \
             p.created_at, p.updated_at \
             FROM packages p JOIN recipients r ON r.id = p.recipient_id WHERE 1=1",
        );
        let mut params: Vec<libsql::Value> = Vec::new();
        if let Some(from) = from {
            params.push(text(fmt_ts(from)));
            sql.push_str(&format!(" AND p.created_at >= ?{}", params.len()));
        }
        if let Some(to) = to {
            params.push(text(fmt_ts(to)));
            sql.push_str(&format!(" AND p.created_at <= ?{}", params.len()));
        }
        sql.push_str(" ORDER BY p.created_at DESC, p.id DESC");

        let mut rows = conn
            .query(&sql, params)
            .await
            .map_err(|e| Error::Store(format!("report query failed: {}", e)))?;

        let mut result = Vec::new();
        while let Some(row) = next_row(&mut rows).await? {
            let read = |field: &str, e: libsql::Error| {
                Error::Store(format!("report {}: {}", field, e))
            };
            let status_str: String = row.get(2).map_err(|e| read("status", e))?;
            result.push(ReportRow {
                tracking_no: row.get(0).map_err(|e| read("tracking_no", e))?,
                carrier: row.get(1).map_err(|e| read("carrier", e))?,
                status: PackageStatus::parse(&status_str)
                    .ok_or_else(|| Error::Store(format!("unknown status '{}'", status_str)))?,
                recipient_name: row.get(3).map_err(|e| read("recipient", e))?,
                department: row
                    .get::<String>(4)
                    .ok()
                    .unwrap_or_else(|| "Unassigned".into()),
                created_at: row.get(5).map_err(|e| read("created_at", e))?,
                updated_at: row.get(6).map_err(|e| read("updated_at", e))?,
            });
        }
        Ok(result)
    }
}

fn validate_notes(notes: Option<String>) -> Result<Option<String>> {
    match notes {
        None => Ok(None),
        Some(raw) => {
            let trimmed = raw.trim().to_string();
            if trimmed.is_empty() {
                return Ok(None);
            }
            if trimmed.chars().count() > NOTES_MAX {
                return Err(Error::Validation(format!(
                    "Notes must be at most {} characters",
                    NOTES_MAX
                )));
            }
            Ok(Some(trimmed))
        }
    }
}

fn event_stmt(
    package_id: Uuid,
    old: Option<PackageStatus>,
    new: PackageStatus,
    notes: Option<String>,
    actor_id: Uuid,
) -> WriteStmt {
    WriteStmt::new(
        "INSERT INTO package_events (id, package_id, old_status, new_status, notes, actor_id, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        vec![
            text(Uuid::new_v4().to_string()),
            text(package_id.to_string()),
            opt_text(old.map(|s| s.as_str().to_string())),
            text(new.as_str()),
            opt_text(notes),
            text(actor_id.to_string()),
            text(crate::util::now_ts()),
        ],
    )
}

fn attachment_stmt(
    package_id: Uuid,
    uploader: Uuid,
    upload: &attachments::ValidatedUpload,
) -> WriteStmt {
    attachment_stmt_from(&Attachment {
        id: Uuid::new_v4(),
        package_id,
        original_filename: upload.original_filename.clone(),
        stored_path: upload.relative_path.clone(),
        mime_type: upload.mime_type.clone(),
        byte_size: upload.byte_size,
        uploaded_by: uploader,
        created_at: Utc::now(),
    })
}

fn attachment_stmt_from(attachment: &Attachment) -> WriteStmt {
    WriteStmt::new(
        "INSERT INTO attachments (id, package_id, original_filename, stored_path, mime_type, \
         byte_size, uploaded_by, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        vec![
            text(attachment.id.to_string()),
            text(attachment.package_id.to_string()),
            text(attachment.original_filename.clone()),
            text(attachment.stored_path.clone()),
            text(attachment.mime_type.clone()),
            integer(attachment.byte_size as i64),
            text(attachment.uploaded_by.to_string()),
            text(fmt_ts(attachment.created_at)),
        ],
    )
}

pub(crate) async fn next_row(rows: &mut libsql::Rows) -> Result<Option<libsql::Row>> {
    rows.next()
        .await
        .map_err(|e| Error::Store(format!("row read failed: {}", e)))
}

pub(crate) fn row_to_package(row: &libsql::Row) -> Result<Package> {
    let read = |field: &str, e: libsql::Error| Error::Store(format!("package {}: {}", field, e));

    let id_str: String = row.get(0).map_err(|e| read("id", e))?;
    let tracking_no: String = row.get(1).map_err(|e| read("tracking_no", e))?;
    let carrier: String = row.get(2).map_err(|e| read("carrier", e))?;
    let recipient_str: String = row.get(3).map_err(|e| read("recipient_id", e))?;
    let status_str: String = row.get(4).map_err(|e| read("status", e))?;
    let notes: Option<String> = row.get(5).ok();
    let created_by_str: String = row.get(6).map_err(|e| read("created_by", e))?;
    let created_str: String = row.get(7).map_err(|e| read("created_at", e))?;
    let updated_str: String = row.get(8).map_err(|e| read("updated_at", e))?;

    Ok(Package {
        id: parse_uuid(&id_str)?,
        tracking_no,
        carrier,
        recipient_id: parse_uuid(&recipient_str)?,
        status: PackageStatus::parse(&status_str)
            .ok_or_else(|| Error::Store(format!("unknown status '{}'", status_str)))?,
        notes,
        created_by: parse_uuid(&created_by_str)?,
        created_at: parse_ts(&created_str)?,
        updated_at: parse_ts(&updated_str)?,
    })
}

fn row_to_event(row: &libsql::Row) -> Result<PackageEvent> {
    let read = |field: &str, e: libsql::Error| Error::Store(format!("event {}: {}", field, e));

    let id_str: String = row.get(0).map_err(|e| read("id", e))?;
    let package_str: String = row.get(1).map_err(|e| read("package_id", e))?;
    let old_str: Option<String> = row.get(2).ok();
    let new_str: String = row.get(3).map_err(|e| read("new_status", e))?;
    let notes: Option<String> = row.get(4).ok();
    let actor_str: String = row.get(5).map_err(|e| read("actor_id", e))?;
    let created_str: String = row.get(6).map_err(|e| read("created_at", e))?;

    Ok(PackageEvent {
        id: parse_uuid(&id_str)?,
        package_id: parse_uuid(&package_str)?,
        old_status: old_str
            .map(|s| {
                PackageStatus::parse(&s)
                    .ok_or_else(|| Error::Store(format!("unknown status '{}'", s)))
            })
            .transpose()?,
        new_status: PackageStatus::parse(&new_str)
            .ok_or_else(|| Error::Store(format!("unknown status '{}'", new_str)))?,
        notes,
        actor_id: parse_uuid(&actor_str)?,
        created_at: parse_ts(&created_str)?,
    })
}

fn row_to_attachment(row: &libsql::Row) -> Result<Attachment> {
    let read = |field: &str, e: libsql::Error| Error::Store(format!("attachment {}: {}", field, e));

    let id_str: String = row.get(0).map_err(|e| read("id", e))?;
    let package_str: String = row.get(1).map_err(|e| read("package_id", e))?;
    let original: String = row.get(2).map_err(|e| read("original_filename", e))?;
    let stored: String = row.get(3).map_err(|e| read("stored_path", e))?;
    let mime: String = row.get(4).map_err(|e| read("mime_type", e))?;
    let size: i64 = row.get(5).map_err(|e| read("byte_size", e))?;
    let uploader_str: String = row.get(6).map_err(|e| read("uploaded_by", e))?;
    let created_str: String = row.get(7).map_err(|e| read("created_at", e))?;

    Ok(Attachment {
        id: parse_uuid(&id_str)?,
        package_id: parse_uuid(&package_str)?,
        original_filename: original,
        stored_path: stored,
        mime_type: mime,
        byte_size: size.max(0) as u64,
        uploaded_by: parse_uuid(&uploader_str)?,
        created_at: parse_ts(&created_str)?,
    })
}

pub(crate) fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| Error::Store(format!("bad uuid '{}': {}", s, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{IdentityService, NewUser, PasswordHasher};
    use crate::config::{DatabaseConfig, LoginConfig, PasswordPolicyConfig, SessionConfig};
    use crate::domain::Role;
    use crate::store::Store;
    use tempfile::TempDir;

    pub(crate) struct Fixture {
        pub store: Store,
        pub queue: Arc<WriteQueue>,
        pub core: PackageCore,
        pub actor: User,
    }

    pub(crate) async fn fixture(dir: &TempDir) -> Fixture {
        let config = DatabaseConfig {
            path: dir.path().join("packages.db"),
            ..Default::default()
        };
        let store = Store::open(&config).await.unwrap();
        let queue = Arc::new(WriteQueue::start(store.take_writer().unwrap(), &config));
        let uploads = UploadConfig {
            dir: dir.path().join("uploads"),
            ..Default::default()
        };
        let core = PackageCore::new(Arc::clone(&queue), uploads);

        let identity = IdentityService::new(
            Arc::clone(&queue),
            AuditSink::new(Arc::clone(&queue)),
            PasswordHasher::new(&PasswordPolicyConfig {
                argon2_time_cost: 1,
                argon2_memory_cost_kib: 1024,
                argon2_parallelism: 1,
                ..Default::default()
            })
            .unwrap(),
            SessionConfig::default(),
            LoginConfig::default(),
        );
        let bootstrap = User {
            id: Uuid::new_v4(),
            username: "system".into(),
            password_hash: "unused".into(),
            full_name: "System".into(),
            role: Role::SuperAdmin,
            is_active: true,
            must_change_password: false,
            password_history: Vec::new(),
            failed_login_count: 0,
            locked_until: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let actor = identity
            .create_user(
                &bootstrap,
                NewUser {
                    username: "operator".into(),
                    password: "Operator-Pass-1!".into(),
                    full_name: "Op Erator".into(),
                    role: Role::Operator,
                },
                None,
            )
            .await
            .unwrap();

        Fixture {
            store,
            queue,
            core,
            actor,
        }
    }

    pub(crate) async fn seed_recipient(fx: &Fixture, employee_id: &str) -> crate::domain::Recipient {
        fx.core
            .create_recipient(
                &fx.actor,
                NewRecipient {
                    employee_id: employee_id.into(),
                    name: "Pat Recipient".into(),
                    email: format!("{}@example.com", employee_id.to_lowercase()),
                    department: "Finance".into(),
                    phone: None,
                    location: None,
                },
                None,
            )
            .await
            .unwrap()
    }

    fn new_package(recipient_id: Uuid) -> NewPackage {
        NewPackage {
            tracking_no: "1Z999AA10123456784".into(),
            carrier: "UPS".into(),
            recipient_id,
            notes: None,
        }
    }

    #[tokio::test]
    async fn test_register_creates_row_event_and_audit() {
        let dir = TempDir::new().unwrap();
        let fx = fixture(&dir).await;
        let recipient = seed_recipient(&fx, "E100").await;

        let conn = fx.store.read_handle().unwrap();
        let package = fx
            .core
            .register(&conn, &fx.actor, new_package(recipient.id), None, None)
            .await
            .unwrap();
        assert_eq!(package.status, PackageStatus::Registered);

        let timeline = fx.core.timeline(&conn, package.id).await.unwrap();
        assert_eq!(timeline.len(), 1);
        assert_eq!(timeline[0].old_status, None);
        assert_eq!(timeline[0].new_status, PackageStatus::Registered);

        let mut rows = conn
            .query(
                "SELECT COUNT(*) FROM auth_events WHERE kind = 'package_created'",
                (),
            )
            .await
            .unwrap();
        let count: i64 = rows.next().await.unwrap().unwrap().get(0).unwrap();
        assert_eq!(count, 1);

        fx.queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_register_rejects_inactive_recipient() {
        let dir = TempDir::new().unwrap();
        let fx = fixture(&dir).await;
        let recipient = seed_recipient(&fx, "E100").await;

        let conn = fx.store.read_handle().unwrap();
        fx.core
            .deactivate_recipient(&conn, &fx.actor, recipient.id, None)
            .await
            .unwrap();

        let result = fx
            .core
            .register(&conn, &fx.actor, new_package(recipient.id), None, None)
            .await;
        assert!(matches!(result, Err(Error::Validation(_))));

        fx.queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_lifecycle_happy_path_and_terminal_rejection() {
        let dir = TempDir::new().unwrap();
        let fx = fixture(&dir).await;
        let recipient = seed_recipient(&fx, "E100").await;

        let conn = fx.store.read_handle().unwrap();
        let package = fx
            .core
            .register(&conn, &fx.actor, new_package(recipient.id), None, None)
            .await
            .unwrap();

        fx.core
            .change_status(
                &conn,
                &fx.actor,
                package.id,
                PackageStatus::AwaitingPickup,
                None,
                None,
            )
            .await
            .unwrap();
        fx.core
            .change_status(
                &conn,
                &fx.actor,
                package.id,
                PackageStatus::Delivered,
                None,
                None,
            )
            .await
            .unwrap();

        // Terminal: no further transitions, and nothing is written
        let result = fx
            .core
            .change_status(
                &conn,
                &fx.actor,
                package.id,
                PackageStatus::AwaitingPickup,
                None,
                None,
            )
            .await;
        assert!(matches!(result, Err(Error::Validation(_))));

        let timeline = fx.core.timeline(&conn, package.id).await.unwrap();
        assert_eq!(timeline.len(), 3);
        // Chain property: each event's old equals the previous event's new
        for pair in timeline.windows(2) {
            assert_eq!(pair[1].old_status, Some(pair[0].new_status));
        }

        fx.queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_notes_length_bound() {
        let dir = TempDir::new().unwrap();
        let fx = fixture(&dir).await;
        let recipient = seed_recipient(&fx, "E100").await;

        let conn = fx.store.read_handle().unwrap();
        let result = fx
            .core
            .register(
                &conn,
                &fx.actor,
                NewPackage {
                    notes: Some("x".repeat(NOTES_MAX + 1)),
                    ..new_package(recipient.id)
                },
                None,
                None,
            )
            .await;
        assert!(matches!(result, Err(Error::Validation(_))));

        fx.queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_dashboard_summary_counts() {
        let dir = TempDir::new().unwrap();
        let fx = fixture(&dir).await;
        let recipient = seed_recipient(&fx, "E100").await;

        let conn = fx.store.read_handle().unwrap();
        let first = fx
            .core
            .register(&conn, &fx.actor, new_package(recipient.id), None, None)
            .await
            .unwrap();
        fx.core
            .register(&conn, &fx.actor, new_package(recipient.id), None, None)
            .await
            .unwrap();
        fx.core
            .change_status(
                &conn,
                &fx.actor,
                first.id,
                PackageStatus::Delivered,
                None,
                None,
            )
            .await
            .unwrap_err(); // registered -> delivered is not allowed
        fx.core
            .change_status(
                &conn,
                &fx.actor,
                first.id,
                PackageStatus::OutForDelivery,
                None,
                None,
            )
            .await
            .unwrap();

        let summary = fx.core.dashboard_summary(&conn).await.unwrap();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.registered, 1);
        assert_eq!(summary.out_for_delivery, 1);
        assert_eq!(summary.registered_today, 2);

        fx.queue.shutdown().await;
    }
}
