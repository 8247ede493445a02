//! Recipient directory operations
//!
//! Invariants enforced here: employee_id and email are unique, employee_id is
//! immutable after creation, department is mandatory at the service layer,
//! and deactivation is refused while the recipient has packages in a
//! non-terminal state.

use std::collections::HashSet;
use std::sync::LazyLock;

use chrono::Utc;
use libsql::Connection;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use super::{next_row, parse_uuid, PackageCore};
use crate::audit::{AuditRecord, AuditSink, AuthEventKind};
use crate::domain::{Recipient, User};
use crate::error::{Error, Result};
use crate::store::write_queue::{opt_text, text};
use crate::store::WriteStmt;
use crate::util::{fmt_ts, now_ts, parse_ts};

/// Rows per import transaction; the store batches this size comfortably
const IMPORT_CHUNK: usize = 500;

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern is valid")
});

const RECIPIENT_COLUMNS: &str =
    "id, employee_id, name, email, department, phone, location, is_active, created_at, updated_at";

/// Input for creating a recipient
#[derive(Debug, Clone, Deserialize)]
pub struct NewRecipient {
    pub employee_id: String,
    pub name: String,
    pub email: String,
    pub department: String,
    pub phone: Option<String>,
    pub location: Option<String>,
}

/// Editable recipient fields; employee_id is immutable
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecipientChanges {
    pub name: Option<String>,
    pub email: Option<String>,
    pub department: Option<String>,
    pub phone: Option<String>,
    pub location: Option<String>,
}

/// One row of a bulk import file
#[derive(Debug, Clone, Deserialize)]
pub struct ImportRow {
    pub employee_id: String,
    pub name: String,
    pub email: String,
    pub department: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
}

/// Per-row import failure
#[derive(Debug, Clone, Serialize)]
pub struct ImportError {
    /// 1-based row number in the submitted file
    pub row: usize,
    pub reason: String,
}

/// Summary of a bulk import
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportReport {
    pub total: usize,
    pub inserted: usize,
    pub updated: usize,
    pub errors: Vec<ImportError>,
}

impl PackageCore {
    pub async fn recipient_by_id(&self, conn: &Connection, id: Uuid) -> Result<Option<Recipient>> {
        let sql = format!("SELECT {} FROM recipients WHERE id = ?1", RECIPIENT_COLUMNS);
        let mut rows = conn
            .query(&sql, libsql::params![id.to_string()])
            .await
            .map_err(|e| Error::Store(format!("recipient lookup failed: {}", e)))?;
        match next_row(&mut rows).await? {
            Some(row) => Ok(Some(row_to_recipient(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn recipient_by_employee_id(
        &self,
        conn: &Connection,
        employee_id: &str,
    ) -> Result<Option<Recipient>> {
        let sql = format!(
            "SELECT {} FROM recipients WHERE employee_id = ?1",
            RECIPIENT_COLUMNS
        );
        let mut rows = conn
            .query(&sql, libsql::params![employee_id])
            .await
            .map_err(|e| Error::Store(format!("recipient lookup failed: {}", e)))?;
        match next_row(&mut rows).await? {
            Some(row) => Ok(Some(row_to_recipient(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn list_recipients(
        &self,
        conn: &Connection,
        include_inactive: bool,
    ) -> Result<Vec<Recipient>> {
        let sql = if include_inactive {
            format!("SELECT {} FROM recipients ORDER BY name", RECIPIENT_COLUMNS)
        } else {
            format!(
                "SELECT {} FROM recipients WHERE is_active = 1 ORDER BY name",
                RECIPIENT_COLUMNS
            )
        };
        let mut rows = conn
            .query(&sql, ())
            .await
            .map_err(|e| Error::Store(format!("recipient listing failed: {}", e)))?;
        let mut result = Vec::new();
        while let Some(row) = next_row(&mut rows).await? {
            result.push(row_to_recipient(&row)?);
        }
        Ok(result)
    }

    /// Typeahead search over active recipients
    pub async fn search_recipients(
        &self,
        conn: &Connection,
        query: &str,
        limit: u32,
    ) -> Result<Vec<Recipient>> {
        let pattern = format!("%{}%", like_escape(query.trim()));
        let sql = format!(
            "SELECT {} FROM recipients \
             WHERE is_active = 1 AND (name LIKE ?1 ESCAPE '\\' \
               OR employee_id LIKE ?1 ESCAPE '\\' OR email LIKE ?1 ESCAPE '\\') \
             ORDER BY name LIMIT ?2",
            RECIPIENT_COLUMNS
        );
        let mut rows = conn
            .query(&sql, libsql::params![pattern, limit.clamp(1, 50) as i64])
            .await
            .map_err(|e| Error::Store(format!("recipient search failed: {}", e)))?;
        let mut result = Vec::new();
        while let Some(row) = next_row(&mut rows).await? {
            result.push(row_to_recipient(&row)?);
        }
        Ok(result)
    }

    pub async fn create_recipient(
        &self,
        actor: &User,
        input: NewRecipient,
        client_ip: Option<String>,
    ) -> Result<Recipient> {
        let employee_id = require_field(&input.employee_id, "Employee ID")?;
        let name = require_field(&input.name, "Name")?;
        let email = validate_email(&input.email)?;
        let department = require_field(&input.department, "Department")?;

        let now = Utc::now();
        let recipient = Recipient {
            id: Uuid::new_v4(),
            employee_id,
            name,
            email,
            department,
            phone: clean_optional(input.phone),
            location: clean_optional(input.location),
            is_active: true,
            created_at: now,
            updated_at: now,
        };

        self.queue()
            .submit_batch(vec![
                insert_stmt(&recipient),
                AuditSink::stmt(
                    AuthEventKind::RecipientCreated,
                    &AuditRecord::for_user(actor.id)
                        .with_username(&actor.username)
                        .with_ip(client_ip)
                        .with_detail(json!({
                            "recipient_id": recipient.id,
                            "employee_id": recipient.employee_id,
                        })),
                ),
            ])
            .await
            .map_err(conflict_message)?;

        Ok(recipient)
    }

    pub async fn update_recipient(
        &self,
        conn: &Connection,
        actor: &User,
        id: Uuid,
        changes: RecipientChanges,
        client_ip: Option<String>,
    ) -> Result<Recipient> {
        let mut recipient = self
            .recipient_by_id(conn, id)
            .await?
            .ok_or_else(|| Error::NotFound("Recipient not found".into()))?;

        let mut changed = serde_json::Map::new();

        if let Some(name) = changes.name {
            recipient.name = require_field(&name, "Name")?;
            changed.insert("name".into(), json!(recipient.name));
        }
        if let Some(email) = changes.email {
            recipient.email = validate_email(&email)?;
            changed.insert("email".into(), json!(recipient.email));
        }
        if let Some(department) = changes.department {
            recipient.department = require_field(&department, "Department")?;
            changed.insert("department".into(), json!(recipient.department));
        }
        if let Some(phone) = changes.phone {
            recipient.phone = clean_optional(Some(phone));
            changed.insert("phone".into(), json!(recipient.phone));
        }
        if let Some(location) = changes.location {
            recipient.location = clean_optional(Some(location));
            changed.insert("location".into(), json!(recipient.location));
        }

        if changed.is_empty() {
            return Ok(recipient);
        }
        recipient.updated_at = Utc::now();

        self.queue()
            .submit_batch(vec![
                WriteStmt::new(
                    "UPDATE recipients SET name = ?1, email = ?2, department = ?3, phone = ?4, \
                     location = ?5, updated_at = ?6 WHERE id = ?7",
                    vec![
                        text(recipient.name.clone()),
                        text(recipient.email.clone()),
                        text(recipient.department.clone()),
                        opt_text(recipient.phone.clone()),
                        opt_text(recipient.location.clone()),
                        text(fmt_ts(recipient.updated_at)),
                        text(recipient.id.to_string()),
                    ],
                ),
                AuditSink::stmt(
                    AuthEventKind::RecipientUpdated,
                    &AuditRecord::for_user(actor.id)
                        .with_username(&actor.username)
                        .with_ip(client_ip)
                        .with_detail(json!({
                            "recipient_id": recipient.id,
                            "changes": serde_json::Value::Object(changed),
                        })),
                ),
            ])
            .await
            .map_err(conflict_message)?;

        Ok(recipient)
    }

    /// Soft-deactivate a recipient
    ///
    /// Refused while any of the recipient's packages is still open, so
    /// operators never end up holding a package for nobody.
    pub async fn deactivate_recipient(
        &self,
        conn: &Connection,
        actor: &User,
        id: Uuid,
        client_ip: Option<String>,
    ) -> Result<()> {
        let recipient = self
            .recipient_by_id(conn, id)
            .await?
            .ok_or_else(|| Error::NotFound("Recipient not found".into()))?;

        let mut rows = conn
            .query(
                "SELECT COUNT(*) FROM packages WHERE recipient_id = ?1 \
                 AND status IN ('registered', 'awaiting_pickup', 'out_for_delivery')",
                libsql::params![id.to_string()],
            )
            .await
            .map_err(|e| Error::Store(format!("open package check failed: {}", e)))?;
        let open: i64 = match next_row(&mut rows).await? {
            Some(row) => row
                .get(0)
                .map_err(|e| Error::Store(format!("open package count: {}", e)))?,
            None => 0,
        };
        if open > 0 {
            return Err(Error::Validation("has_open_packages".into()));
        }

        self.queue()
            .submit_batch(vec![
                WriteStmt::new(
                    "UPDATE recipients SET is_active = 0, updated_at = ?1 WHERE id = ?2",
                    vec![text(now_ts()), text(id.to_string())],
                ),
                AuditSink::stmt(
                    AuthEventKind::RecipientUpdated,
                    &AuditRecord::for_user(actor.id)
                        .with_username(&actor.username)
                        .with_ip(client_ip)
                        .with_detail(json!({
                            "recipient_id": id,
                            "employee_id": recipient.employee_id,
                            "deactivated": true,
                        })),
                ),
            ])
            .await
    }

    /// Bulk import: insert new employee_ids, update existing ones
    ///
    /// Rows are validated individually; valid rows commit in chunked
    /// transactions. A chunk that fails (e.g. an email collision inside it)
    /// reports every row it carried.
    pub async fn import_recipients(
        &self,
        conn: &Connection,
        actor: &User,
        rows: Vec<ImportRow>,
        client_ip: Option<String>,
    ) -> Result<ImportReport> {
        let mut report = ImportReport {
            total: rows.len(),
            ..Default::default()
        };

        // Validate everything up front so the report covers the whole file.
        let mut valid: Vec<(usize, NewRecipient)> = Vec::new();
        for (index, row) in rows.into_iter().enumerate() {
            let row_no = index + 1;
            match validate_import_row(row) {
                Ok(input) => valid.push((row_no, input)),
                Err(reason) => report.errors.push(ImportError { row: row_no, reason }),
            }
        }

        let existing = self
            .existing_employee_ids(conn, valid.iter().map(|(_, r)| r.employee_id.as_str()))
            .await?;

        for chunk in valid.chunks(IMPORT_CHUNK) {
            let mut stmts = Vec::with_capacity(chunk.len());
            let mut chunk_inserted = 0usize;
            let mut chunk_updated = 0usize;

            for (_, input) in chunk {
                if existing.contains(&input.employee_id) {
                    stmts.push(WriteStmt::new(
                        "UPDATE recipients SET name = ?1, email = ?2, department = ?3, \
                         phone = ?4, location = ?5, updated_at = ?6 WHERE employee_id = ?7",
                        vec![
                            text(input.name.clone()),
                            text(input.email.clone()),
                            text(input.department.clone()),
                            opt_text(input.phone.clone()),
                            opt_text(input.location.clone()),
                            text(now_ts()),
                            text(input.employee_id.clone()),
                        ],
                    ));
                    chunk_updated += 1;
                } else {
                    let now = Utc::now();
                    stmts.push(insert_stmt(&Recipient {
                        id: Uuid::new_v4(),
                        employee_id: input.employee_id.clone(),
                        name: input.name.clone(),
                        email: input.email.clone(),
                        department: input.department.clone(),
                        phone: input.phone.clone(),
                        location: input.location.clone(),
                        is_active: true,
                        created_at: now,
                        updated_at: now,
                    }));
                    chunk_inserted += 1;
                }
            }

            match self.queue().submit_batch(stmts).await {
                Ok(()) => {
                    report.inserted += chunk_inserted;
                    report.updated += chunk_updated;
                }
                Err(e) => {
                    let reason = match e {
                        Error::Conflict(_) => "duplicate email or employee_id in chunk".to_string(),
                        other => other.to_string(),
                    };
                    for (row_no, _) in chunk {
                        report.errors.push(ImportError {
                            row: *row_no,
                            reason: reason.clone(),
                        });
                    }
                }
            }
        }

        self.queue()
            .submit(AuditSink::stmt(
                AuthEventKind::RecipientImported,
                &AuditRecord::for_user(actor.id)
                    .with_username(&actor.username)
                    .with_ip(client_ip)
                    .with_detail(json!({
                        "total": report.total,
                        "inserted": report.inserted,
                        "updated": report.updated,
                        "failed": report.errors.len(),
                    })),
            ))
            .await?;

        Ok(report)
    }

    /// Dry-run of an import: validate rows and classify insert vs update
    /// without writing anything
    pub async fn preview_import(
        &self,
        conn: &Connection,
        rows: Vec<ImportRow>,
    ) -> Result<ImportReport> {
        let mut report = ImportReport {
            total: rows.len(),
            ..Default::default()
        };

        let mut valid: Vec<(usize, NewRecipient)> = Vec::new();
        for (index, row) in rows.into_iter().enumerate() {
            let row_no = index + 1;
            match validate_import_row(row) {
                Ok(input) => valid.push((row_no, input)),
                Err(reason) => report.errors.push(ImportError { row: row_no, reason }),
            }
        }

        let existing = self
            .existing_employee_ids(conn, valid.iter().map(|(_, r)| r.employee_id.as_str()))
            .await?;
        for (_, input) in &valid {
            if existing.contains(&input.employee_id) {
                report.updated += 1;
            } else {
                report.inserted += 1;
            }
        }
        Ok(report)
    }

    async fn existing_employee_ids<'a>(
        &self,
        conn: &Connection,
        ids: impl Iterator<Item = &'a str>,
    ) -> Result<HashSet<String>> {
        let mut existing = HashSet::new();
        // Chunk the IN-list; import files can exceed the parameter limit
        let ids: Vec<&str> = ids.collect();
        for chunk in ids.chunks(IMPORT_CHUNK) {
            let placeholders: Vec<String> =
                (1..=chunk.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT employee_id FROM recipients WHERE employee_id IN ({})",
                placeholders.join(", ")
            );
            let params: Vec<libsql::Value> =
                chunk.iter().map(|id| text(id.to_string())).collect();
            let mut rows = conn
                .query(&sql, params)
                .await
                .map_err(|e| Error::Store(format!("employee id lookup failed: {}", e)))?;
            while let Some(row) = next_row(&mut rows).await? {
                let id: String = row
                    .get(0)
                    .map_err(|e| Error::Store(format!("employee id read: {}", e)))?;
                existing.insert(id);
            }
        }
        Ok(existing)
    }
}

fn validate_import_row(row: ImportRow) -> std::result::Result<NewRecipient, String> {
    let employee_id = row.employee_id.trim().to_string();
    if employee_id.is_empty() {
        return Err("employee_id is required".into());
    }
    let name = row.name.trim().to_string();
    if name.is_empty() {
        return Err("name is required".into());
    }
    let email = row.email.trim().to_string();
    if !EMAIL_RE.is_match(&email) {
        return Err(format!("invalid email '{}'", email));
    }
    let department = row.department.trim().to_string();
    if department.is_empty() {
        return Err("department is required".into());
    }
    Ok(NewRecipient {
        employee_id,
        name,
        email,
        department,
        phone: clean_optional(row.phone),
        location: clean_optional(row.location),
    })
}

fn insert_stmt(recipient: &Recipient) -> WriteStmt {
    WriteStmt::new(
        "INSERT INTO recipients (id, employee_id, name, email, department, phone, location, \
         is_active, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1, ?8, ?8)",
        vec![
            text(recipient.id.to_string()),
            text(recipient.employee_id.clone()),
            text(recipient.name.clone()),
            text(recipient.email.clone()),
            text(recipient.department.clone()),
            opt_text(recipient.phone.clone()),
            opt_text(recipient.location.clone()),
            text(fmt_ts(recipient.created_at)),
        ],
    )
}

fn require_field(value: &str, label: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(Error::Validation(format!("{} is required", label)));
    }
    Ok(trimmed.to_string())
}

fn validate_email(value: &str) -> Result<String> {
    let trimmed = value.trim().to_string();
    if !EMAIL_RE.is_match(&trimmed) {
        return Err(Error::Validation("Email address is invalid".into()));
    }
    Ok(trimmed)
}

fn clean_optional(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        let trimmed = v.trim().to_string();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed)
        }
    })
}

fn conflict_message(err: Error) -> Error {
    match err {
        Error::Conflict(_) => Error::Conflict("Employee ID or email already exists".into()),
        other => other,
    }
}

fn like_escape(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

fn row_to_recipient(row: &libsql::Row) -> Result<Recipient> {
    let read = |field: &str, e: libsql::Error| Error::Store(format!("recipient {}: {}", field, e));

    let id_str: String = row.get(0).map_err(|e| read("id", e))?;
    let employee_id: String = row.get(1).map_err(|e| read("employee_id", e))?;
    let name: String = row.get(2).map_err(|e| read("name", e))?;
    let email: String = row.get(3).map_err(|e| read("email", e))?;
    let department: Option<String> = row.get(4).ok();
    let phone: Option<String> = row.get(5).ok();
    let location: Option<String> = row.get(6).ok();
    let is_active: i64 = row.get(7).map_err(|e| read("is_active", e))?;
    let created_str: String = row.get(8).map_err(|e| read("created_at", e))?;
    let updated_str: String = row.get(9).map_err(|e| read("updated_at", e))?;

    Ok(Recipient {
        id: parse_uuid(&id_str)?,
        employee_id,
        name,
        email,
        // The storage column is nullable; the backfill keeps this total
        department: department.unwrap_or_else(|| "Unassigned".into()),
        phone,
        location,
        is_active: is_active != 0,
        created_at: parse_ts(&created_str)?,
        updated_at: parse_ts(&updated_str)?,
    })
}
