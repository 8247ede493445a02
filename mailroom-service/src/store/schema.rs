//! Schema DDL and one-time migrations
//!
//! All DDL is idempotent (`IF NOT EXISTS`); one-time data migrations are
//! guarded by the `schema_migrations` table.

use libsql::Connection;

use crate::error::{Error, Result};

/// Idempotent DDL, executed on every startup
const DDL: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY,
        username TEXT NOT NULL UNIQUE,
        password_hash TEXT NOT NULL,
        full_name TEXT NOT NULL,
        role TEXT NOT NULL,
        is_active INTEGER NOT NULL DEFAULT 1,
        must_change_password INTEGER NOT NULL DEFAULT 0,
        password_history TEXT NOT NULL DEFAULT '[]',
        failed_login_count INTEGER NOT NULL DEFAULT 0,
        locked_until TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sessions (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL REFERENCES users(id),
        token TEXT NOT NULL UNIQUE,
        expires_at TEXT NOT NULL,
        last_activity TEXT NOT NULL,
        client_ip TEXT,
        user_agent TEXT,
        created_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions (user_id, created_at)",
    "CREATE INDEX IF NOT EXISTS idx_sessions_expires ON sessions (expires_at)",
    r#"
    CREATE TABLE IF NOT EXISTS recipients (
        id TEXT PRIMARY KEY,
        employee_id TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL,
        email TEXT NOT NULL UNIQUE,
        department TEXT,
        phone TEXT,
        location TEXT,
        is_active INTEGER NOT NULL DEFAULT 1,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_recipients_name ON recipients (name)",
    r#"
    CREATE TABLE IF NOT EXISTS packages (
        id TEXT PRIMARY KEY,
        tracking_no TEXT NOT NULL,
        carrier TEXT NOT NULL,
        recipient_id TEXT NOT NULL REFERENCES recipients(id),
        status TEXT NOT NULL,
        notes TEXT,
        created_by TEXT NOT NULL REFERENCES users(id),
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_packages_tracking ON packages (tracking_no)",
    "CREATE INDEX IF NOT EXISTS idx_packages_recipient ON packages (recipient_id, status)",
    "CREATE INDEX IF NOT EXISTS idx_packages_created ON packages (created_at DESC, id)",
    r#"
    CREATE TABLE IF NOT EXISTS package_events (
        id TEXT PRIMARY KEY,
        package_id TEXT NOT NULL REFERENCES packages(id),
        old_status TEXT,
        new_status TEXT NOT NULL,
        notes TEXT,
        actor_id TEXT NOT NULL REFERENCES users(id),
        created_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_package_events_package ON package_events (package_id, created_at, id)",
    r#"
    CREATE TABLE IF NOT EXISTS attachments (
        id TEXT PRIMARY KEY,
        package_id TEXT NOT NULL REFERENCES packages(id),
        original_filename TEXT NOT NULL,
        stored_path TEXT NOT NULL,
        mime_type TEXT NOT NULL,
        byte_size INTEGER NOT NULL,
        uploaded_by TEXT NOT NULL REFERENCES users(id),
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS auth_events (
        id TEXT PRIMARY KEY,
        user_id TEXT,
        kind TEXT NOT NULL,
        username_attempted TEXT,
        client_ip TEXT,
        detail TEXT,
        created_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_auth_events_created ON auth_events (created_at DESC)",
    "CREATE INDEX IF NOT EXISTS idx_auth_events_user ON auth_events (user_id, created_at)",
    r#"
    CREATE TABLE IF NOT EXISTS system_settings (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL,
        updated_by TEXT,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS schema_migrations (
        version INTEGER PRIMARY KEY,
        applied_at TEXT NOT NULL
    )
    "#,
    // Event logs are append-only; reject mutation at the storage layer too
    r#"
    CREATE TRIGGER IF NOT EXISTS package_events_no_update
    BEFORE UPDATE ON package_events
    BEGIN
        SELECT RAISE(ABORT, 'package events are immutable');
    END
    "#,
    r#"
    CREATE TRIGGER IF NOT EXISTS package_events_no_delete
    BEFORE DELETE ON package_events
    BEGIN
        SELECT RAISE(ABORT, 'package events are immutable');
    END
    "#,
    r#"
    CREATE TRIGGER IF NOT EXISTS auth_events_no_update
    BEFORE UPDATE ON auth_events
    BEGIN
        SELECT RAISE(ABORT, 'audit events are immutable');
    END
    "#,
    r#"
    CREATE TRIGGER IF NOT EXISTS auth_events_no_delete
    BEFORE DELETE ON auth_events
    BEGIN
        SELECT RAISE(ABORT, 'audit events are immutable');
    END
    "#,
];

/// Create the schema if absent
pub(super) async fn ensure_schema(conn: &Connection) -> Result<()> {
    for stmt in DDL {
        conn.execute(stmt, ())
            .await
            .map_err(|e| Error::Store(format!("schema creation failed: {}", e)))?;
    }
    Ok(())
}

/// Run one-time data migrations that have not been applied yet
pub(super) async fn run_migrations(conn: &Connection) -> Result<()> {
    apply_once(conn, 1, MIGRATION_1_DEPARTMENT_BACKFILL).await?;
    Ok(())
}

/// Recipients predate the mandatory-department rule; backfill the literal
/// "Unassigned" so the service-layer invariant holds for old rows.
const MIGRATION_1_DEPARTMENT_BACKFILL: &str =
    "UPDATE recipients SET department = 'Unassigned' \
     WHERE department IS NULL OR TRIM(department) = ''";

async fn apply_once(conn: &Connection, version: i64, sql: &str) -> Result<()> {
    let mut rows = conn
        .query(
            "SELECT version FROM schema_migrations WHERE version = ?1",
            libsql::params![version],
        )
        .await
        .map_err(|e| Error::Store(format!("migration lookup failed: {}", e)))?;

    if rows
        .next()
        .await
        .map_err(|e| Error::Store(format!("migration lookup failed: {}", e)))?
        .is_some()
    {
        return Ok(());
    }

    conn.execute(sql, ())
        .await
        .map_err(|e| Error::Store(format!("migration {} failed: {}", version, e)))?;

    conn.execute(
        "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
        libsql::params![version, crate::util::now_ts()],
    )
    .await
    .map_err(|e| Error::Store(format!("migration {} bookkeeping failed: {}", version, e)))?;

    tracing::info!(version, "Applied one-time migration");
    Ok(())
}
