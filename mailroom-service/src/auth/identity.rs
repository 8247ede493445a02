//! Identity service: login outcome, session lifecycle, user management
//!
//! All counters and timestamps flow through the write queue; request-time
//! reads use short-lived store read handles. There is no in-memory cache of
//! user records.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use libsql::Connection;
use serde_json::json;
use uuid::Uuid;

use super::password::PasswordHasher;
use crate::audit::{AuditRecord, AuditSink, AuthEventKind};
use crate::config::{LoginConfig, SessionConfig};
use crate::domain::{Role, Session, User};
use crate::error::{Error, Result};
use crate::store::write_queue::{opt_text, text};
use crate::store::{WriteQueue, WriteStmt};
use crate::util::{fmt_ts, now_ts, parse_ts};

const USER_COLUMNS: &str = "id, username, password_hash, full_name, role, is_active, \
     must_change_password, password_history, failed_login_count, locked_until, \
     created_at, updated_at";

const SESSION_COLUMNS: &str =
    "id, user_id, token, expires_at, last_activity, client_ip, user_agent, created_at";

/// Input for creating a user account
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub password: String,
    pub full_name: String,
    pub role: Role,
}

/// Admin-editable user fields
#[derive(Debug, Clone, Default)]
pub struct UserChanges {
    pub full_name: Option<String>,
    pub role: Option<Role>,
    pub is_active: Option<bool>,
}

/// Identity service
#[derive(Clone)]
pub struct IdentityService {
    queue: Arc<WriteQueue>,
    audit: AuditSink,
    hasher: PasswordHasher,
    sessions: SessionConfig,
    logins: LoginConfig,
}

impl IdentityService {
    pub fn new(
        queue: Arc<WriteQueue>,
        audit: AuditSink,
        hasher: PasswordHasher,
        sessions: SessionConfig,
        logins: LoginConfig,
    ) -> Self {
        Self {
            queue,
            audit,
            hasher,
            sessions,
            logins,
        }
    }

    pub fn hasher(&self) -> &PasswordHasher {
        &self.hasher
    }

    // ------------------------------------------------------------------
    // Lookups
    // ------------------------------------------------------------------

    pub async fn user_by_username(
        &self,
        conn: &Connection,
        username: &str,
    ) -> Result<Option<User>> {
        let sql = format!("SELECT {} FROM users WHERE username = ?1", USER_COLUMNS);
        let mut rows = conn
            .query(&sql, libsql::params![username])
            .await
            .map_err(|e| Error::Store(format!("user lookup failed: {}", e)))?;
        match next_row(&mut rows).await? {
            Some(row) => Ok(Some(row_to_user(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn user_by_id(&self, conn: &Connection, id: Uuid) -> Result<Option<User>> {
        let sql = format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS);
        let mut rows = conn
            .query(&sql, libsql::params![id.to_string()])
            .await
            .map_err(|e| Error::Store(format!("user lookup failed: {}", e)))?;
        match next_row(&mut rows).await? {
            Some(row) => Ok(Some(row_to_user(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn list_users(&self, conn: &Connection) -> Result<Vec<User>> {
        let sql = format!("SELECT {} FROM users ORDER BY username", USER_COLUMNS);
        let mut rows = conn
            .query(&sql, ())
            .await
            .map_err(|e| Error::Store(format!("user listing failed: {}", e)))?;
        let mut users = Vec::new();
        while let Some(row) = next_row(&mut rows).await? {
            users.push(row_to_user(&row)?);
        }
        Ok(users)
    }

    // ------------------------------------------------------------------
    // Login
    // ------------------------------------------------------------------

    /// Run the login algorithm
    ///
    /// Failures are generic to the caller; the audit trail carries the
    /// specific reason. Lockout is the one distinguishable outcome.
    pub async fn login(
        &self,
        conn: &Connection,
        username: &str,
        password: &str,
        client_ip: Option<String>,
        user_agent: Option<String>,
    ) -> Result<(User, Session)> {
        let now = Utc::now();

        let Some(user) = self.user_by_username(conn, username).await? else {
            self.audit.record(
                AuthEventKind::LoginFailed,
                AuditRecord::default()
                    .with_username(username)
                    .with_ip(client_ip)
                    .with_detail(json!({ "reason": "unknown_user" })),
            );
            // Constant delay so absent users are indistinguishable from a
            // failed hash verification.
            tokio::time::sleep(Duration::from_millis(self.logins.failure_delay_ms)).await;
            return Err(Error::Unauthenticated);
        };

        if user.is_locked(now) {
            self.audit.record(
                AuthEventKind::LoginFailed,
                AuditRecord::for_user(user.id)
                    .with_username(username)
                    .with_ip(client_ip)
                    .with_detail(json!({ "reason": "locked" })),
            );
            return Err(Error::Locked(
                "Account is temporarily locked. Try again later.".into(),
            ));
        }

        if !user.is_active {
            self.audit.record(
                AuthEventKind::LoginFailed,
                AuditRecord::for_user(user.id)
                    .with_username(username)
                    .with_ip(client_ip)
                    .with_detail(json!({ "reason": "inactive" })),
            );
            return Err(Error::Unauthenticated);
        }

        if !self.hasher.verify(password, &user.password_hash)? {
            if let Err(e) = self.record_failed_password(&user, client_ip).await {
                tracing::error!("Failed to record login failure: {}", e);
            }
            return Err(Error::Unauthenticated);
        }

        // Success: reset counters, lift any expired lock, mint the session.
        let was_locked = user.locked_until.is_some();
        let mut stmts = vec![WriteStmt::new(
            "UPDATE users SET failed_login_count = 0, locked_until = NULL, updated_at = ?1 \
             WHERE id = ?2",
            vec![text(now_ts()), text(user.id.to_string())],
        )];

        let (session, session_stmts) = self
            .prepare_session(conn, &user, client_ip.clone(), user_agent)
            .await?;
        stmts.extend(session_stmts);

        if was_locked {
            stmts.push(AuditSink::stmt(
                AuthEventKind::AccountUnlocked,
                &AuditRecord::for_user(user.id)
                    .with_username(&user.username)
                    .with_ip(client_ip.clone())
                    .with_detail(json!({ "reason": "lock_expired" })),
            ));
        }
        stmts.push(AuditSink::stmt(
            AuthEventKind::Login,
            &AuditRecord::for_user(user.id)
                .with_username(&user.username)
                .with_ip(client_ip),
        ));

        self.queue.submit_batch(stmts).await?;

        let mut user = user;
        user.failed_login_count = 0;
        user.locked_until = None;
        Ok((user, session))
    }

    async fn record_failed_password(&self, user: &User, client_ip: Option<String>) -> Result<()> {
        let new_count = user.failed_login_count + 1;
        let now = Utc::now();

        let mut stmts = vec![WriteStmt::new(
            "UPDATE users SET failed_login_count = failed_login_count + 1, updated_at = ?1 \
             WHERE id = ?2",
            vec![text(fmt_ts(now)), text(user.id.to_string())],
        )];

        if new_count >= self.logins.max_failed {
            let locked_until =
                now + chrono::Duration::seconds(self.logins.lockout_duration_secs as i64);
            stmts.push(WriteStmt::new(
                "UPDATE users SET locked_until = ?1 WHERE id = ?2",
                vec![text(fmt_ts(locked_until)), text(user.id.to_string())],
            ));
            stmts.push(AuditSink::stmt(
                AuthEventKind::AccountLocked,
                &AuditRecord::for_user(user.id)
                    .with_username(&user.username)
                    .with_ip(client_ip.clone())
                    .with_detail(json!({
                        "failed_attempts": new_count,
                        "locked_until": fmt_ts(locked_until),
                    })),
            ));
            tracing::warn!(username = %user.username, "Account locked after repeated login failures");
        }

        stmts.push(AuditSink::stmt(
            AuthEventKind::LoginFailed,
            &AuditRecord::for_user(user.id)
                .with_username(&user.username)
                .with_ip(client_ip)
                .with_detail(json!({ "reason": "bad_password" })),
        ));

        self.queue.submit_batch(stmts).await
    }

    // ------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------

    /// Create a session for an already-authenticated user
    pub async fn create_session(
        &self,
        conn: &Connection,
        user: &User,
        client_ip: Option<String>,
        user_agent: Option<String>,
    ) -> Result<Session> {
        let (session, stmts) = self.prepare_session(conn, user, client_ip, user_agent).await?;
        self.queue.submit_batch(stmts).await?;
        Ok(session)
    }

    /// Build the statements for a new session, evicting the oldest active
    /// sessions first so the per-user cap holds after the insert
    async fn prepare_session(
        &self,
        conn: &Connection,
        user: &User,
        client_ip: Option<String>,
        user_agent: Option<String>,
    ) -> Result<(Session, Vec<WriteStmt>)> {
        let now = Utc::now();
        let active = self.sessions_for_user(conn, user.id).await?;

        let mut stmts = Vec::new();
        let cap = self.sessions.max_concurrent as usize;
        if active.len() >= cap {
            // oldest first by created_at; keep cap - 1 newest
            let evict = active.len() + 1 - cap;
            for session in active.iter().take(evict) {
                stmts.push(WriteStmt::new(
                    "DELETE FROM sessions WHERE id = ?1",
                    vec![text(session.id.to_string())],
                ));
            }
        }

        let session = Session {
            id: Uuid::new_v4(),
            user_id: user.id,
            token: super::generate_token(),
            expires_at: now + chrono::Duration::seconds(self.sessions.timeout_secs as i64),
            last_activity: now,
            client_ip,
            user_agent,
            created_at: now,
        };

        stmts.push(WriteStmt::new(
            "INSERT INTO sessions (id, user_id, token, expires_at, last_activity, client_ip, user_agent, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            vec![
                text(session.id.to_string()),
                text(session.user_id.to_string()),
                text(session.token.clone()),
                text(fmt_ts(session.expires_at)),
                text(fmt_ts(session.last_activity)),
                opt_text(session.client_ip.clone()),
                opt_text(session.user_agent.clone()),
                text(fmt_ts(session.created_at)),
            ],
        ));

        Ok((session, stmts))
    }

    /// Active sessions for a user, oldest first
    pub async fn sessions_for_user(&self, conn: &Connection, user_id: Uuid) -> Result<Vec<Session>> {
        let sql = format!(
            "SELECT {} FROM sessions WHERE user_id = ?1 AND expires_at > ?2 \
             ORDER BY created_at ASC, id ASC",
            SESSION_COLUMNS
        );
        let mut rows = conn
            .query(&sql, libsql::params![user_id.to_string(), now_ts()])
            .await
            .map_err(|e| Error::Store(format!("session listing failed: {}", e)))?;
        let mut sessions = Vec::new();
        while let Some(row) = next_row(&mut rows).await? {
            sessions.push(row_to_session(&row)?);
        }
        Ok(sessions)
    }

    /// Validate a session token and bind its user
    ///
    /// Expired or unknown tokens are treated as unauthenticated; the expired
    /// row is left for the startup sweep. A renewal write is issued when the
    /// session has aged past the renewal window; the write is conditioned on
    /// the last_activity watermark so concurrent requests produce at most one.
    pub async fn validate_session(
        &self,
        conn: &Connection,
        token: &str,
    ) -> Result<Option<(User, Session)>> {
        let sql = format!("SELECT {} FROM sessions WHERE token = ?1", SESSION_COLUMNS);
        let mut rows = conn
            .query(&sql, libsql::params![token])
            .await
            .map_err(|e| Error::Store(format!("session lookup failed: {}", e)))?;
        let Some(row) = next_row(&mut rows).await? else {
            return Ok(None);
        };
        let session = row_to_session(&row)?;

        let now = Utc::now();
        if session.is_expired(now) {
            return Ok(None);
        }

        let Some(user) = self.user_by_id(conn, session.user_id).await? else {
            return Ok(None);
        };
        if !user.is_active {
            return Ok(None);
        }

        let remaining = session.expires_at - now;
        let window = chrono::Duration::seconds(self.sessions.renewal_window_secs as i64);
        let timeout = chrono::Duration::seconds(self.sessions.timeout_secs as i64);
        if remaining < timeout - window {
            let renewed_expiry = now + timeout;
            let stmt = WriteStmt::new(
                "UPDATE sessions SET expires_at = ?1, last_activity = ?2 \
                 WHERE id = ?3 AND last_activity = ?4",
                vec![
                    text(fmt_ts(renewed_expiry)),
                    text(fmt_ts(now)),
                    text(session.id.to_string()),
                    text(fmt_ts(session.last_activity)),
                ],
            );
            // Fire-and-forget; the watermark condition makes replays no-ops.
            match self.queue.enqueue(vec![stmt]) {
                Ok(receiver) => {
                    tokio::spawn(async move {
                        if let Ok(Err(e)) = receiver.await {
                            tracing::debug!("Session renewal write failed: {}", e);
                        }
                    });
                }
                Err(e) => tracing::debug!("Session renewal not enqueued: {}", e),
            }
        }

        Ok(Some((user, session)))
    }

    /// Delete all of a user's sessions and record the logout
    pub async fn logout(&self, user: &User, client_ip: Option<String>) -> Result<()> {
        self.queue
            .submit_batch(vec![
                WriteStmt::new(
                    "DELETE FROM sessions WHERE user_id = ?1",
                    vec![text(user.id.to_string())],
                ),
                AuditSink::stmt(
                    AuthEventKind::Logout,
                    &AuditRecord::for_user(user.id)
                        .with_username(&user.username)
                        .with_ip(client_ip),
                ),
            ])
            .await
    }

    /// Terminate one of the user's own sessions
    pub async fn terminate_session(&self, user: &User, session_id: Uuid) -> Result<()> {
        self.queue
            .submit(WriteStmt::new(
                "DELETE FROM sessions WHERE id = ?1 AND user_id = ?2",
                vec![text(session_id.to_string()), text(user.id.to_string())],
            ))
            .await
    }

    // ------------------------------------------------------------------
    // Password lifecycle
    // ------------------------------------------------------------------

    /// Self-service password change
    pub async fn change_password(
        &self,
        user: &User,
        current_password: &str,
        new_password: &str,
        client_ip: Option<String>,
    ) -> Result<()> {
        if !self.hasher.verify(current_password, &user.password_hash)? {
            return Err(Error::Validation("Current password is incorrect".into()));
        }

        let new_hash = self
            .prepare_new_password(user, new_password)
            .await?;
        let history = push_history(
            &user.password_history,
            &user.password_hash,
            self.hasher.history_count(),
        );

        self.queue
            .submit_batch(vec![
                WriteStmt::new(
                    "UPDATE users SET password_hash = ?1, password_history = ?2, \
                     must_change_password = 0, updated_at = ?3 WHERE id = ?4",
                    vec![
                        text(new_hash),
                        text(serde_json::to_string(&history).unwrap_or_else(|_| "[]".into())),
                        text(now_ts()),
                        text(user.id.to_string()),
                    ],
                ),
                AuditSink::stmt(
                    AuthEventKind::PasswordChanged,
                    &AuditRecord::for_user(user.id)
                        .with_username(&user.username)
                        .with_ip(client_ip),
                ),
            ])
            .await
    }

    /// Admin-initiated reset: forces a change on next login and terminates
    /// the target's sessions
    pub async fn admin_reset_password(
        &self,
        actor: &User,
        target: &User,
        new_password: &str,
        client_ip: Option<String>,
    ) -> Result<()> {
        let new_hash = self.prepare_new_password(target, new_password).await?;
        let history = push_history(
            &target.password_history,
            &target.password_hash,
            self.hasher.history_count(),
        );

        self.queue
            .submit_batch(vec![
                WriteStmt::new(
                    "UPDATE users SET password_hash = ?1, password_history = ?2, \
                     must_change_password = 1, updated_at = ?3 WHERE id = ?4",
                    vec![
                        text(new_hash),
                        text(serde_json::to_string(&history).unwrap_or_else(|_| "[]".into())),
                        text(now_ts()),
                        text(target.id.to_string()),
                    ],
                ),
                WriteStmt::new(
                    "DELETE FROM sessions WHERE user_id = ?1",
                    vec![text(target.id.to_string())],
                ),
                AuditSink::stmt(
                    AuthEventKind::PasswordReset,
                    &AuditRecord::for_user(target.id)
                        .with_username(&target.username)
                        .with_ip(client_ip)
                        .with_detail(json!({ "reset_by": actor.username })),
                ),
            ])
            .await
    }

    async fn prepare_new_password(&self, user: &User, new_password: &str) -> Result<String> {
        self.hasher.check_strength(new_password)?;
        if self
            .hasher
            .in_history(new_password, &user.password_hash, &user.password_history)?
        {
            return Err(Error::Validation(
                "New password must differ from recently used passwords".into(),
            ));
        }
        self.hasher.hash(new_password)
    }

    // ------------------------------------------------------------------
    // User management
    // ------------------------------------------------------------------

    pub async fn create_user(
        &self,
        actor: &User,
        new_user: NewUser,
        client_ip: Option<String>,
    ) -> Result<User> {
        let username = new_user.username.trim().to_string();
        if username.is_empty() {
            return Err(Error::Validation("Username is required".into()));
        }
        let full_name = new_user.full_name.trim().to_string();
        if full_name.is_empty() {
            return Err(Error::Validation("Full name is required".into()));
        }
        self.hasher.check_strength(&new_user.password)?;

        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            username,
            password_hash: self.hasher.hash(&new_user.password)?,
            full_name,
            role: new_user.role,
            is_active: true,
            must_change_password: false,
            password_history: Vec::new(),
            failed_login_count: 0,
            locked_until: None,
            created_at: now,
            updated_at: now,
        };

        self.queue
            .submit_batch(vec![
                WriteStmt::new(
                    "INSERT INTO users (id, username, password_hash, full_name, role, is_active, \
                     must_change_password, password_history, failed_login_count, locked_until, \
                     created_at, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, 1, 0, '[]', 0, NULL, ?6, ?6)",
                    vec![
                        text(user.id.to_string()),
                        text(user.username.clone()),
                        text(user.password_hash.clone()),
                        text(user.full_name.clone()),
                        text(user.role.as_str()),
                        text(fmt_ts(now)),
                    ],
                ),
                AuditSink::stmt(
                    AuthEventKind::UserCreated,
                    &AuditRecord::for_user(user.id)
                        .with_username(&user.username)
                        .with_ip(client_ip)
                        .with_detail(json!({
                            "role": user.role.as_str(),
                            "created_by": actor.username,
                        })),
                ),
            ])
            .await
            .map_err(|e| match e {
                Error::Conflict(_) => Error::Conflict("Username already exists".into()),
                other => other,
            })?;

        Ok(user)
    }

    /// Apply admin edits to a user
    ///
    /// Deactivation also terminates the target's sessions. Policy checks
    /// (who may edit whom, and which fields) happen before this is called.
    pub async fn update_user(
        &self,
        actor: &User,
        target: &User,
        changes: UserChanges,
        client_ip: Option<String>,
    ) -> Result<()> {
        let mut changed = serde_json::Map::new();
        let mut stmts = Vec::new();

        if let Some(full_name) = &changes.full_name {
            let full_name = full_name.trim();
            if full_name.is_empty() {
                return Err(Error::Validation("Full name is required".into()));
            }
            stmts.push(WriteStmt::new(
                "UPDATE users SET full_name = ?1, updated_at = ?2 WHERE id = ?3",
                vec![text(full_name), text(now_ts()), text(target.id.to_string())],
            ));
            changed.insert("full_name".into(), json!(full_name));
        }

        if let Some(role) = changes.role {
            stmts.push(WriteStmt::new(
                "UPDATE users SET role = ?1, updated_at = ?2 WHERE id = ?3",
                vec![
                    text(role.as_str()),
                    text(now_ts()),
                    text(target.id.to_string()),
                ],
            ));
            changed.insert("role".into(), json!(role.as_str()));
        }

        let deactivating = changes.is_active == Some(false) && target.is_active;
        if let Some(is_active) = changes.is_active {
            stmts.push(WriteStmt::new(
                "UPDATE users SET is_active = ?1, updated_at = ?2 WHERE id = ?3",
                vec![
                    integer_from_bool(is_active),
                    text(now_ts()),
                    text(target.id.to_string()),
                ],
            ));
            changed.insert("is_active".into(), json!(is_active));
        }

        if stmts.is_empty() {
            return Ok(());
        }

        if deactivating {
            stmts.push(WriteStmt::new(
                "DELETE FROM sessions WHERE user_id = ?1",
                vec![text(target.id.to_string())],
            ));
            stmts.push(AuditSink::stmt(
                AuthEventKind::UserDeactivated,
                &AuditRecord::for_user(target.id)
                    .with_username(&target.username)
                    .with_ip(client_ip.clone())
                    .with_detail(json!({ "deactivated_by": actor.username })),
            ));
        }

        stmts.push(AuditSink::stmt(
            AuthEventKind::UserUpdated,
            &AuditRecord::for_user(target.id)
                .with_username(&target.username)
                .with_ip(client_ip)
                .with_detail(json!({
                    "updated_by": actor.username,
                    "changes": serde_json::Value::Object(changed),
                })),
        ));

        self.queue.submit_batch(stmts).await
    }

    /// Deactivate a user: clears the active flag and all sessions
    pub async fn deactivate_user(
        &self,
        actor: &User,
        target: &User,
        client_ip: Option<String>,
    ) -> Result<()> {
        self.update_user(
            actor,
            target,
            UserChanges {
                is_active: Some(false),
                ..Default::default()
            },
            client_ip,
        )
        .await
    }
}

fn integer_from_bool(value: bool) -> libsql::Value {
    libsql::Value::Integer(if value { 1 } else { 0 })
}

/// Append the outgoing digest and trim to the retention window, oldest first
fn push_history(history: &[String], outgoing: &str, keep: usize) -> Vec<String> {
    let mut updated: Vec<String> = history.to_vec();
    updated.push(outgoing.to_string());
    if updated.len() > keep {
        let excess = updated.len() - keep;
        updated.drain(..excess);
    }
    updated
}

async fn next_row(rows: &mut libsql::Rows) -> Result<Option<libsql::Row>> {
    rows.next()
        .await
        .map_err(|e| Error::Store(format!("row read failed: {}", e)))
}

fn row_to_user(row: &libsql::Row) -> Result<User> {
    let read = |field: &str, e: libsql::Error| Error::Store(format!("user {}: {}", field, e));

    let id_str: String = row.get(0).map_err(|e| read("id", e))?;
    let username: String = row.get(1).map_err(|e| read("username", e))?;
    let password_hash: String = row.get(2).map_err(|e| read("password_hash", e))?;
    let full_name: String = row.get(3).map_err(|e| read("full_name", e))?;
    let role_str: String = row.get(4).map_err(|e| read("role", e))?;
    let is_active: i64 = row.get(5).map_err(|e| read("is_active", e))?;
    let must_change: i64 = row.get(6).map_err(|e| read("must_change_password", e))?;
    let history_str: String = row.get(7).map_err(|e| read("password_history", e))?;
    let failed_count: i64 = row.get(8).map_err(|e| read("failed_login_count", e))?;
    let locked_until: Option<String> = row.get(9).ok();
    let created_str: String = row.get(10).map_err(|e| read("created_at", e))?;
    let updated_str: String = row.get(11).map_err(|e| read("updated_at", e))?;

    Ok(User {
        id: Uuid::parse_str(&id_str).map_err(|e| Error::Store(format!("bad user id: {}", e)))?,
        username,
        password_hash,
        full_name,
        role: Role::parse(&role_str)
            .ok_or_else(|| Error::Store(format!("unknown role '{}'", role_str)))?,
        is_active: is_active != 0,
        must_change_password: must_change != 0,
        password_history: serde_json::from_str(&history_str).unwrap_or_default(),
        failed_login_count: failed_count.max(0) as u32,
        locked_until: locked_until.map(|s| parse_ts(&s)).transpose()?,
        created_at: parse_ts(&created_str)?,
        updated_at: parse_ts(&updated_str)?,
    })
}

fn row_to_session(row: &libsql::Row) -> Result<Session> {
    let read = |field: &str, e: libsql::Error| Error::Store(format!("session {}: {}", field, e));

    let id_str: String = row.get(0).map_err(|e| read("id", e))?;
    let user_id_str: String = row.get(1).map_err(|e| read("user_id", e))?;
    let token: String = row.get(2).map_err(|e| read("token", e))?;
    let expires_str: String = row.get(3).map_err(|e| read("expires_at", e))?;
    let activity_str: String = row.get(4).map_err(|e| read("last_activity", e))?;
    let client_ip: Option<String> = row.get(5).ok();
    let user_agent: Option<String> = row.get(6).ok();
    let created_str: String = row.get(7).map_err(|e| read("created_at", e))?;

    Ok(Session {
        id: Uuid::parse_str(&id_str)
            .map_err(|e| Error::Store(format!("bad session id: {}", e)))?,
        user_id: Uuid::parse_str(&user_id_str)
            .map_err(|e| Error::Store(format!("bad session user id: {}", e)))?,
        token,
        expires_at: parse_ts(&expires_str)?,
        last_activity: parse_ts(&activity_str)?,
        client_ip,
        user_agent,
        created_at: parse_ts(&created_str)?,
    })
}
