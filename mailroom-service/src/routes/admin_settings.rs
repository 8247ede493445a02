//! Super-admin routes: system settings, audit logs, admin dashboard

use axum::{
    extract::{Query, State},
    Extension, Form, Json,
};
use serde::Deserialize;
use serde_json::json;

use super::auth::ClientIp;
use crate::error::Result;
use crate::middleware::{verify_csrf_field, CsrfExpectation, CurrentUser};
use crate::policy::{AccessPolicy, Action};
use crate::settings;
use crate::state::AppState;

/// `GET /admin/dashboard` — admin summary (admin and super_admin)
pub async fn dashboard(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<Json<serde_json::Value>> {
    AccessPolicy::decide(&current.user, Action::ViewReports).require()?;
    let conn = state.read_handle()?;
    let summary = state.packages.dashboard_summary(&conn).await?;
    let recipients = state.packages.list_recipients(&conn, true).await?;
    let active = recipients.iter().filter(|r| r.is_active).count();

    Ok(Json(json!({
        "packages": summary,
        "recipients": {
            "total": recipients.len(),
            "active": active,
        },
        "write_queue_depth": state.queue.depth(),
    })))
}

/// `GET /admin/settings`
pub async fn settings_page(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<Json<serde_json::Value>> {
    AccessPolicy::decide(&current.user, Action::EditSettings).require()?;
    let conn = state.read_handle()?;
    let base_url = state.settings.get(&conn, settings::QR_BASE_URL).await?;
    Ok(Json(json!({
        "page": "settings",
        "qr_base_url": base_url,
    })))
}

#[derive(Debug, Deserialize)]
pub struct QrBaseUrlForm {
    pub qr_base_url: String,
    #[serde(default)]
    pub csrf_token: Option<String>,
}

/// `POST /admin/settings/qr-base-url`
pub async fn set_qr_base_url(
    State(state): State<AppState>,
    current: CurrentUser,
    expectation: Option<Extension<CsrfExpectation>>,
    client_ip: ClientIp,
    Form(form): Form<QrBaseUrlForm>,
) -> Result<Json<serde_json::Value>> {
    AccessPolicy::decide(&current.user, Action::EditSettings).require()?;
    verify_csrf_field(
        expectation.as_ref().map(|Extension(e)| e),
        form.csrf_token.as_deref(),
    )?;

    let conn = state.read_handle()?;
    let stored = state
        .settings
        .set(
            &conn,
            settings::QR_BASE_URL,
            &form.qr_base_url,
            current.user.id,
            &current.user.username,
            client_ip.0,
        )
        .await?;

    Ok(Json(json!({ "success": true, "qr_base_url": stored })))
}

#[derive(Debug, Default, Deserialize)]
pub struct AuditLogParams {
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub limit: Option<u32>,
}

/// `GET /admin/audit-logs`
pub async fn audit_logs(
    State(state): State<AppState>,
    current: CurrentUser,
    Query(params): Query<AuditLogParams>,
) -> Result<Json<serde_json::Value>> {
    AccessPolicy::decide(&current.user, Action::ViewAuditLogs).require()?;
    let conn = state.read_handle()?;
    let events = state
        .audit
        .list_events(&conn, params.page.unwrap_or(1), params.limit.unwrap_or(50))
        .await?;
    Ok(Json(json!({ "events": events })))
}
