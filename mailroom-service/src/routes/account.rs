//! Routes for the signed-in user's own account

use axum::{
    extract::{Path, State},
    Extension, Form, Json,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::middleware::{verify_csrf_field, CsrfExpectation, CurrentUser};
use crate::state::AppState;

/// `GET /auth/me`
pub async fn me(current: CurrentUser) -> Json<serde_json::Value> {
    Json(json!({ "user": current.user.view() }))
}

/// `GET /me/profile`
pub async fn profile(current: CurrentUser) -> Json<serde_json::Value> {
    Json(json!({
        "user": current.user.view(),
        "session": {
            "created_at": current.session.created_at,
            "last_activity": current.session.last_activity,
        },
    }))
}

/// `GET /me/password` and `GET /me/force-password-change`
pub async fn password_page(current: CurrentUser) -> Json<serde_json::Value> {
    Json(json!({
        "page": "password_change",
        "forced": current.user.must_change_password,
    }))
}

#[derive(Debug, Deserialize)]
pub struct PasswordChangeForm {
    pub current_password: String,
    pub new_password: String,
    #[serde(default)]
    pub csrf_token: Option<String>,
}

/// `POST /me/password` and `POST /me/force-password-change`
pub async fn change_password(
    State(state): State<AppState>,
    current: CurrentUser,
    expectation: Option<Extension<CsrfExpectation>>,
    Form(form): Form<PasswordChangeForm>,
) -> Result<Json<serde_json::Value>> {
    verify_csrf_field(
        expectation.as_ref().map(|Extension(e)| e),
        form.csrf_token.as_deref(),
    )?;

    state
        .identity
        .change_password(
            &current.user,
            &form.current_password,
            &form.new_password,
            current.ip(),
        )
        .await?;

    Ok(Json(json!({ "success": true, "redirect_url": "/dashboard" })))
}

/// `GET /me/sessions` — active sessions, tokens never included
pub async fn sessions(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<Json<serde_json::Value>> {
    let conn = state.read_handle()?;
    let sessions = state
        .identity
        .sessions_for_user(&conn, current.user.id)
        .await?;

    let listed: Vec<serde_json::Value> = sessions
        .iter()
        .map(|s| {
            json!({
                "id": s.id,
                "created_at": s.created_at,
                "last_activity": s.last_activity,
                "expires_at": s.expires_at,
                "client_ip": s.client_ip,
                "user_agent": s.user_agent,
                "current": s.id == current.session.id,
            })
        })
        .collect();

    Ok(Json(json!({ "sessions": listed })))
}

#[derive(Debug, Deserialize)]
pub struct TerminateForm {
    #[serde(default)]
    pub csrf_token: Option<String>,
}

/// `POST /me/sessions/{id}/terminate`
pub async fn terminate_session(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(session_id): Path<Uuid>,
    expectation: Option<Extension<CsrfExpectation>>,
    Form(form): Form<TerminateForm>,
) -> Result<Json<serde_json::Value>> {
    verify_csrf_field(
        expectation.as_ref().map(|Extension(e)| e),
        form.csrf_token.as_deref(),
    )?;

    if session_id == current.session.id {
        return Err(Error::Validation(
            "Use logout to end the current session".into(),
        ));
    }

    state
        .identity
        .terminate_session(&current.user, session_id)
        .await?;
    Ok(Json(json!({ "success": true })))
}
