//! Recipient management routes (admin and super_admin)
//!
//! CSV parsing happens in the import collaborator; these routes receive rows
//! already split into fields.

use axum::{
    extract::{Path, State},
    Extension, Form, Json,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use super::auth::ClientIp;
use crate::error::Result;
use crate::middleware::{verify_csrf_field, CsrfExpectation, CurrentUser};
use crate::packages::{ImportRow, NewRecipient, RecipientChanges};
use crate::policy::{AccessPolicy, Action};
use crate::state::AppState;

/// `GET /admin/recipients` — full directory, inactive included
pub async fn list(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<Json<serde_json::Value>> {
    AccessPolicy::decide(&current.user, Action::ManageRecipients).require()?;
    let conn = state.read_handle()?;
    let recipients = state.packages.list_recipients(&conn, true).await?;
    Ok(Json(json!({ "recipients": recipients })))
}

/// `GET /admin/recipients/new`
pub async fn new_form(current: CurrentUser) -> Result<Json<serde_json::Value>> {
    AccessPolicy::decide(&current.user, Action::ManageRecipients).require()?;
    Ok(Json(json!({ "page": "recipient_new" })))
}

#[derive(Debug, Deserialize)]
pub struct NewRecipientForm {
    pub employee_id: String,
    pub name: String,
    pub email: String,
    pub department: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub csrf_token: Option<String>,
}

/// `POST /admin/recipients/new`
pub async fn create(
    State(state): State<AppState>,
    current: CurrentUser,
    expectation: Option<Extension<CsrfExpectation>>,
    client_ip: ClientIp,
    Form(form): Form<NewRecipientForm>,
) -> Result<Json<serde_json::Value>> {
    AccessPolicy::decide(&current.user, Action::ManageRecipients).require()?;
    verify_csrf_field(
        expectation.as_ref().map(|Extension(e)| e),
        form.csrf_token.as_deref(),
    )?;

    let recipient = state
        .packages
        .create_recipient(
            &current.user,
            NewRecipient {
                employee_id: form.employee_id,
                name: form.name,
                email: form.email,
                department: form.department,
                phone: form.phone,
                location: form.location,
            },
            client_ip.0,
        )
        .await?;

    Ok(Json(json!({ "success": true, "recipient": recipient })))
}

/// `GET /admin/recipients/{id}/edit`
pub async fn edit_form(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>> {
    AccessPolicy::decide(&current.user, Action::ManageRecipients).require()?;
    let conn = state.read_handle()?;
    let recipient = state
        .packages
        .recipient_by_id(&conn, id)
        .await?
        .ok_or_else(|| crate::error::Error::NotFound("Recipient not found".into()))?;
    Ok(Json(json!({ "page": "recipient_edit", "recipient": recipient })))
}

#[derive(Debug, Default, Deserialize)]
pub struct EditRecipientForm {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub csrf_token: Option<String>,
}

/// `POST|PUT /admin/recipients/{id}/edit` — employee_id stays immutable
pub async fn edit(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<Uuid>,
    expectation: Option<Extension<CsrfExpectation>>,
    client_ip: ClientIp,
    Form(form): Form<EditRecipientForm>,
) -> Result<Json<serde_json::Value>> {
    AccessPolicy::decide(&current.user, Action::ManageRecipients).require()?;
    verify_csrf_field(
        expectation.as_ref().map(|Extension(e)| e),
        form.csrf_token.as_deref(),
    )?;

    let conn = state.read_handle()?;
    let recipient = state
        .packages
        .update_recipient(
            &conn,
            &current.user,
            id,
            RecipientChanges {
                name: form.name,
                email: form.email,
                department: form.department,
                phone: form.phone,
                location: form.location,
            },
            client_ip.0,
        )
        .await?;

    Ok(Json(json!({ "success": true, "recipient": recipient })))
}

#[derive(Debug, Deserialize)]
pub struct CsrfOnlyForm {
    #[serde(default)]
    pub csrf_token: Option<String>,
}

/// `POST /admin/recipients/{id}/deactivate`
pub async fn deactivate(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<Uuid>,
    expectation: Option<Extension<CsrfExpectation>>,
    client_ip: ClientIp,
    Form(form): Form<CsrfOnlyForm>,
) -> Result<Json<serde_json::Value>> {
    AccessPolicy::decide(&current.user, Action::ManageRecipients).require()?;
    verify_csrf_field(
        expectation.as_ref().map(|Extension(e)| e),
        form.csrf_token.as_deref(),
    )?;

    let conn = state.read_handle()?;
    state
        .packages
        .deactivate_recipient(&conn, &current.user, id, client_ip.0)
        .await?;
    Ok(Json(json!({ "success": true })))
}

/// `GET /admin/recipients/import`
pub async fn import_form(current: CurrentUser) -> Result<Json<serde_json::Value>> {
    AccessPolicy::decide(&current.user, Action::ImportRecipients).require()?;
    Ok(Json(json!({ "page": "recipient_import" })))
}

#[derive(Debug, Deserialize)]
pub struct ImportPayload {
    pub rows: Vec<ImportRow>,
    #[serde(default)]
    pub csrf_token: Option<String>,
}

/// `POST /admin/recipients/import/validate` — dry run, nothing written
pub async fn import_validate(
    State(state): State<AppState>,
    current: CurrentUser,
    expectation: Option<Extension<CsrfExpectation>>,
    Json(payload): Json<ImportPayload>,
) -> Result<Json<serde_json::Value>> {
    AccessPolicy::decide(&current.user, Action::ImportRecipients).require()?;
    verify_csrf_field(
        expectation.as_ref().map(|Extension(e)| e),
        payload.csrf_token.as_deref(),
    )?;

    let conn = state.read_handle()?;
    let report = state.packages.preview_import(&conn, payload.rows).await?;
    Ok(Json(json!({ "report": report })))
}

/// `POST /admin/recipients/import/confirm` — apply the import
pub async fn import_confirm(
    State(state): State<AppState>,
    current: CurrentUser,
    expectation: Option<Extension<CsrfExpectation>>,
    client_ip: ClientIp,
    Json(payload): Json<ImportPayload>,
) -> Result<Json<serde_json::Value>> {
    AccessPolicy::decide(&current.user, Action::ImportRecipients).require()?;
    verify_csrf_field(
        expectation.as_ref().map(|Extension(e)| e),
        payload.csrf_token.as_deref(),
    )?;

    let conn = state.read_handle()?;
    let report = state
        .packages
        .import_recipients(&conn, &current.user, payload.rows, client_ip.0)
        .await?;
    Ok(Json(json!({ "success": true, "report": report })))
}
