//! User management routes (admin and super_admin)

use axum::{
    extract::{Path, State},
    Extension, Form, Json,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use super::auth::ClientIp;
use crate::auth::{NewUser, UserChanges};
use crate::domain::{Role, User, UserView};
use crate::error::{Error, Result};
use crate::middleware::{verify_csrf_field, CsrfExpectation, CurrentUser};
use crate::policy::{AccessPolicy, Action};
use crate::state::AppState;

fn parse_role(raw: &str) -> Result<Role> {
    Role::parse(raw).ok_or_else(|| Error::Validation(format!("Unknown role '{}'", raw)))
}

async fn load_target(state: &AppState, id: Uuid) -> Result<User> {
    let conn = state.read_handle()?;
    state
        .identity
        .user_by_id(&conn, id)
        .await?
        .ok_or_else(|| Error::NotFound("User not found".into()))
}

/// `GET /admin/users`
pub async fn list(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<Json<serde_json::Value>> {
    AccessPolicy::decide(&current.user, Action::ListUsers).require()?;
    let conn = state.read_handle()?;
    let users: Vec<UserView> = state
        .identity
        .list_users(&conn)
        .await?
        .iter()
        .map(User::view)
        .collect();
    Ok(Json(json!({ "users": users })))
}

/// `GET /admin/users/new`
pub async fn new_form(current: CurrentUser) -> Result<Json<serde_json::Value>> {
    AccessPolicy::decide(&current.user, Action::ListUsers).require()?;
    Ok(Json(json!({ "page": "user_new" })))
}

#[derive(Debug, Deserialize)]
pub struct NewUserForm {
    pub username: String,
    pub password: String,
    pub full_name: String,
    pub role: String,
    #[serde(default)]
    pub csrf_token: Option<String>,
}

/// `POST /admin/users/new`
pub async fn create(
    State(state): State<AppState>,
    current: CurrentUser,
    expectation: Option<Extension<CsrfExpectation>>,
    client_ip: ClientIp,
    Form(form): Form<NewUserForm>,
) -> Result<Json<serde_json::Value>> {
    verify_csrf_field(
        expectation.as_ref().map(|Extension(e)| e),
        form.csrf_token.as_deref(),
    )?;

    let role = parse_role(&form.role)?;
    AccessPolicy::decide(&current.user, Action::CreateUser { role }).require()?;

    let user = state
        .identity
        .create_user(
            &current.user,
            NewUser {
                username: form.username,
                password: form.password,
                full_name: form.full_name,
                role,
            },
            client_ip.0,
        )
        .await?;

    Ok(Json(json!({ "success": true, "user": user.view() })))
}

/// `GET /admin/users/{id}/edit`
pub async fn edit_form(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>> {
    let target = load_target(&state, id).await?;
    AccessPolicy::decide(&current.user, Action::EditUser { target: &target }).require()?;
    Ok(Json(json!({ "page": "user_edit", "user": target.view() })))
}

#[derive(Debug, Deserialize)]
pub struct EditUserForm {
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub csrf_token: Option<String>,
}

/// `PUT /admin/users/{id}/edit`
pub async fn edit(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<Uuid>,
    expectation: Option<Extension<CsrfExpectation>>,
    client_ip: ClientIp,
    Form(form): Form<EditUserForm>,
) -> Result<Json<serde_json::Value>> {
    verify_csrf_field(
        expectation.as_ref().map(|Extension(e)| e),
        form.csrf_token.as_deref(),
    )?;

    let target = load_target(&state, id).await?;
    AccessPolicy::decide(&current.user, Action::EditUser { target: &target }).require()?;

    let role = form.role.as_deref().map(parse_role).transpose()?;
    if let Some(new_role) = role {
        if new_role != target.role {
            AccessPolicy::decide(
                &current.user,
                Action::ChangeUserRole {
                    target: &target,
                    new_role,
                },
            )
            .require()?;
        }
    }
    if form.is_active == Some(false) {
        AccessPolicy::decide(&current.user, Action::DeactivateUser { target: &target })
            .require()?;
    }

    state
        .identity
        .update_user(
            &current.user,
            &target,
            UserChanges {
                full_name: form.full_name,
                role: role.filter(|r| *r != target.role),
                is_active: form.is_active,
            },
            client_ip.0,
        )
        .await?;

    let updated = load_target(&state, id).await?;
    Ok(Json(json!({ "success": true, "user": updated.view() })))
}

#[derive(Debug, Deserialize)]
pub struct CsrfOnlyForm {
    #[serde(default)]
    pub csrf_token: Option<String>,
}

/// `POST /admin/users/{id}/deactivate`
pub async fn deactivate(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<Uuid>,
    expectation: Option<Extension<CsrfExpectation>>,
    client_ip: ClientIp,
    Form(form): Form<CsrfOnlyForm>,
) -> Result<Json<serde_json::Value>> {
    verify_csrf_field(
        expectation.as_ref().map(|Extension(e)| e),
        form.csrf_token.as_deref(),
    )?;

    let target = load_target(&state, id).await?;
    AccessPolicy::decide(&current.user, Action::DeactivateUser { target: &target }).require()?;

    state
        .identity
        .deactivate_user(&current.user, &target, client_ip.0)
        .await?;
    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordForm {
    pub new_password: String,
    #[serde(default)]
    pub csrf_token: Option<String>,
}

/// `POST /admin/users/{id}/password` — reset; forces a change at next login
pub async fn reset_password(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<Uuid>,
    expectation: Option<Extension<CsrfExpectation>>,
    client_ip: ClientIp,
    Form(form): Form<ResetPasswordForm>,
) -> Result<Json<serde_json::Value>> {
    verify_csrf_field(
        expectation.as_ref().map(|Extension(e)| e),
        form.csrf_token.as_deref(),
    )?;

    let target = load_target(&state, id).await?;
    AccessPolicy::decide(
        &current.user,
        Action::ResetUserPassword { target: &target },
    )
    .require()?;

    state
        .identity
        .admin_reset_password(&current.user, &target, &form.new_password, client_ip.0)
        .await?;
    Ok(Json(json!({ "success": true })))
}
