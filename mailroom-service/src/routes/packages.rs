//! Package routes: dashboard, search, registration, lifecycle, stickers

use axum::{
    extract::{Multipart, Path, Query, State},
    Extension, Form, Json,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use super::auth::ClientIp;
use crate::domain::PackageStatus;
use crate::error::{Error, Result};
use crate::middleware::{verify_csrf_field, CsrfExpectation, CurrentUser};
use crate::packages::{NewPackage, PackageSearch, UploadedFile};
use crate::policy::{AccessPolicy, Action};
use crate::settings;
use crate::state::AppState;
use crate::util::parse_ts;

/// `GET /dashboard`
pub async fn dashboard(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<Json<serde_json::Value>> {
    AccessPolicy::decide(&current.user, Action::ViewDashboard).require()?;
    let conn = state.read_handle()?;
    let summary = state.packages.dashboard_summary(&conn).await?;
    Ok(Json(json!({ "summary": summary })))
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub q: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub limit: Option<u32>,
}

impl SearchParams {
    fn into_search(self) -> Result<PackageSearch> {
        let status = match self.status.as_deref().filter(|s| !s.is_empty()) {
            Some(raw) => Some(
                PackageStatus::parse(raw)
                    .ok_or_else(|| Error::Validation(format!("Unknown status '{}'", raw)))?,
            ),
            None => None,
        };
        let from = self
            .from
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(parse_date_bound)
            .transpose()?;
        let to = self
            .to
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(parse_date_bound)
            .transpose()?;

        Ok(PackageSearch {
            query: self.q,
            status,
            department: self.department,
            from,
            to,
            page: self.page.unwrap_or(1),
            limit: self.limit.unwrap_or(0),
        })
    }
}

/// Accept either a date (`2026-08-01`) or a full RFC 3339 timestamp
fn parse_date_bound(raw: &str) -> Result<chrono::DateTime<chrono::Utc>> {
    if let Ok(date) = raw.parse::<chrono::NaiveDate>() {
        return Ok(date
            .and_hms_opt(0, 0, 0)
            .expect("midnight is always valid")
            .and_utc());
    }
    parse_ts(raw).map_err(|_| Error::Validation(format!("Invalid date '{}'", raw)))
}

/// `GET /packages`
pub async fn list(
    State(state): State<AppState>,
    current: CurrentUser,
    Query(params): Query<SearchParams>,
) -> Result<Json<serde_json::Value>> {
    AccessPolicy::decide(&current.user, Action::SearchPackages).require()?;
    let conn = state.read_handle()?;
    let results = state.packages.search(&conn, &params.into_search()?).await?;
    Ok(Json(json!({ "packages": results })))
}

/// `GET /packages/new` — form payload: the active recipient directory
pub async fn new_form(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<Json<serde_json::Value>> {
    AccessPolicy::decide(&current.user, Action::RegisterPackage).require()?;
    let conn = state.read_handle()?;
    let recipients = state.packages.list_recipients(&conn, false).await?;
    Ok(Json(json!({ "page": "package_new", "recipients": recipients })))
}

/// `POST /packages/new` — multipart: fields plus an optional photo
pub async fn register(
    State(state): State<AppState>,
    current: CurrentUser,
    expectation: Option<Extension<CsrfExpectation>>,
    client_ip: ClientIp,
    mut multipart: Multipart,
) -> Result<Json<serde_json::Value>> {
    AccessPolicy::decide(&current.user, Action::RegisterPackage).require()?;

    let mut tracking_no = None;
    let mut carrier = None;
    let mut recipient_id = None;
    let mut notes = None;
    let mut csrf_token = None;
    let mut photo = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::Validation(format!("Malformed upload: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "tracking_no" => tracking_no = Some(read_text(field).await?),
            "carrier" => carrier = Some(read_text(field).await?),
            "recipient_id" => recipient_id = Some(read_text(field).await?),
            "notes" => notes = Some(read_text(field).await?),
            "csrf_token" => csrf_token = Some(read_text(field).await?),
            "photo" => {
                let filename = field.file_name().unwrap_or("upload").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| Error::Validation(format!("Malformed upload: {}", e)))?;
                if !bytes.is_empty() {
                    photo = Some(UploadedFile {
                        filename,
                        bytes: bytes.to_vec(),
                    });
                }
            }
            _ => {}
        }
    }

    verify_csrf_field(
        expectation.as_ref().map(|Extension(e)| e),
        csrf_token.as_deref(),
    )?;

    let recipient_id = recipient_id
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::Validation("Recipient is required".into()))
        .and_then(|raw| {
            Uuid::parse_str(raw).map_err(|_| Error::Validation("Recipient is invalid".into()))
        })?;

    let conn = state.read_handle()?;
    let package = state
        .packages
        .register(
            &conn,
            &current.user,
            NewPackage {
                tracking_no: tracking_no.unwrap_or_default(),
                carrier: carrier.unwrap_or_default(),
                recipient_id,
                notes,
            },
            photo,
            client_ip.0,
        )
        .await?;

    Ok(Json(json!({
        "success": true,
        "package": package,
        "redirect_url": format!("/packages/{}", package.id),
    })))
}

async fn read_text(field: axum::extract::multipart::Field<'_>) -> Result<String> {
    field
        .text()
        .await
        .map_err(|e| Error::Validation(format!("Malformed form field: {}", e)))
}

/// `GET /packages/{id}`
pub async fn detail(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>> {
    AccessPolicy::decide(&current.user, Action::SearchPackages).require()?;
    let conn = state.read_handle()?;

    let package = state
        .packages
        .package_by_id(&conn, id)
        .await?
        .ok_or_else(|| Error::NotFound("Package not found".into()))?;
    let recipient = state.packages.recipient_by_id(&conn, package.recipient_id).await?;
    let timeline = state.packages.timeline(&conn, id).await?;
    let attachments = state.packages.attachments_for(&conn, id).await?;

    Ok(Json(json!({
        "package": package,
        "recipient": recipient,
        "timeline": timeline,
        "attachments": attachments,
    })))
}

#[derive(Debug, Deserialize)]
pub struct StatusForm {
    pub status: String,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub csrf_token: Option<String>,
}

/// `POST /packages/{id}/status`
pub async fn change_status(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<Uuid>,
    expectation: Option<Extension<CsrfExpectation>>,
    client_ip: ClientIp,
    Form(form): Form<StatusForm>,
) -> Result<Json<serde_json::Value>> {
    AccessPolicy::decide(&current.user, Action::UpdatePackageStatus).require()?;
    verify_csrf_field(
        expectation.as_ref().map(|Extension(e)| e),
        form.csrf_token.as_deref(),
    )?;

    let new_status = PackageStatus::parse(&form.status)
        .ok_or_else(|| Error::Validation(format!("Unknown status '{}'", form.status)))?;

    let conn = state.read_handle()?;
    let package = state
        .packages
        .change_status(&conn, &current.user, id, new_status, form.notes, client_ip.0)
        .await?;

    Ok(Json(json!({ "success": true, "package": package })))
}

/// `POST /packages/{id}/photo`
pub async fn add_photo(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<Uuid>,
    expectation: Option<Extension<CsrfExpectation>>,
    mut multipart: Multipart,
) -> Result<Json<serde_json::Value>> {
    AccessPolicy::decide(&current.user, Action::UpdatePackageStatus).require()?;

    let mut csrf_token = None;
    let mut photo = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::Validation(format!("Malformed upload: {}", e)))?
    {
        match field.name().unwrap_or_default() {
            "csrf_token" => csrf_token = Some(read_text(field).await?),
            "photo" => {
                let filename = field.file_name().unwrap_or("upload").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| Error::Validation(format!("Malformed upload: {}", e)))?;
                photo = Some(UploadedFile {
                    filename,
                    bytes: bytes.to_vec(),
                });
            }
            _ => {}
        }
    }

    verify_csrf_field(
        expectation.as_ref().map(|Extension(e)| e),
        csrf_token.as_deref(),
    )?;

    let photo = photo.ok_or_else(|| Error::Validation("Photo is required".into()))?;
    let conn = state.read_handle()?;
    let attachment = state
        .packages
        .add_photo(&conn, &current.user, id, photo)
        .await?;

    Ok(Json(json!({ "success": true, "attachment": attachment })))
}

/// `GET /packages/{id}/qrcode/download` and `GET /packages/{id}/qrcode/print`
///
/// The core contributes the deep-link payload; rasterization is the QR
/// collaborator's concern.
pub async fn qrcode(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>> {
    AccessPolicy::decide(&current.user, Action::SearchPackages).require()?;
    let conn = state.read_handle()?;

    let package = state
        .packages
        .package_by_id(&conn, id)
        .await?
        .ok_or_else(|| Error::NotFound("Package not found".into()))?;

    let base_url = state
        .settings
        .get(&conn, settings::QR_BASE_URL)
        .await?;
    let deep_link = match &base_url {
        Some(base) => format!("{}/packages/{}", base, package.id),
        None => format!("/packages/{}", package.id),
    };

    Ok(Json(json!({
        "package_id": package.id,
        "tracking_no": package.tracking_no,
        "deep_link": deep_link,
        "base_url_configured": base_url.is_some(),
    })))
}
