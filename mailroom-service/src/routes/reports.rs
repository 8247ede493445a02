//! Reporting routes (admin and super_admin)

use axum::{
    extract::{Query, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;

use super::auth::ClientIp;
use crate::audit::{AuditRecord, AuthEventKind};
use crate::error::{Error, Result};
use crate::middleware::CurrentUser;
use crate::packages::ReportRow;
use crate::policy::{AccessPolicy, Action};
use crate::state::AppState;
use crate::util::parse_ts;

#[derive(Debug, Default, Deserialize)]
pub struct ReportParams {
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
}

impl ReportParams {
    fn bounds(
        &self,
    ) -> Result<(
        Option<chrono::DateTime<chrono::Utc>>,
        Option<chrono::DateTime<chrono::Utc>>,
    )> {
        let parse = |raw: &str| -> Result<chrono::DateTime<chrono::Utc>> {
            if let Ok(date) = raw.parse::<chrono::NaiveDate>() {
                return Ok(date
                    .and_hms_opt(0, 0, 0)
                    .expect("midnight is always valid")
                    .and_utc());
            }
            parse_ts(raw).map_err(|_| Error::Validation(format!("Invalid date '{}'", raw)))
        };
        let from = self
            .from
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(parse)
            .transpose()?;
        let to = self
            .to
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(parse)
            .transpose()?;
        Ok((from, to))
    }
}

/// `GET /admin/reports`
pub async fn page(current: CurrentUser) -> Result<Json<serde_json::Value>> {
    AccessPolicy::decide(&current.user, Action::ViewReports).require()?;
    Ok(Json(json!({ "page": "reports" })))
}

/// `GET /admin/reports/preview`
pub async fn preview(
    State(state): State<AppState>,
    current: CurrentUser,
    Query(params): Query<ReportParams>,
) -> Result<Json<serde_json::Value>> {
    AccessPolicy::decide(&current.user, Action::ViewReports).require()?;
    let (from, to) = params.bounds()?;
    let conn = state.read_handle()?;
    let rows = state.packages.report_rows(&conn, from, to).await?;
    Ok(Json(json!({ "rows": rows, "count": rows.len() })))
}

/// `GET /admin/reports/export` — CSV download
pub async fn export(
    State(state): State<AppState>,
    current: CurrentUser,
    client_ip: ClientIp,
    Query(params): Query<ReportParams>,
) -> Result<Response> {
    AccessPolicy::decide(&current.user, Action::ExportReports).require()?;
    let (from, to) = params.bounds()?;
    let conn = state.read_handle()?;
    let rows = state.packages.report_rows(&conn, from, to).await?;

    state.audit.record(
        AuthEventKind::ExportGenerated,
        AuditRecord::for_user(current.user.id)
            .with_username(&current.user.username)
            .with_ip(client_ip.0)
            .with_detail(json!({ "rows": rows.len(), "format": "csv" })),
    );

    let csv = render_csv(&rows);
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"packages-report.csv\"",
            ),
        ],
        csv,
    )
        .into_response())
}

fn render_csv(rows: &[ReportRow]) -> String {
    let mut out = String::from(
        "tracking_no,carrier,status,recipient_name,department,created_at,updated_at\n",
    );
    for row in rows {
        out.push_str(&format!(
            "{},{},{},{},{},{},{}\n",
            csv_field(&row.tracking_no),
            csv_field(&row.carrier),
            row.status,
            csv_field(&row.recipient_name),
            csv_field(&row.department),
            row.created_at,
            row.updated_at,
        ));
    }
    out
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
