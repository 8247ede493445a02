//! Recipient directory routes shared by all roles

use axum::{
    extract::{Query, State},
    http::header,
    response::{Html, IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;

use crate::error::Result;
use crate::middleware::CurrentUser;
use crate::policy::{AccessPolicy, Action};
use crate::state::AppState;

/// `GET /recipients` — active directory listing
pub async fn list(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<Json<serde_json::Value>> {
    AccessPolicy::decide(&current.user, Action::SearchPackages).require()?;
    let conn = state.read_handle()?;
    let recipients = state.packages.list_recipients(&conn, false).await?;
    Ok(Json(json!({ "recipients": recipients })))
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub q: String,
    #[serde(default)]
    pub limit: Option<u32>,
}

/// `GET /recipients/search` — typeahead, content-negotiated
///
/// JSON array for `Accept: application/json`, otherwise an HTML partial for
/// the form's dropdown.
pub async fn search(
    State(state): State<AppState>,
    current: CurrentUser,
    headers: axum::http::HeaderMap,
    Query(params): Query<SearchParams>,
) -> Result<Response> {
    AccessPolicy::decide(&current.user, Action::SearchPackages).require()?;
    let conn = state.read_handle()?;
    let recipients = state
        .packages
        .search_recipients(&conn, &params.q, params.limit.unwrap_or(10))
        .await?;

    let wants_json = headers
        .get(header::ACCEPT)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|accept| accept.contains("application/json"));

    if wants_json {
        return Ok(Json(recipients).into_response());
    }

    let mut partial = String::from("<ul class=\"recipient-results\">");
    for recipient in &recipients {
        partial.push_str(&format!(
            "<li data-id=\"{}\">{} — {}</li>",
            recipient.id,
            html_escape(&recipient.name),
            html_escape(&recipient.department),
        ));
    }
    partial.push_str("</ul>");
    Ok(Html(partial).into_response())
}

fn html_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
