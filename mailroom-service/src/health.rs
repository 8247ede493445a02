//! Health check handler

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

use crate::state::AppState;
use crate::util::now_ts;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub version: String,
    pub checks: HealthChecks,
}

#[derive(Debug, Serialize)]
pub struct HealthChecks {
    pub database: CheckResult,
    pub disk_space: CheckResult,
    pub uptime: CheckResult,
}

#[derive(Debug, Serialize)]
pub struct CheckResult {
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CheckResult {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            healthy: true,
            message: Some(message.into()),
        }
    }

    fn failing(message: impl Into<String>) -> Self {
        Self {
            healthy: false,
            message: Some(message.into()),
        }
    }
}

/// `GET /health` — unauthenticated liveness with dependency detail
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let database = check_database(&state).await;
    let disk_space = check_disk(&state);
    let uptime = CheckResult::ok(format!("{}s", state.started_at.elapsed().as_secs()));

    let healthy = database.healthy && disk_space.healthy;
    let response = HealthResponse {
        status: if healthy { "healthy" } else { "degraded" }.to_string(),
        timestamp: now_ts(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        checks: HealthChecks {
            database,
            disk_space,
            uptime,
        },
    };

    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(response))
}

async fn check_database(state: &AppState) -> CheckResult {
    let conn = match state.read_handle() {
        Ok(conn) => conn,
        Err(e) => return CheckResult::failing(format!("no read handle: {}", e)),
    };
    match conn.query("SELECT 1", ()).await {
        Ok(_) => CheckResult::ok(format!("connected, queue depth {}", state.queue.depth())),
        Err(e) => CheckResult::failing(format!("query failed: {}", e)),
    }
}

fn check_disk(state: &AppState) -> CheckResult {
    // A writable upload root is what package photos actually need
    let dir = &state.config.uploads.dir;
    if let Err(e) = std::fs::create_dir_all(dir) {
        return CheckResult::failing(format!("upload dir unavailable: {}", e));
    }
    let probe = dir.join(".health-probe");
    match std::fs::write(&probe, b"ok") {
        Ok(()) => {
            let _ = std::fs::remove_file(&probe);
            CheckResult::ok("writable")
        }
        Err(e) => CheckResult::failing(format!("upload dir not writable: {}", e)),
    }
}
