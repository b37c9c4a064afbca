//! Health & readiness handlers.
//!
//! - GET /health/live    -> liveness, never touches I/O
//! - GET /health/ready   -> checks SQLite connectivity and disk I/O
//! - GET /health/startup -> start time and uptime once serving

use crate::AppState;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use tokio::fs;
use uuid::Uuid;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StartupResponse {
    status: &'static str,
    started_at: DateTime<Utc>,
    uptime_secs: i64,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: &'static str,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}

impl CheckStatus {
    fn from_result(result: Result<(), String>) -> Self {
        match result {
            Ok(()) => Self { ok: true, error: None },
            Err(error) => Self {
                ok: false,
                error: Some(error),
            },
        }
    }
}

/// `GET /health/live`
pub async fn live() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

/// `GET /health/startup`
pub async fn startup(State(state): State<AppState>) -> impl IntoResponse {
    let started_at = state.stats.started_at();
    Json(StartupResponse {
        status: "ok",
        started_at,
        uptime_secs: (Utc::now() - started_at).num_seconds(),
    })
}

async fn check_sqlite(state: &AppState) -> Result<(), String> {
    match sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(&*state.db)
        .await
    {
        Ok(1) => Ok(()),
        Ok(v) => Err(format!("unexpected result: {}", v)),
        Err(e) => Err(format!("error: {}", e)),
    }
}

/// Write, read back and delete a probe file in the temp directory.
async fn check_disk(state: &AppState) -> Result<(), String> {
    let probe = state
        .config
        .tmp_dir()
        .join(format!(".ready-{}", Uuid::new_v4()));

    let result = async {
        fs::write(&probe, b"ready")
            .await
            .map_err(|e| format!("could not write probe file: {}", e))?;
        let bytes = fs::read(&probe)
            .await
            .map_err(|e| format!("could not read probe file: {}", e))?;
        if bytes != b"ready" {
            return Err("probe file content mismatch".to_string());
        }
        Ok::<(), String>(())
    }
    .await;

    if let Err(e) = fs::remove_file(&probe).await {
        if result.is_ok() {
            tracing::warn!("could not remove probe file: {}", e);
        }
    }
    result
}

/// `GET /health/ready`
///
/// HTTP 200 when every check passes, 503 otherwise.
pub async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    let sqlite = CheckStatus::from_result(check_sqlite(&state).await);
    let disk = CheckStatus::from_result(check_disk(&state).await);
    let overall_ok = sqlite.ok && disk.ok;

    let mut checks = HashMap::new();
    checks.insert("sqlite", sqlite);
    checks.insert("disk", disk);

    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(ReadyResponse {
            status: if overall_ok { "ok" } else { "error" },
            checks,
        }),
    )
}
