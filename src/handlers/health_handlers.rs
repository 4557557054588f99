//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that checks DB connectivity and the content store

use crate::{services::content_store::ContentStore, state::AppState};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use bytes::Bytes;
use serde::Serialize;
use std::collections::HashMap;

const PROBE: &[u8] = b"readyz";

/// `GET /healthz`
///
/// Very small liveness probe; always returns 200 OK and never performs I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// Readiness probe that:
/// 1. Runs a lightweight query against SQLite (`SELECT 1`).
/// 2. Puts, reads back and deletes a small blob through the content store.
///
/// HTTP 200 when all checks pass, HTTP 503 when any check fails.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let pool = state.lifecycle.repository().pool();
    let sqlite_check = match sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(pool)
        .await
    {
        Ok(1) => (true, None::<String>),
        Ok(v) => (false, Some(format!("unexpected result: {}", v))),
        Err(e) => (false, Some(format!("error: {}", e))),
    };

    let store = state.lifecycle.content_store();
    let storage_check = match state
        .lifecycle
        .bounded(store.put(Bytes::from_static(PROBE)))
        .await
    {
        Ok(key) => {
            let read = state.lifecycle.bounded(store.get(&key)).await;
            let removed = state.lifecycle.bounded(store.delete(&key)).await;
            match (read, removed) {
                (Err(e), _) => (false, Some(format!("could not read probe: {}", e))),
                (Ok(bytes), _) if bytes.as_ref() != PROBE => {
                    (false, Some("probe content mismatch".to_string()))
                }
                (Ok(_), Err(e)) => (true, Some(format!("could not remove probe: {}", e))),
                (Ok(_), Ok(())) => (true, None),
            }
        }
        Err(e) => (false, Some(format!("could not write probe: {}", e))),
    };

    let overall_ok = sqlite_check.0 && storage_check.0;

    let mut checks = HashMap::new();
    checks.insert(
        "sqlite",
        CheckStatus {
            ok: sqlite_check.0,
            error: sqlite_check.1,
        },
    );
    checks.insert(
        "storage",
        CheckStatus {
            ok: storage_check.0,
            error: storage_check.1,
        },
    );

    let body = ReadyResponse {
        status: if overall_ok {
            "ok".into()
        } else {
            "error".into()
        },
        checks,
    };

    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}
