//! Manager HTTP surface.
//!
//! Thin JSON endpoints over the refresh coordinator. Bodies are parsed
//! and validated here so a malformed request never reaches the fetch
//! pipeline; callers always receive `{"status": ..}` JSON.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};
use tracing::{info, warn};

use super::AppState;
use crate::events::ChangeEvent;
use crate::refresh::RefreshReport;
use crate::types::SdkKeysPayload;
use crate::{GjallarhornError, Result};

/// `GET /` — health probe.
pub(crate) async fn health() -> Json<Value> {
    Json(json!({"status": "ok", "version": env!("CARGO_PKG_VERSION")}))
}

/// `POST /datafile_update` — force-refresh the listed keys and register
/// them; keys not listed are left alone. Changed documents are
/// broadcast.
pub(crate) async fn datafile_update(State(state): State<AppState>, body: String) -> Json<Value> {
    let payload = match parse_payload(&body) {
        Ok(payload) => payload,
        Err(error) => return Json(error_body(&error)),
    };
    info!(keys = ?payload.sdk_keys, "datafile_update request");
    let report = state.coordinator.update(payload.sdk_keys).await;
    Json(report_body(&report))
}

/// `POST /datafile_full_refresh` — evict the active set's records,
/// replace the set with the listed keys, and refresh them all.
pub(crate) async fn datafile_full_refresh(
    State(state): State<AppState>,
    body: String,
) -> Json<Value> {
    let payload = match parse_payload(&body) {
        Ok(payload) => payload,
        Err(error) => return Json(error_body(&error)),
    };
    info!(keys = ?payload.sdk_keys, "datafile_full_refresh request");
    let report = state.coordinator.full_refresh(payload.sdk_keys).await;
    Json(report_body(&report))
}

/// `POST /update_sdk_keys` — replace the active key set and broadcast
/// the new list. No fetching; subscribers pull the documents
/// themselves.
pub(crate) async fn update_sdk_keys(State(state): State<AppState>, body: String) -> Json<Value> {
    let payload = match parse_payload(&body) {
        Ok(payload) => payload,
        Err(error) => return Json(error_body(&error)),
    };
    let keys = state.active.replace(payload.sdk_keys);
    info!(keys = ?keys, "update_sdk_keys request");
    state.bus.publish(ChangeEvent::KeysChanged { keys: keys.clone() });
    Json(json!({"status": "success", "registered_keys": keys}))
}

/// `GET /datafile/json/:key` — cached document for a key, fetched on
/// demand when absent. Lazy fetches do not touch the active key set.
pub(crate) async fn datafile_json(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Response {
    match state.coordinator.refresh(&key, false).await {
        Ok(record) => Json(record.document.clone()).into_response(),
        Err(error) => {
            warn!(key, %error, "datafile lookup failed");
            (
                StatusCode::NOT_FOUND,
                Json(json!({
                    "status": "failed",
                    "message": "The specified SDK datafile key is not registered in this server.",
                })),
            )
                .into_response()
        }
    }
}

fn parse_payload(body: &str) -> Result<SdkKeysPayload> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| GjallarhornError::Validation(format!("invalid JSON body: {e}")))?;
    SdkKeysPayload::parse(&value)
}

fn error_body(error: &GjallarhornError) -> Value {
    json!({"status": "error", "message": error.to_string()})
}

/// Per-key outcomes folded into the response body: `success` when every
/// key refreshed, `partial` with the failures spelled out otherwise.
fn report_body(report: &RefreshReport) -> Value {
    let failed = report.failed();
    if failed.is_empty() {
        json!({"status": "success", "updated_datafiles": report.succeeded()})
    } else {
        let failures: serde_json::Map<String, Value> = failed
            .into_iter()
            .map(|(key, message)| (key, Value::String(message)))
            .collect();
        json!({
            "status": "partial",
            "updated_datafiles": report.succeeded(),
            "failed_datafiles": failures,
        })
    }
}
