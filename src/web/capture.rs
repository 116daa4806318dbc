//! Capture endpoint
//!
//! `POST /api/capture` turns one signed report into a profile upsert plus
//! an event insert. Admission control runs in the router layer; the
//! signature gate here is the last check before any state change, so a
//! rejected request never touches the database.

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderMap},
    Json,
};
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use std::{net::SocketAddr, sync::Arc, time::Duration};

use super::AppState;
use crate::db::NewCapture;
use crate::error::ApiError;
use crate::signature;

pub const SIGNATURE_HEADER: &str = "x-api-signature";
pub const TIMESTAMP_HEADER: &str = "x-api-timestamp";

/// Upper bound on capture bodies; anything larger is not a sensor report
const MAX_BODY_BYTES: usize = 1024 * 1024;

#[derive(Debug, Serialize)]
pub struct CaptureResponse {
    pub status: &'static str,
    pub event_id: i64,
}

pub async fn capture(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Json<CaptureResponse>, ApiError> {
    let (parts, body) = request.into_parts();
    let body = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|_| ApiError::BadRequest("request body too large".to_string()))?;

    let claimed_signature = header_str(&parts.headers, SIGNATURE_HEADER);
    let claimed_timestamp = header_str(&parts.headers, TIMESTAMP_HEADER);
    if !signature::verify(
        &state.config.capture.secret,
        claimed_signature,
        claimed_timestamp,
        &body,
        Utc::now().timestamp(),
        state.config.capture.replay_window_secs,
    ) {
        return Err(ApiError::InvalidSignature);
    }

    let fallback_ip = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let ip_address = super::client_ip(&parts.headers, &fallback_ip);
    let user_agent = header_str(&parts.headers, header::USER_AGENT.as_str()).map(str::to_string);

    // Malformed JSON is tolerated: treat it as an empty object and apply
    // the field defaults
    let payload: Value = serde_json::from_slice(&body).unwrap_or_else(|_| json!({}));

    let capture = NewCapture {
        ip_address,
        user_agent,
        method: parts.method.to_string(),
        path: parts.uri.path().to_string(),
        headers: headers_to_json(&parts.headers),
        honeypot_service: payload_str(&payload, "service")
            .unwrap_or_else(|| "web".to_string()),
        signature: payload_str(&payload, "signature"),
        severity: payload_str(&payload, "severity").unwrap_or_else(|| "low".to_string()),
        payload,
    };

    let deadline = Duration::from_secs(state.config.capture.timeout_secs);
    let event_id = tokio::time::timeout(deadline, state.db.record_capture(&capture))
        .await
        .map_err(|_| ApiError::Timeout)??;

    tracing::info!(
        ip = %capture.ip_address,
        service = %capture.honeypot_service,
        severity = %capture.severity,
        event_id,
        "capture stored"
    );

    Ok(Json(CaptureResponse {
        status: "ok",
        event_id,
    }))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn payload_str(payload: &Value, key: &str) -> Option<String> {
    payload
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn headers_to_json(headers: &HeaderMap) -> Value {
    Value::Object(
        headers
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    Value::String(value.to_str().unwrap_or("<binary>").to_string()),
                )
            })
            .collect(),
    )
}
