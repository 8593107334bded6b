use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::TrmnlError;
use crate::image_store::{ImageFormat, StoredUpload};
use crate::responder::{DisplayRequest, DisplayResponse, RequestOrigin, SetupRequest, SetupResponse};
use crate::telemetry::LogBatch;
use crate::SERVICE_NAME;

use super::{AppError, AppState};

/// Device header names (HTTP header names are case-insensitive).
const ID_HEADER: &str = "id";
const MODEL_HEADER: &str = "model";
const FIRMWARE_HEADER: &str = "firmware";
const REFRESH_RATE_HEADER: &str = "refresh_rate";

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
}

/// First hop of a comma-separated forwarding header; proxies append.
fn first_forwarded(headers: &HeaderMap, name: &str) -> Option<String> {
    header_string(headers, name)
        .and_then(|v| v.split(',').next().map(|s| s.trim().to_string()))
        .filter(|s| !s.is_empty())
}

/// Scheme and authority the device used to reach us.
pub fn request_origin(headers: &HeaderMap, tls: bool, fallback_authority: &str) -> RequestOrigin {
    let scheme = first_forwarded(headers, "x-forwarded-proto")
        .unwrap_or_else(|| if tls { "https" } else { "http" }.to_string());
    let authority = first_forwarded(headers, "x-forwarded-host")
        .or_else(|| header_string(headers, header::HOST.as_str()))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| fallback_authority.to_string());
    RequestOrigin::new(scheme, authority)
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "service": SERVICE_NAME }))
}

pub async fn setup(State(state): State<AppState>, headers: HeaderMap) -> Json<SetupResponse> {
    let request = SetupRequest {
        device_id: header_string(&headers, ID_HEADER),
        model: header_string(&headers, MODEL_HEADER),
        firmware: header_string(&headers, FIRMWARE_HEADER),
    };
    Json(state.responder.setup(&request).await)
}

pub async fn display(State(state): State<AppState>, headers: HeaderMap) -> Json<DisplayResponse> {
    let request = DisplayRequest {
        device_id: header_string(&headers, ID_HEADER),
        refresh_rate: header_string(&headers, REFRESH_RATE_HEADER),
    };
    let origin = request_origin(&headers, state.tls, &state.fallback_authority);
    Json(state.responder.display(&request, &origin).await)
}

/// Always acknowledges with 204, whatever the body holds.
pub async fn log(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> StatusCode {
    let batch = LogBatch::parse_lenient(&body);
    let device_id = header_string(&headers, ID_HEADER);
    debug!(entries = batch.logs.len(), "Log batch received");
    state.telemetry.record(device_id.as_deref(), &batch.logs);
    StatusCode::NO_CONTENT
}

pub async fn upload_image(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<StoredUpload>, AppError> {
    // A non-UTF-8 Content-Type is present but unusable; reject it like text/plain.
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .map(|value| value.to_str().unwrap_or_default());
    let upload = state
        .store
        .store(&state.registry, &id, content_type, &body)
        .await?;
    Ok(Json(upload))
}

/// `GET /screens/{id}.{jpg|png}`
pub async fn serve_image(
    State(state): State<AppState>,
    Path(file): Path<String>,
) -> Result<Response, AppError> {
    let (id, format) = file
        .rsplit_once('.')
        .and_then(|(id, ext)| ImageFormat::from_extension(ext).map(|format| (id, format)))
        .ok_or_else(|| TrmnlError::NotFound(file.clone()))?;

    let image = state.store.serve_as(id, format).await?;
    Ok(([(header::CONTENT_TYPE, image.mime_type())], image.bytes).into_response())
}
