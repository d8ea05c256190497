use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use rollcall_directory::NewGuest;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::ApiError;
use crate::processing::PollStatus;
use crate::services::AsyncCreation;
use crate::state::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

#[derive(Debug, Deserialize)]
pub struct CheckPhoneRequest {
    pub phone: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Unwrap a JSON body, reporting malformed input in the API error shape.
fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))
}

pub async fn check_phone(
    State(state): State<AppState>,
    payload: Result<Json<CheckPhoneRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let req = body(payload)?;
    let check = state.phones.check(&req.phone).await?;
    Ok(Json(json!({
        "success": true,
        "exists": check.exists,
        "userId": check.user_id,
    }))
    .into_response())
}

pub async fn create_guest(
    State(state): State<AppState>,
    payload: Result<Json<NewGuest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let new_guest = body(payload)?;
    let creation = state.guests.create(new_guest).await?;
    let status = if creation.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        Json(json!({
            "success": true,
            "created": creation.created,
            "guest": creation.guest,
        })),
    )
        .into_response())
}

pub async fn create_guest_async(
    State(state): State<AppState>,
    payload: Result<Json<NewGuest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let new_guest = body(payload)?;
    let key = match state.guests.create_async(new_guest).await? {
        AsyncCreation::Existing(guest) => {
            return Ok(Json(json!({
                "success": true,
                "created": false,
                "guest": guest,
            }))
            .into_response());
        }
        AsyncCreation::Submitted(key) | AsyncCreation::InFlight(key) => key,
    };

    let status_url = format!("{}/status/{}", state.base_url, key);
    let mut response = (
        StatusCode::ACCEPTED,
        Json(json!({
            "success": true,
            "processingKey": key,
            "statusUrl": status_url,
        })),
    )
        .into_response();
    if let Ok(location) = HeaderValue::from_str(&status_url) {
        response
            .headers_mut()
            .insert(header::CONTENT_LOCATION, location);
    }
    Ok(response)
}

/// Poll a background creation.
pub async fn processing_status(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Response {
    match state.registry.poll(&key) {
        PollStatus::Processing { elapsed } => (
            StatusCode::ACCEPTED,
            Json(json!({
                "success": true,
                "status": "processing",
                "elapsedMs": elapsed.as_millis() as u64,
            })),
        )
            .into_response(),
        PollStatus::Completed { result, elapsed } => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "status": "completed",
                "result": result,
                "elapsedMs": elapsed.as_millis() as u64,
            })),
        )
            .into_response(),
        PollStatus::Failed { error, elapsed } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "success": false,
                "status": "failed",
                "error": error,
                "elapsedMs": elapsed.as_millis() as u64,
            })),
        )
            .into_response(),
        PollStatus::NotFound => (
            StatusCode::NOT_FOUND,
            Json(json!({ "success": false, "status": "not_found" })),
        )
            .into_response(),
        PollStatus::Expired => (
            StatusCode::REQUEST_TIMEOUT,
            Json(json!({
                "success": false,
                "status": "not_found",
                "error": "processing expired",
            })),
        )
            .into_response(),
    }
}

pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let req = body(payload)?;
    let principal = state.auth.login(&req.email, &req.password).await?;
    Ok(Json(json!({ "success": true, "user": principal.as_ref() })).into_response())
}

pub async fn logout(State(state): State<AppState>) -> impl IntoResponse {
    let outcome = state.auth.logout().await;
    let mut body = json!({ "success": true });
    if let Some(warning) = outcome.warning {
        body["warning"] = json!(warning);
    }
    Json(body)
}

pub async fn me(State(state): State<AppState>) -> Result<Response, ApiError> {
    match state.auth.current().await? {
        Some(principal) => {
            Ok(Json(json!({ "success": true, "user": principal.as_ref() })).into_response())
        }
        None => Err(ApiError::Unauthorized("not signed in".into())),
    }
}

/// Aggregated stats snapshot.
pub async fn metrics_json(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.stats.snapshot())
}

pub async fn metrics_prometheus() -> Response {
    match crate::metrics::render_metrics() {
        Some(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "prometheus exporter not installed",
        )
            .into_response(),
    }
}
