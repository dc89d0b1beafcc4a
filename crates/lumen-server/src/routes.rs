//! JSON and binary HTTP handlers around the core.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::warn;

use lumen_common::events::{ChatEvent, Topic};
use lumen_common::id::UserId;
use lumen_core::hardware::with_deadline;
use lumen_core::{SettingsPatch, StoredPhoto, GRACE_PERIOD};

use crate::state::SharedState;

/// GET /api/health
pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserParams {
    user_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeakRequest {
    user_id: String,
    text: String,
}

/// POST /api/speak
pub async fn speak(
    State(state): State<SharedState>,
    Json(request): Json<SpeakRequest>,
) -> impl IntoResponse {
    let user_id = UserId::from(request.user_id);
    let Some(hardware) = state.registry.get(&user_id).and_then(|u| u.hardware()) else {
        return no_session(&user_id);
    };
    match with_deadline(hardware.speak(&request.text)).await {
        Ok(()) => Json(json!({ "ok": true })).into_response(),
        Err(e) => {
            warn!(user_id = %user_id, error = %e, "Speak passthrough failed");
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

/// POST /api/stop-audio
pub async fn stop_audio(
    State(state): State<SharedState>,
    Json(request): Json<UserParams>,
) -> impl IntoResponse {
    let user_id = UserId::from(request.user_id);
    let Some(hardware) = state.registry.get(&user_id).and_then(|u| u.hardware()) else {
        return no_session(&user_id);
    };
    match with_deadline(hardware.stop_audio()).await {
        Ok(()) => Json(json!({ "ok": true })).into_response(),
        Err(e) => {
            warn!(user_id = %user_id, error = %e, "Stop-audio passthrough failed");
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

/// GET /api/theme-preference
pub async fn get_theme(State(state): State<SharedState>) -> impl IntoResponse {
    let theme = state.theme.lock().expect("theme lock").clone();
    Json(json!({ "theme": theme }))
}

#[derive(Debug, Deserialize)]
pub struct ThemeRequest {
    theme: String,
}

/// POST /api/theme-preference
pub async fn set_theme(
    State(state): State<SharedState>,
    Json(request): Json<ThemeRequest>,
) -> impl IntoResponse {
    *state.theme.lock().expect("theme lock") = request.theme.clone();
    Json(json!({ "theme": request.theme }))
}

/// GET /api/settings?userId
pub async fn get_settings(
    State(state): State<SharedState>,
    Query(params): Query<UserParams>,
) -> impl IntoResponse {
    let user_id = UserId::from(params.user_id);
    let settings = state
        .registry
        .get(&user_id)
        .map(|user| user.settings())
        .unwrap_or_default();
    Json(settings)
}

/// PATCH /api/settings?userId
pub async fn patch_settings(
    State(state): State<SharedState>,
    Query(params): Query<UserParams>,
    Json(patch): Json<SettingsPatch>,
) -> impl IntoResponse {
    let user_id = UserId::from(params.user_id);
    match state.registry.get(&user_id) {
        Some(user) => Json(user.apply_settings(patch)).into_response(),
        None => unknown_user(&user_id),
    }
}

/// GET /api/latest-photo?userId
pub async fn latest_photo(
    State(state): State<SharedState>,
    Query(params): Query<UserParams>,
) -> impl IntoResponse {
    let user_id = UserId::from(params.user_id);
    match state.registry.get(&user_id).and_then(|u| u.photos().latest()) {
        Some(photo) => photo_bytes(&photo),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "no photo available" })),
        )
            .into_response(),
    }
}

/// GET /api/photo/:requestId
pub async fn photo_by_id(
    State(state): State<SharedState>,
    Path(request_id): Path<String>,
) -> impl IntoResponse {
    match find_photo(&state, &request_id) {
        Some(photo) => photo_bytes(&photo),
        None => photo_not_found(&request_id),
    }
}

/// GET /api/photo-base64/:requestId
pub async fn photo_base64(
    State(state): State<SharedState>,
    Path(request_id): Path<String>,
) -> impl IntoResponse {
    match find_photo(&state, &request_id) {
        Some(photo) => (
            StatusCode::OK,
            [("content-type", "text/plain")],
            format!(
                "data:{};base64,{}",
                photo.mime_type,
                B64.encode(&photo.bytes)
            ),
        )
            .into_response(),
        None => photo_not_found(&request_id),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KillParams {
    user_id: String,
    mode: Option<String>,
}

/// POST /api/debug/kill-session?userId&mode=soft|hard
pub async fn kill_session(
    State(state): State<SharedState>,
    Query(params): Query<KillParams>,
) -> impl IntoResponse {
    let user_id = UserId::from(params.user_id);
    let mode = params.mode.as_deref().unwrap_or("soft");
    match mode {
        "soft" => {
            state.registry.soft_remove(&user_id, GRACE_PERIOD);
            Json(json!({ "ok": true, "mode": "soft" })).into_response()
        }
        "hard" => {
            state.registry.bus().broadcast(
                &user_id,
                Topic::Chat,
                &ChatEvent::session_ended("killed"),
            );
            state.registry.bus().clear_pending(&user_id, None);
            state.registry.remove(&user_id);
            Json(json!({ "ok": true, "mode": "hard" })).into_response()
        }
        other => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": format!("unknown mode: {other}") })),
        )
            .into_response(),
    }
}

fn find_photo(state: &SharedState, request_id: &str) -> Option<Arc<StoredPhoto>> {
    state
        .registry
        .users()
        .into_iter()
        .find_map(|user| user.photos().lookup(request_id))
}

fn photo_bytes(photo: &StoredPhoto) -> axum::response::Response {
    (
        StatusCode::OK,
        [("content-type", photo.mime_type.clone())],
        photo.bytes.clone(),
    )
        .into_response()
}

fn photo_not_found(request_id: &str) -> axum::response::Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": format!("photo not found: {request_id}") })),
    )
        .into_response()
}

fn no_session(user_id: &UserId) -> axum::response::Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": format!("no live session for user {user_id}") })),
    )
        .into_response()
}

fn unknown_user(user_id: &UserId) -> axum::response::Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": format!("unknown user: {user_id}") })),
    )
        .into_response()
}
