use axum::{extract::State, http::StatusCode, Json};
use serde_json::json;
use tracing::info;

use crate::api::auth::AuthenticatedUser;
use crate::api::types::{
    HealthResponse, RegisterRequest, RegisterResponse, UnregisterRequest, UnregisterResponse,
    UpdateRequest,
};
use crate::api::AppState;
use crate::apns::DispatchResult;
use crate::registry::short_token;
use crate::scheduler::dispatch_now;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Device tokens are hex blobs well past this length; anything shorter is a
/// client bug.
const MIN_DEVICE_TOKEN_LEN: usize = 32;

pub async fn root(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "service": "Halo Relay - Live Activity Updates",
        "version": VERSION,
        "status": "running",
        "active_devices": state.registry.len().await,
        "monitoring_users": state.registry.monitored_users().await,
        "environment": state.config.environment,
    }))
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: VERSION,
        active_devices: state.registry.len().await,
        monitoring_users: state.registry.monitored_users().await,
    })
}

pub async fn register(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<RegisterResponse>, (StatusCode, String)> {
    if req.device_token.len() < MIN_DEVICE_TOKEN_LEN {
        return Err((
            StatusCode::BAD_REQUEST,
            "Invalid device token format".to_string(),
        ));
    }

    // Feed association defaults to the authenticated identity.
    let user_id = req.user_id.unwrap_or_else(|| claims.user_id.clone());
    state
        .registry
        .register(&req.device_token, &req.activity_id, Some(user_id.clone()))
        .await;

    info!(
        "device registered: {}... for user {}",
        short_token(&req.device_token),
        user_id
    );

    Ok(Json(RegisterResponse {
        success: true,
        message: format!("Device registered for user {user_id}"),
        device_count: state.registry.len().await,
    }))
}

pub async fn unregister(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Json(req): Json<UnregisterRequest>,
) -> Result<Json<UnregisterResponse>, (StatusCode, String)> {
    if let Some(device) = state.registry.get(&req.device_token).await {
        if device.user_id.as_deref() != Some(claims.user_id.as_str()) {
            return Err((
                StatusCode::FORBIDDEN,
                "You don't have permission to unregister this device".to_string(),
            ));
        }
    }

    let removed = state.registry.unregister(&req.device_token).await;
    Ok(Json(UnregisterResponse {
        success: removed,
        message: if removed {
            "Device unregistered".to_string()
        } else {
            "Device not found".to_string()
        },
    }))
}

pub async fn list_devices(State(state): State<AppState>) -> Json<serde_json::Value> {
    let devices = state.registry.list().await;
    Json(json!({
        "count": devices.len(),
        "devices": devices
            .iter()
            .map(|d| {
                json!({
                    "device_token": format!("{}...", short_token(&d.device_token)),
                    "activity_id": d.activity_id,
                    "user_id": d.user_id,
                    "rotation_index": d.rotation_index,
                    "registered_at": d.registered_at,
                    "last_update": d.last_update,
                })
            })
            .collect::<Vec<_>>(),
    }))
}

/// Out-of-cycle dispatch with caller-supplied content, bypassing rotation.
pub async fn update(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Json(req): Json<UpdateRequest>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let Some(device) = state.registry.get(&req.device_token).await else {
        return Err((StatusCode::NOT_FOUND, "Device not registered".to_string()));
    };
    if device.user_id.as_deref() != Some(claims.user_id.as_str()) {
        return Err((
            StatusCode::FORBIDDEN,
            "You don't have permission to update this device".to_string(),
        ));
    }

    let result = dispatch_now(
        &state.registry,
        state.gateway.as_ref(),
        &req.device_token,
        &req.activity_id,
        &req.content_state,
    )
    .await;

    match result {
        DispatchResult::Delivered => Ok(Json(json!({
            "success": true,
            "message": "Live Activity updated",
        }))),
        DispatchResult::TransientFailure => Err((
            StatusCode::BAD_GATEWAY,
            "Push gateway unavailable, try again".to_string(),
        )),
        DispatchResult::PermanentFailure { evict: true } => Err((
            StatusCode::GONE,
            "Device token no longer valid; device unregistered".to_string(),
        )),
        DispatchResult::PermanentFailure { evict: false } => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            "Push payload rejected by gateway".to_string(),
        )),
    }
}
