use serde::{Deserialize, Serialize};

use crate::content::ContentState;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub device_token: String,
    pub activity_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub success: bool,
    pub message: String,
    pub device_count: usize,
}

#[derive(Debug, Deserialize)]
pub struct UnregisterRequest {
    pub device_token: String,
}

#[derive(Debug, Serialize)]
pub struct UnregisterResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateRequest {
    pub device_token: String,
    pub activity_id: String,
    pub content_state: ContentState,
}

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub user_id: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub active_devices: usize,
    pub monitoring_users: usize,
}
