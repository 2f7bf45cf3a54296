use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use crate::apns::ApnsClient;
use crate::config::AppConfig;
use crate::registry::DeviceRegistry;

pub mod auth;
pub mod handlers;
pub mod types;

use handlers::{health, list_devices, register, root, unregister, update};

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<DeviceRegistry>,
    pub gateway: Arc<ApnsClient>,
    pub config: Arc<AppConfig>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/devices", get(list_devices))
        .route("/register", post(register))
        .route("/unregister", post(unregister))
        .route("/update", post(update))
        .route("/auth/token", post(auth::issue_token))
}
