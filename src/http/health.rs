//! Liveness endpoint.

use std::sync::Arc;

use axum::{extract::State, Json};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub message: String,
}

/// `GET /api/health`
pub async fn health(State(service_name): State<Arc<str>>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "OK",
        message: format!("{} is running", service_name),
    })
}
