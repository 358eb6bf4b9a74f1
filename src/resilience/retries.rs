//! Retry eligibility.

use axum::http::{Method, StatusCode};

/// Whether a failed upstream attempt may be repeated.
///
/// Only idempotent methods are retried. Connection failures always qualify;
/// responses qualify when the upstream reports itself unavailable.
pub fn is_retryable(method: &Method, status: Option<StatusCode>, connect_error: bool) -> bool {
    if !method.is_idempotent() {
        return false;
    }
    if connect_error {
        return true;
    }
    matches!(
        status,
        Some(StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT)
    )
}
