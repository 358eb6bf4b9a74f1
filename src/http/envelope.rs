//! Failure envelopes and the request-level error type.
//!
//! Every non-domain response has the shape `{ success, message, [error] }`.
//! Handlers and stages return `ApiError`; turning one into a response only
//! marks it as a failure. The error-rendering stage of the pipeline is the
//! one place that writes the 500 envelope, so the environment decides
//! whether `error` carries the message or `null`.

use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::search::SearchError;

pub const NOT_FOUND_MESSAGE: &str = "API endpoint not found";
pub const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";
pub const ORIGIN_REJECTED_MESSAGE: &str = "Origin not allowed";

/// `404 {"success":false,"message":"API endpoint not found"}`
pub fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "success": false, "message": NOT_FOUND_MESSAGE })),
    )
        .into_response()
}

/// `500 {"success":false,"message":"Internal server error","error":<detail|null>}`
pub fn internal_error(detail: Option<&str>) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "success": false,
            "message": INTERNAL_ERROR_MESSAGE,
            "error": detail,
        })),
    )
        .into_response()
}

/// `403` for origins outside the allow-list.
pub fn origin_rejected() -> Response {
    (
        StatusCode::FORBIDDEN,
        Json(json!({ "success": false, "message": ORIGIN_REJECTED_MESSAGE })),
    )
        .into_response()
}

/// `400` for malformed upgrade handshakes.
pub fn bad_request(message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "success": false, "message": message })),
    )
        .into_response()
}

/// Marker left in response extensions by a failed request.
#[derive(Debug, Clone)]
pub struct PipelineFailure {
    pub kind: &'static str,
    pub message: String,
    /// Display of every error in the source chain, outermost first.
    pub chain: Vec<String>,
}

/// Request-level failure raised anywhere in the pipeline.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    MalformedBody(String),

    #[error("request entity too large (limit {limit} bytes)")]
    PayloadTooLarge { limit: usize },

    #[error("failed to read request body: {0}")]
    BodyRead(#[source] axum::Error),

    #[error("request timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("{0}")]
    Panic(String),

    #[error(transparent)]
    Search(#[from] SearchError),
}

impl ApiError {
    fn kind(&self) -> &'static str {
        match self {
            ApiError::MalformedBody(_) => "malformed_body",
            ApiError::PayloadTooLarge { .. } => "payload_too_large",
            ApiError::BodyRead(_) => "body_read",
            ApiError::Timeout(_) => "timeout",
            ApiError::Panic(_) => "panic",
            ApiError::Search(_) => "search",
        }
    }

    pub fn to_failure(&self) -> PipelineFailure {
        let mut chain = Vec::new();
        let mut source: Option<&(dyn std::error::Error + 'static)> = Some(self);
        while let Some(err) = source {
            chain.push(err.to_string());
            source = err.source();
        }
        PipelineFailure {
            kind: self.kind(),
            message: self.to_string(),
            chain,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // A search route that does not exist is a routing miss, not a failure.
        if let ApiError::Search(SearchError::NotFound(_)) = self {
            return not_found();
        }

        let mut response = StatusCode::INTERNAL_SERVER_ERROR.into_response();
        response.extensions_mut().insert(self.to_failure());
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn internal_error_keeps_null_detail() {
        let response = internal_error(None);
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body_json(response).await,
            json!({ "success": false, "message": "Internal server error", "error": null })
        );
    }

    #[tokio::test]
    async fn not_found_has_no_error_field() {
        assert_eq!(
            body_json(not_found()).await,
            json!({ "success": false, "message": "API endpoint not found" })
        );
    }

    #[test]
    fn failures_are_marked_not_rendered() {
        let response = ApiError::Timeout(Duration::from_secs(5)).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let failure = response.extensions().get::<PipelineFailure>().unwrap();
        assert_eq!(failure.kind, "timeout");
        assert_eq!(failure.message, "request timed out after 5s");
    }

    #[test]
    fn search_not_found_is_a_routing_miss() {
        let response = ApiError::from(SearchError::NotFound("/nope".into())).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.extensions().get::<PipelineFailure>().is_none());
    }

    #[test]
    fn chain_includes_sources() {
        let err = ApiError::Search(SearchError::Failed("db down".into()));
        let failure = err.to_failure();
        assert_eq!(failure.message, "db down");
        assert_eq!(failure.chain[0], "db down");
    }
}
