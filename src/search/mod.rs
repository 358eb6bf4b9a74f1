//! Search route group and the search collaborator seam.
//!
//! # Data Flow
//! ```text
//! /api/search[/*]  (after cross-origin and body decoding)
//!     → routes.rs (build SearchRequest, strip prefix)
//!     → SearchBackend::handle
//!     → SearchReply → JSON response
//!     → SearchError → 404 envelope (NotFound) or 500 envelope
//! ```
//!
//! The server owns no search logic. `UpstreamSearch` forwards to a separate
//! search service; `UnconfiguredSearch` fails every call.

pub mod routes;
pub mod upstream;

use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Bytes,
    http::{HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value;
use thiserror::Error;

use crate::http::request::DecodedBody;

pub use routes::routes;
pub use upstream::UpstreamSearch;

/// A request routed to the search collaborator.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub method: Method,
    /// Path below the search prefix; always starts with `/`.
    pub path: String,
    /// Query string pairs in request order.
    pub query: Vec<(String, String)>,
    pub headers: HeaderMap,
    /// Decoded JSON or form body, if the request had one.
    pub body: Option<DecodedBody>,
    pub raw_body: Bytes,
    pub request_id: Option<String>,
}

impl SearchRequest {
    /// First value of a query parameter.
    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// `path?query` as received, without the prefix.
    pub fn path_and_query(&self) -> String {
        if self.query.is_empty() {
            return self.path.clone();
        }
        let query = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.query.iter())
            .finish();
        format!("{}?{}", self.path, query)
    }
}

/// Structured reply from the search collaborator.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchReply {
    pub status: StatusCode,
    pub body: Value,
}

impl SearchReply {
    pub fn ok(body: Value) -> Self {
        Self {
            status: StatusCode::OK,
            body,
        }
    }

    pub fn with_status(status: StatusCode, body: Value) -> Self {
        Self { status, body }
    }
}

impl IntoResponse for SearchReply {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

/// Failure raised by the search collaborator.
#[derive(Debug, Error)]
pub enum SearchError {
    /// No search handler for this path; rendered as the 404 envelope.
    #[error("no search route for {0}")]
    NotFound(String),

    #[error("{0}")]
    Failed(String),

    #[error("search backend not configured")]
    Unconfigured,

    #[error("upstream search request failed: {0}")]
    Upstream(String),

    #[error("upstream search timed out after {0:?}")]
    UpstreamTimeout(Duration),
}

impl SearchError {
    pub fn failed(message: impl std::fmt::Display) -> Self {
        SearchError::Failed(message.to_string())
    }
}

/// The external search collaborator.
#[async_trait]
pub trait SearchBackend: Send + Sync + 'static {
    async fn handle(&self, request: SearchRequest) -> Result<SearchReply, SearchError>;
}

/// Backend used when no search service is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredSearch;

#[async_trait]
impl SearchBackend for UnconfiguredSearch {
    async fn handle(&self, request: SearchRequest) -> Result<SearchReply, SearchError> {
        tracing::warn!(path = %request.path, "Search request received but no backend is configured");
        Err(SearchError::Unconfigured)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(query: Vec<(&str, &str)>) -> SearchRequest {
        SearchRequest {
            method: Method::GET,
            path: "/parts".into(),
            query: query
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            headers: HeaderMap::new(),
            body: None,
            raw_body: Bytes::new(),
            request_id: None,
        }
    }

    #[test]
    fn query_helpers() {
        let req = request(vec![("query", "532416954"), ("brand", "stihl & co")]);
        assert_eq!(req.query_param("query"), Some("532416954"));
        assert_eq!(req.query_param("missing"), None);
        assert_eq!(req.path_and_query(), "/parts?query=532416954&brand=stihl+%26+co");
        assert_eq!(request(vec![]).path_and_query(), "/parts");
    }

    #[tokio::test]
    async fn unconfigured_backend_always_fails() {
        let err = UnconfiguredSearch.handle(request(vec![])).await.unwrap_err();
        assert!(matches!(err, SearchError::Unconfigured));
    }
}
