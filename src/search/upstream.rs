//! Search backend that forwards to a separate search service over HTTP.
//!
//! # Responsibilities
//! - Rewrite `/api/search/<rest>` to `<upstream base>/<rest>`
//! - Propagate headers and the request ID
//! - Bound every attempt with a deadline; retry idempotent requests
//! - Announce completed searches on the notification hub

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderValue, Request, StatusCode, Uri},
};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use serde_json::{json, Value};

use crate::config::SearchConfig;
use crate::http::request::X_REQUEST_ID;
use crate::observability::metrics;
use crate::realtime::NotificationHub;
use crate::resilience::{is_retryable, upstream_retry_delay};
use crate::search::{SearchBackend, SearchError, SearchReply, SearchRequest};

/// Headers that describe one hop and must not be forwarded.
const HOP_BY_HOP: [header::HeaderName; 7] = [
    header::CONNECTION,
    header::HOST,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

pub struct UpstreamSearch {
    base: String,
    client: Client<HttpConnector, Body>,
    config: SearchConfig,
    notifier: Option<Arc<NotificationHub>>,
}

impl UpstreamSearch {
    /// Build a forwarder for `base_url` (e.g. `http://127.0.0.1:4000/v1`).
    pub fn new(base_url: &str, config: SearchConfig) -> Result<Self, SearchError> {
        let uri: Uri = base_url
            .parse()
            .map_err(|e| SearchError::Upstream(format!("invalid upstream URL '{}': {}", base_url, e)))?;
        if uri.scheme_str() != Some("http") || uri.authority().is_none() {
            return Err(SearchError::Upstream(format!(
                "upstream URL '{}' must be an absolute http:// URL",
                base_url
            )));
        }

        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());

        Ok(Self {
            base: base_url.trim_end_matches('/').to_string(),
            client,
            config,
            notifier: None,
        })
    }

    /// Publish `search.completed` events to `hub`.
    pub fn with_notifier(mut self, hub: Arc<NotificationHub>) -> Self {
        self.notifier = Some(hub);
        self
    }

    fn target(&self, request: &SearchRequest) -> Result<Uri, SearchError> {
        let target = format!("{}{}", self.base, request.path_and_query());
        target
            .parse()
            .map_err(|e| SearchError::Upstream(format!("cannot build upstream URI '{}': {}", target, e)))
    }

    fn build_request(&self, request: &SearchRequest, uri: &Uri) -> Result<Request<Body>, SearchError> {
        let mut builder = Request::builder().method(request.method.clone()).uri(uri.clone());

        if let Some(headers) = builder.headers_mut() {
            copy_end_to_end(&request.headers, headers);
            if let Some(id) = request
                .request_id
                .as_deref()
                .and_then(|id| HeaderValue::from_str(id).ok())
            {
                headers.insert(X_REQUEST_ID, id);
            }
        }

        builder
            .body(Body::from(request.raw_body.clone()))
            .map_err(|e| SearchError::Upstream(e.to_string()))
    }

    async fn attempt(&self, request: Request<Body>) -> Result<(StatusCode, Value), AttemptError> {
        let timeout = self.config.attempt_timeout();
        let response = tokio::time::timeout(timeout, self.client.request(request))
            .await
            .map_err(|_| AttemptError::Timeout(timeout))?
            .map_err(|e| AttemptError::Connect(e.to_string()))?;

        let status = response.status();
        let bytes = axum::body::to_bytes(Body::new(response.into_body()), self.config.max_response_bytes)
            .await
            .map_err(|e| AttemptError::Body(e.to_string()))?;

        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .map_err(|e| AttemptError::Body(format!("upstream returned non-JSON body: {}", e)))?
        };
        Ok((status, body))
    }

    fn notify(&self, request: &SearchRequest, status: StatusCode) {
        if let Some(hub) = &self.notifier {
            hub.publish(
                "search.completed",
                json!({
                    "requestId": request.request_id,
                    "path": request.path,
                    "query": request.query_param("query"),
                    "status": status.as_u16(),
                }),
            );
        }
    }
}

#[derive(Debug)]
enum AttemptError {
    Connect(String),
    Timeout(Duration),
    Body(String),
}

impl From<AttemptError> for SearchError {
    fn from(err: AttemptError) -> Self {
        match err {
            AttemptError::Connect(msg) | AttemptError::Body(msg) => SearchError::Upstream(msg),
            AttemptError::Timeout(after) => SearchError::UpstreamTimeout(after),
        }
    }
}

fn copy_end_to_end(from: &HeaderMap, to: &mut HeaderMap) {
    for (name, value) in from.iter() {
        if !HOP_BY_HOP.contains(name) {
            to.append(name.clone(), value.clone());
        }
    }
}

#[async_trait]
impl SearchBackend for UpstreamSearch {
    async fn handle(&self, request: SearchRequest) -> Result<SearchReply, SearchError> {
        let uri = self.target(&request)?;
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempts = 0;

        loop {
            attempts += 1;
            let outcome = self.attempt(self.build_request(&request, &uri)?).await;

            let (retry, status) = match &outcome {
                Ok((status, _)) => (is_retryable(&request.method, Some(*status), false), Some(*status)),
                Err(AttemptError::Connect(_) | AttemptError::Timeout(_)) => {
                    (is_retryable(&request.method, None, true), None)
                }
                Err(AttemptError::Body(_)) => (false, None),
            };

            if retry && attempts < max_attempts {
                metrics::record_upstream_attempt("retried");
                let delay = upstream_retry_delay(attempts, &self.config);
                tracing::info!(
                    request_id = ?request.request_id,
                    attempt = attempts,
                    delay = ?delay,
                    status = ?status,
                    "Retrying upstream search"
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            return match outcome {
                Ok((status, body)) => {
                    metrics::record_upstream_attempt("completed");
                    self.notify(&request, status);
                    Ok(SearchReply::with_status(status, body))
                }
                Err(e) => {
                    metrics::record_upstream_attempt("failed");
                    tracing::error!(
                        request_id = ?request.request_id,
                        attempt = attempts,
                        uri = %uri,
                        error = ?e,
                        "Upstream search failed"
                    );
                    Err(e.into())
                }
            };
        }
    }
}
