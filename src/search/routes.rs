//! Mounts the search collaborator under a path prefix.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::Request,
    response::{IntoResponse, Response},
    routing::any,
    Router,
};

use crate::http::envelope::ApiError;
use crate::http::request::{DecodedBody, RequestIdExt};
use crate::search::{SearchBackend, SearchRequest};

#[derive(Clone)]
struct SearchGroup {
    prefix: Arc<str>,
    backend: Arc<dyn SearchBackend>,
    max_body_bytes: usize,
}

/// Route group forwarding `prefix`, `prefix/` and `prefix/*` (any method)
/// to `backend`.
pub fn routes(prefix: &str, backend: Arc<dyn SearchBackend>, max_body_bytes: usize) -> Router {
    let prefix = prefix.trim_end_matches('/');
    let group = SearchGroup {
        prefix: Arc::from(prefix),
        backend,
        max_body_bytes,
    };

    Router::new()
        .route(prefix, any(delegate))
        .route(&format!("{}/", prefix), any(delegate))
        .route(&format!("{}/{{*rest}}", prefix), any(delegate))
        .with_state(group)
}

async fn delegate(
    State(group): State<SearchGroup>,
    request: Request<Body>,
) -> Result<Response, ApiError> {
    let request_id = request.request_id();
    let (parts, body) = request.into_parts();

    // The decoding stage has already buffered bodies it understands.
    let raw_body = axum::body::to_bytes(body, group.max_body_bytes)
        .await
        .map_err(ApiError::BodyRead)?;

    let path = match parts.uri.path().strip_prefix(group.prefix.as_ref()) {
        Some("") | None => "/".to_string(),
        Some(rest) => rest.to_string(),
    };
    let query = parts
        .uri
        .query()
        .map(|q| {
            url::form_urlencoded::parse(q.as_bytes())
                .into_owned()
                .collect()
        })
        .unwrap_or_default();

    let search_request = SearchRequest {
        method: parts.method,
        path,
        query,
        body: parts.extensions.get::<DecodedBody>().cloned(),
        headers: parts.headers,
        raw_body,
        request_id,
    };

    tracing::debug!(
        request_id = ?search_request.request_id,
        method = %search_request.method,
        path = %search_request.path,
        "Delegating to search backend"
    );

    let reply = group.backend.handle(search_request).await?;
    Ok(reply.into_response())
}
