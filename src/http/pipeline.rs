//! HTTP request pipeline.
//!
//! # Stage Order
//! ```text
//! request id → metrics → origin guard → CORS → failure rendering
//!     → panic capture → deadline → body decoding → routes | not-found
//! ```
//!
//! Stages run outermost first, in the order listed. The origin guard and
//! CORS run before any body is read. Failure rendering wraps everything
//! that can fail (body decoding, the deadline, panics, route handlers), so
//! each failure is turned into the 500 envelope exactly once. Routing
//! misses never fail: the router's fallback answers with the 404 envelope.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderValue, Method, Request},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{AllowHeaders, AllowOrigin, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::config::{CorsConfig, Environment, ServerConfig};
use crate::http::envelope::{self, ApiError, PipelineFailure};
use crate::http::health::health;
use crate::http::request::{BodyKind, DecodedBody, RequestIdExt, X_REQUEST_ID};
use crate::observability::metrics;
use crate::search::{self, SearchBackend};

/// Values the stages consult; fixed once the pipeline is built.
#[derive(Debug, Clone)]
pub struct PipelinePolicy {
    pub cors: CorsConfig,
    pub environment: Environment,
    pub max_body_bytes: usize,
    pub request_timeout: Duration,
}

impl PipelinePolicy {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            cors: config.cors.clone(),
            environment: config.service.environment,
            max_body_bytes: config.limits.max_body_bytes,
            request_timeout: config.timeouts.request(),
        }
    }
}

/// Assemble the HTTP pipeline: health, the search route group, the
/// not-found fallback, and every stage around them.
pub fn build_pipeline(config: &ServerConfig, search: Arc<dyn SearchBackend>) -> Router {
    let policy = Arc::new(PipelinePolicy::from_config(config));
    let service_name: Arc<str> = Arc::from(config.service.name.as_str());

    let routes = Router::new()
        .route("/api/health", get(health))
        .with_state(service_name)
        .merge(search::routes(
            &config.search.prefix,
            search,
            config.limits.max_body_bytes,
        ))
        .fallback(not_found)
        .method_not_allowed_fallback(not_found);

    routes.layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::new(X_REQUEST_ID, MakeRequestUuid))
            .layer(PropagateRequestIdLayer::new(X_REQUEST_ID))
            .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                tracing::info_span!(
                    "request",
                    method = %request.method(),
                    uri = %request.uri(),
                    request_id = request.request_id().as_deref().unwrap_or("-"),
                )
            }))
            .layer(middleware::from_fn(record_metrics))
            .layer(middleware::from_fn_with_state(policy.clone(), origin_guard))
            .layer(cors_layer(&policy.cors))
            .layer(middleware::from_fn_with_state(policy.clone(), render_failures))
            .layer(CatchPanicLayer::custom(panic_to_failure))
            .layer(middleware::from_fn_with_state(policy.clone(), enforce_deadline))
            .layer(middleware::from_fn_with_state(policy, decode_body)),
    )
}

/// Response headers for allow-listed origins and preflight answers.
fn cors_layer(cors: &CorsConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = cors
        .allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Skipping unusable CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(cors.allow_credentials)
}

async fn record_metrics(request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let response = next.run(request).await;
    metrics::record_request(method.as_str(), response.status().as_u16(), start);
    response
}

/// Refuse requests whose `Origin` is not on the allow-list before any
/// body is read or route runs.
async fn origin_guard(
    State(policy): State<Arc<PipelinePolicy>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if let Some(origin) = request.headers().get(header::ORIGIN) {
        let allowed = origin
            .to_str()
            .map(|o| policy.cors.is_allowed(o))
            .unwrap_or(false);
        if !allowed {
            tracing::warn!(
                origin = ?origin,
                path = %request.uri().path(),
                "Rejected cross-origin request"
            );
            return envelope::origin_rejected();
        }
    }
    next.run(request).await
}

/// The error step: turn a marked failure into the 500 envelope.
async fn render_failures(
    State(policy): State<Arc<PipelinePolicy>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let request_id = request.request_id();
    let method = request.method().clone();
    let path = request.uri().path().to_owned();

    let mut response = next.run(request).await;
    let Some(failure) = response.extensions_mut().remove::<PipelineFailure>() else {
        return response;
    };

    tracing::error!(
        request_id = ?request_id,
        method = %method,
        path = %path,
        kind = failure.kind,
        error = %failure.message,
        trace = ?failure.chain,
        "Request failed"
    );

    let detail = policy
        .environment
        .exposes_error_detail()
        .then_some(failure.message.as_str());
    envelope::internal_error(detail)
}

fn panic_to_failure(payload: Box<dyn std::any::Any + Send + 'static>) -> Response {
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    };
    ApiError::Panic(message).into_response()
}

async fn enforce_deadline(
    State(policy): State<Arc<PipelinePolicy>>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    tokio::time::timeout(policy.request_timeout, next.run(request))
        .await
        .map_err(|_| ApiError::Timeout(policy.request_timeout))
}

/// Buffer and decode JSON and form bodies ahead of routing.
async fn decode_body(
    State(policy): State<Arc<PipelinePolicy>>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(kind) = BodyKind::from_headers(request.headers()) else {
        return Ok(next.run(request).await);
    };

    let declared = request
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared.is_some_and(|len| len > policy.max_body_bytes) {
        return Err(ApiError::PayloadTooLarge {
            limit: policy.max_body_bytes,
        });
    }

    let (mut parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, policy.max_body_bytes)
        .await
        .map_err(ApiError::BodyRead)?;

    if !bytes.is_empty() {
        parts.extensions.insert(DecodedBody::decode(kind, &bytes)?);
    }

    Ok(next.run(Request::from_parts(parts, Body::from(bytes))).await)
}

async fn not_found() -> Response {
    envelope::not_found()
}
