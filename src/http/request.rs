//! Typed request context.
//!
//! # Responsibilities
//! - Request ID (UUID v4) added as early as possible for tracing
//! - Decoding of JSON and form bodies into a typed value carried in
//!   request extensions
//!
//! # Design Decisions
//! - The raw bytes stay on the request after decoding, so handlers that
//!   want the original body still get it

use axum::http::{header, HeaderMap, HeaderName, Request};
use serde_json::{Map, Value};
use tower_http::request_id::RequestId;

use crate::http::envelope::ApiError;

pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Accessor for the request ID assigned by the request-id layer.
pub trait RequestIdExt {
    fn request_id(&self) -> Option<String>;
}

impl<B> RequestIdExt for Request<B> {
    fn request_id(&self) -> Option<String> {
        request_id_from(self.extensions(), self.headers())
    }
}

impl RequestIdExt for axum::http::request::Parts {
    fn request_id(&self) -> Option<String> {
        request_id_from(&self.extensions, &self.headers)
    }
}

fn request_id_from(extensions: &axum::http::Extensions, headers: &HeaderMap) -> Option<String> {
    extensions
        .get::<RequestId>()
        .map(|id| id.header_value())
        .or_else(|| headers.get(X_REQUEST_ID))
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

/// Body formats the decoding stage understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    Json,
    Form,
}

impl BodyKind {
    /// Inspect `Content-Type`, ignoring parameters such as `charset`.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let content_type = headers.get(header::CONTENT_TYPE)?.to_str().ok()?;
        let essence = content_type.split(';').next()?.trim().to_ascii_lowercase();
        match essence.as_str() {
            "application/json" => Some(BodyKind::Json),
            "application/x-www-form-urlencoded" => Some(BodyKind::Form),
            _ => None,
        }
    }
}

/// A decoded request body, available to handlers as a request extension.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedBody {
    Json(Value),
    /// Form fields; a key sent more than once becomes an array.
    Form(Map<String, Value>),
}

impl DecodedBody {
    pub fn decode(kind: BodyKind, bytes: &[u8]) -> Result<Self, ApiError> {
        match kind {
            BodyKind::Json => serde_json::from_slice(bytes)
                .map(DecodedBody::Json)
                .map_err(|e| ApiError::MalformedBody(format!("invalid JSON body: {}", e))),
            BodyKind::Form => Ok(DecodedBody::Form(decode_form(bytes))),
        }
    }

    /// The body as a single JSON value.
    pub fn to_json(&self) -> Value {
        match self {
            DecodedBody::Json(value) => value.clone(),
            DecodedBody::Form(fields) => Value::Object(fields.clone()),
        }
    }
}

fn decode_form(bytes: &[u8]) -> Map<String, Value> {
    let mut fields = Map::new();
    for (key, value) in url::form_urlencoded::parse(bytes) {
        let value = Value::String(value.into_owned());
        match fields.get_mut(key.as_ref()) {
            Some(Value::Array(values)) => values.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                fields.insert(key.into_owned(), value);
            }
        }
    }
    fields
}
