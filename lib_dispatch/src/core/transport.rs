//! # Transport Adapter
//!
//! The dispatcher never performs I/O itself. One physical attempt is handed to
//! a [`TransportAdapter`], which reports either a response (any status) or a
//! transport level failure. Classification, retry, caching and signing all
//! live above this seam, so every backend gets identical behaviour.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use http::Method;
use serde_json::Value;

use super::error::TransportError;

/// A file to send as `multipart/form-data`.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadPart {
    /// Local file to read.
    pub file_path: PathBuf,
    /// Form field name of the file part.
    pub field_name: String,
    /// Additional text fields.
    pub fields: BTreeMap<String, String>,
}

/// Request body of one attempt.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Payload {
    /// No body or query.
    #[default]
    Empty,
    /// JSON data. GET/DELETE adapters send it as the query string, others as the body.
    Json(Value),
    /// Multipart file upload.
    Upload(UploadPart),
}

/// Everything an adapter needs to perform one call.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    /// HTTP verb.
    pub method: Method,
    /// Absolute URL, or a path the adapter resolves against its base URL.
    pub url: String,
    /// Final header set (caller headers merged with auth and signing headers).
    pub headers: BTreeMap<String, String>,
    /// Body or query data.
    pub payload: Payload,
    /// Per-attempt timeout.
    pub timeout: Duration,
}

/// Raw outcome of a call that reached the server.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: BTreeMap<String, String>,
    /// Body parsed as JSON, or a JSON string when it was not JSON.
    pub body: Value,
}

impl TransportResponse {
    /// Convenience constructor for a header-less response.
    pub fn new(status: u16, body: Value) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body,
        }
    }
}

/// Performs one physical request/response exchange.
///
/// Implementations must be safe to call repeatedly with the same request;
/// the retry policy re-issues it after transient failures.
#[async_trait]
pub trait TransportAdapter: Send + Sync {
    /// Executes the call. Non-2xx statuses are `Ok`; only failures to get a
    /// response at all are `Err`.
    async fn execute(&self, request: &TransportRequest) -> Result<TransportResponse, TransportError>;
}
