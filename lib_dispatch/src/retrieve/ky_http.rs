//! # HTTP Transport
//!
//! `reqwest` backed [`TransportAdapter`]. Relative request URLs are joined onto
//! an optional base URL, JSON data goes to the query string for GET/DELETE and
//! to the body otherwise, and uploads are sent as `multipart/form-data`.
//!
//! The client performs exactly one attempt per call. Retries belong to the
//! dispatcher's retry policy, so no retry middleware is installed here.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Method;
use serde_json::Value;
use url::Url;

use crate::core::error::TransportError;
use crate::core::transport::{Payload, TransportAdapter, TransportRequest, TransportResponse, UploadPart};

/// HTTP transport built on a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    /// The underlying connection-pooling client.
    inner: reqwest::Client,
    /// Base to which relative paths are joined.
    base_url: Option<Url>,
}

impl ReqwestTransport {
    /// Creates a transport.
    ///
    /// # Arguments
    /// * `base_url` - Optional absolute base URL (e.g. "https://api.example.com/v1/").
    ///   Without one, every request URL must be absolute.
    ///
    /// # Errors
    /// Returns `TransportError::Invalid` if `base_url` is not an absolute URL.
    pub fn new(base_url: Option<&str>) -> Result<Self, TransportError> {
        let base_url = base_url
            .map(|raw| Url::parse(raw).map_err(|e| TransportError::Invalid(format!("base url {}: {}", raw, e))))
            .transpose()?;

        Ok(Self {
            inner: reqwest::Client::new(),
            base_url,
        })
    }

    /// The configured base URL, if any.
    pub fn base_url(&self) -> Option<&Url> {
        self.base_url.as_ref()
    }

    /// Resolves a request URL against the base URL.
    pub fn resolve(&self, target: &str) -> Result<Url, TransportError> {
        if let Ok(absolute) = Url::parse(target) {
            return Ok(absolute);
        }
        match &self.base_url {
            Some(base) => base
                .join(target)
                .map_err(|e| TransportError::Invalid(format!("{}: {}", target, e))),
            None => Err(TransportError::Invalid(format!(
                "relative url {} without a base url",
                target
            ))),
        }
    }

    async fn upload_form(part: &UploadPart) -> Result<Form, TransportError> {
        let bytes = tokio::fs::read(&part.file_path)
            .await
            .map_err(|e| TransportError::Invalid(format!("{}: {}", part.file_path.display(), e)))?;
        let file_name = part
            .file_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| part.field_name.clone());

        let form = part
            .fields
            .iter()
            .fold(Form::new(), |form, (k, v)| form.text(k.clone(), v.clone()));
        Ok(form.part(part.field_name.clone(), Part::bytes(bytes).file_name(file_name)))
    }
}

/// Flattens a JSON object into query pairs. Strings go in raw, nulls are
/// skipped, everything else is rendered as JSON text.
pub fn query_pairs(data: &Value) -> Vec<(String, String)> {
    let Some(map) = data.as_object() else {
        return Vec::new();
    };
    map.iter()
        .filter_map(|(k, v)| match v {
            Value::Null => None,
            Value::String(s) => Some((k.clone(), s.clone())),
            other => Some((k.clone(), other.to_string())),
        })
        .collect()
}

fn map_reqwest_error(err: reqwest::Error, timeout: Duration) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(timeout.as_millis() as u64)
    } else if err.is_builder() {
        TransportError::Invalid(err.to_string())
    } else {
        TransportError::Connection(err.to_string())
    }
}

#[async_trait]
impl TransportAdapter for ReqwestTransport {
    async fn execute(&self, request: &TransportRequest) -> Result<TransportResponse, TransportError> {
        let url = self.resolve(&request.url)?;
        let mut req = self
            .inner
            .request(request.method.clone(), url)
            .timeout(request.timeout);

        for (name, value) in &request.headers {
            req = req.header(name.as_str(), value.as_str());
        }

        req = match &request.payload {
            Payload::Empty => req,
            Payload::Json(data) if matches!(request.method, Method::GET | Method::DELETE) => {
                req.query(&query_pairs(data))
            }
            Payload::Json(data) => req.json(data),
            Payload::Upload(part) => req.multipart(Self::upload_form(part).await?),
        };

        let response = req
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, request.timeout))?;
        let status = response.status().as_u16();
        let headers: BTreeMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
            .collect();

        let text = response
            .text()
            .await
            .map_err(|e| map_reqwest_error(e, request.timeout))?;
        let body = serde_json::from_str(&text).unwrap_or(Value::String(text));

        log::debug!("{} {} -> {}", request.method, request.url, status);
        Ok(TransportResponse { status, headers, body })
    }
}
