//! # Request Configuration
//!
//! [`RequestConfig`] is what callers submit. Options left unset fall back to
//! the dispatcher's settings when the request is dispatched.

use std::collections::BTreeMap;
use std::time::Duration;

use http::Method;
use serde_json::Value;

use super::queue::Priority;

/// One logical request. Consumed by value on submission.
#[derive(Debug, Clone)]
pub struct RequestConfig {
    /// Absolute URL or path relative to the transport's base URL.
    pub url: String,
    /// HTTP verb.
    pub method: Method,
    /// Query params (GET/DELETE) or JSON body (POST/PUT).
    pub data: Option<Value>,
    /// Caller headers, merged under the computed auth/signing headers.
    pub headers: BTreeMap<String, String>,
    /// Per-attempt timeout; settings default when `None`.
    pub timeout: Option<Duration>,
    /// Queue priority.
    pub priority: Priority,
    /// Retries after the first attempt; settings default when `None`.
    pub max_retries: Option<u32>,
    /// Serve/store GET responses from the TTL cache.
    pub cache_enabled: bool,
    /// Cache lifetime; settings default when `None`.
    pub cache_ttl: Option<Duration>,
    /// Minimum interval between calls to this endpoint. Zero disables throttling.
    pub throttle: Duration,
    /// Attach `X-Timestamp` / `X-Nonce` / `X-Sign`.
    pub sign: bool,
    /// Encrypt `data` before signing.
    pub encrypt_payload: bool,
}

impl RequestConfig {
    /// A request with every option at its default.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method,
            data: None,
            headers: BTreeMap::new(),
            timeout: None,
            priority: Priority::default(),
            max_retries: None,
            cache_enabled: false,
            cache_ttl: None,
            throttle: Duration::ZERO,
            sign: false,
            encrypt_payload: false,
        }
    }

    /// GET request.
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    /// POST request.
    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    /// Sets the payload.
    pub fn data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Adds a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Sets the per-attempt timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the queue priority.
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the retry budget.
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    /// Enables the response cache with an explicit TTL.
    pub fn cached(mut self, ttl: Duration) -> Self {
        self.cache_enabled = true;
        self.cache_ttl = Some(ttl);
        self
    }

    /// Enables the response cache with the default TTL.
    pub fn cache(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    /// Sets the throttle interval.
    pub fn throttle(mut self, interval: Duration) -> Self {
        self.throttle = interval;
        self
    }

    /// Enables request signing.
    pub fn signed(mut self, sign: bool) -> Self {
        self.sign = sign;
        self
    }

    /// Enables payload encryption.
    pub fn encrypted(mut self, encrypt: bool) -> Self {
        self.encrypt_payload = encrypt;
        self
    }

    /// Copies every option except url, method and data from `opts`.
    pub(crate) fn with_options(mut self, opts: RequestOptions) -> Self {
        self.headers = opts.headers;
        self.timeout = opts.timeout;
        self.priority = opts.priority;
        self.max_retries = opts.max_retries;
        self.cache_enabled = opts.cache_enabled;
        self.cache_ttl = opts.cache_ttl;
        self.throttle = opts.throttle;
        self.sign = opts.sign;
        self.encrypt_payload = opts.encrypt_payload;
        self
    }

    /// Key used by the throttle guard: method and url.
    pub fn throttle_key(&self) -> String {
        format!("{} {}", self.method, self.url)
    }

    /// True when the cache may be consulted for this request.
    pub fn is_cacheable(&self) -> bool {
        self.cache_enabled && self.method == Method::GET
    }
}

/// Options for the convenience wrappers (`get`, `post`, ... , `upload`).
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// See [`RequestConfig::headers`].
    pub headers: BTreeMap<String, String>,
    /// See [`RequestConfig::timeout`].
    pub timeout: Option<Duration>,
    /// See [`RequestConfig::priority`].
    pub priority: Priority,
    /// See [`RequestConfig::max_retries`].
    pub max_retries: Option<u32>,
    /// See [`RequestConfig::cache_enabled`].
    pub cache_enabled: bool,
    /// See [`RequestConfig::cache_ttl`].
    pub cache_ttl: Option<Duration>,
    /// See [`RequestConfig::throttle`].
    pub throttle: Duration,
    /// See [`RequestConfig::sign`].
    pub sign: bool,
    /// See [`RequestConfig::encrypt_payload`].
    pub encrypt_payload: bool,
}

/// A resolved request.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// HTTP status (200 for cache hits).
    pub status: u16,
    /// Response headers (empty for cache hits).
    pub headers: BTreeMap<String, String>,
    /// Response body.
    pub body: Value,
    /// Served from the response cache without a network call.
    pub from_cache: bool,
}
