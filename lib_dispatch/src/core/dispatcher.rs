//! # Request Dispatcher
//!
//! The single entry point every caller funnels network calls through. A
//! logical request moves through these steps:
//!
//! 1.  **Throttle check** (only when `throttle > 0`). A throttled call is
//!     rejected before it touches the cache, the queue or the transport.
//! 2.  **Cache check** (GET with `cache_enabled` only). A hit resolves
//!     immediately and never enters the queue.
//! 3.  **Payload transform**. Optional encryption wraps the payload.
//! 4.  **Headers**. Caller headers, then the bearer token, then the signing
//!     headers computed over the (possibly encrypted) payload.
//! 5.  **Queue**. The request waits for an execution slot in priority order.
//! 6.  **Execute / retry**. Transport attempts run inside the held slot; the
//!     retry policy sleeps between transient failures.
//! 7.  **Settle**. Successful cacheable responses are written to the cache
//!     before the slot is released. 401/403 additionally clears the bearer
//!     token and, after a short delay, notifies the [`AuthFailureHandler`].
//!
//! One `Dispatcher` owns the queue, cache and throttle state for the whole
//! process. [`install_global`] / [`global`] provide the process-wide instance;
//! [`Dispatcher::reset`] clears cache and throttle state between tests.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use http::Method;
use serde_json::{Map, Value};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

use super::cache::{cache_key, ResponseCache};
use super::clock::{Clock, SystemClock};
use super::credentials::{CredentialStore, SessionGrant, TokenStore};
use super::crypto::{encrypt_payload, parse_key, PayloadKey};
use super::error::{CryptoError, DispatchError, TransportError};
use super::queue::{Priority, RequestQueue};
use super::request::{RequestConfig, RequestOptions, Response};
use super::retry::RetryPolicy;
use super::signature::SignatureProvider;
use super::throttle::ThrottleGuard;
use super::transport::{Payload, TransportAdapter, TransportRequest, TransportResponse, UploadPart};
use crate::configs::config_sys::{Settings, SettingsError};
use crate::connections::kv_store::{KeyValueStore, MemoryStore};

/// Receives the global auth failure side effect (e.g. navigate to a safe screen).
pub trait AuthFailureHandler: Send + Sync {
    /// Called once per 401/403 rejection, after the configured delay.
    fn on_auth_failure(&self, status: u16);
}

/// Defaults applied to options a request leaves unset.
#[derive(Debug, Clone)]
struct RequestDefaults {
    timeout: Duration,
    max_retries: u32,
    cache_ttl: Duration,
    auth_redirect_delay: Duration,
}

/// A request ready for the queue.
struct Prepared {
    request: TransportRequest,
    priority: Priority,
    max_retries: u32,
    cache: Option<(String, Duration)>,
}

/// Builder for [`Dispatcher`].
pub struct DispatcherBuilder {
    transport: Arc<dyn TransportAdapter>,
    settings: Settings,
    store: Option<Arc<dyn KeyValueStore>>,
    clock: Option<Arc<dyn Clock>>,
    auth_handler: Option<Arc<dyn AuthFailureHandler>>,
}

impl DispatcherBuilder {
    /// Uses `settings` instead of the built-in defaults.
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Persists cache entries and the bearer token in `store` (in-memory by default).
    pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Overrides the wall clock.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Registers the auth failure collaborator.
    pub fn auth_handler(mut self, handler: Arc<dyn AuthFailureHandler>) -> Self {
        self.auth_handler = Some(handler);
        self
    }

    /// Validates the settings and assembles the dispatcher.
    pub fn build(self) -> Result<Dispatcher, SettingsError> {
        let settings = Settings::defaults().merge(self.settings);
        settings.validate()?;

        let store = self.store.unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let credentials = Arc::new(CredentialStore::new());
        let default_encryption_key = settings
            .default_encryption_key
            .as_deref()
            .map(parse_key)
            .transpose()
            .map_err(|e| SettingsError::Invalid(e.to_string()))?;

        log::info!(
            "Dispatcher ready: max_concurrent={}, timeout={:?}, max_retries={}",
            settings.max_concurrent(),
            settings.default_timeout(),
            settings.default_max_retries()
        );

        Ok(Dispatcher {
            transport: self.transport,
            queue: RequestQueue::new(settings.max_concurrent()),
            cache: ResponseCache::new(Arc::clone(&store), Arc::clone(&clock)),
            throttle: ThrottleGuard::new(Arc::clone(&clock)),
            signer: SignatureProvider::new(Arc::clone(&credentials), settings.sign_secret(), clock),
            retry: RetryPolicy::new(settings.retry_base_delay(), settings.business_rules()),
            credentials,
            tokens: TokenStore::new(store),
            default_encryption_key,
            auth_handler: self.auth_handler,
            defaults: RequestDefaults {
                timeout: settings.default_timeout(),
                max_retries: settings.default_max_retries(),
                cache_ttl: settings.default_cache_ttl(),
                auth_redirect_delay: settings.auth_redirect_delay(),
            },
        })
    }
}

/// Outbound request orchestrator.
pub struct Dispatcher {
    transport: Arc<dyn TransportAdapter>,
    queue: RequestQueue,
    cache: ResponseCache,
    throttle: ThrottleGuard,
    signer: SignatureProvider,
    retry: RetryPolicy,
    credentials: Arc<CredentialStore>,
    tokens: TokenStore,
    default_encryption_key: Option<PayloadKey>,
    auth_handler: Option<Arc<dyn AuthFailureHandler>>,
    defaults: RequestDefaults,
}

impl Dispatcher {
    /// Starts building a dispatcher over `transport`.
    pub fn builder(transport: Arc<dyn TransportAdapter>) -> DispatcherBuilder {
        DispatcherBuilder {
            transport,
            settings: Settings::default(),
            store: None,
            clock: None,
            auth_handler: None,
        }
    }

    /// Dispatches one request.
    pub async fn request(&self, config: RequestConfig) -> Result<Response, DispatchError> {
        if !config.throttle.is_zero() {
            let key = config.throttle_key();
            if self.throttle.should_throttle(&key, config.throttle) {
                return Err(DispatchError::Throttled { key });
            }
        }

        let cache = if config.is_cacheable() {
            let key = cache_key(config.method.as_str(), &config.url, config.data.as_ref());
            if let Some(body) = self.cache.get(&key).await {
                return Ok(Response {
                    status: 200,
                    headers: BTreeMap::new(),
                    body,
                    from_cache: true,
                });
            }
            Some((key, config.cache_ttl.unwrap_or(self.defaults.cache_ttl)))
        } else {
            None
        };

        let data = match config.data {
            Some(data) if config.encrypt_payload => Some(encrypt_payload(&self.encryption_key()?, &data)?),
            other => other,
        };
        let headers = self
            .build_headers(config.headers, config.sign.then_some(data.as_ref()))
            .await;

        let prepared = Prepared {
            request: TransportRequest {
                method: config.method,
                url: config.url,
                headers,
                payload: data.map(Payload::Json).unwrap_or_default(),
                timeout: config.timeout.unwrap_or(self.defaults.timeout),
            },
            priority: config.priority,
            max_retries: config.max_retries.unwrap_or(self.defaults.max_retries),
            cache,
        };
        self.run(prepared).await
    }

    /// Like [`Dispatcher::request`], rejecting with `Cancelled` once `token` fires.
    ///
    /// Cancellation withdraws a queued request or abandons a running one; the
    /// queue slot is released either way.
    pub async fn request_with_cancel(
        &self,
        config: RequestConfig,
        token: CancellationToken,
    ) -> Result<Response, DispatchError> {
        let target = config.throttle_key();
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                log::debug!("{} cancelled by caller", target);
                Err(DispatchError::Cancelled)
            }
            result = self.request(config) => result,
        }
    }

    /// GET with optional query params.
    pub async fn get(&self, url: &str, params: Option<Value>, opts: RequestOptions) -> Result<Response, DispatchError> {
        self.request(with_data(RequestConfig::new(Method::GET, url), params).with_options(opts))
            .await
    }

    /// POST with an optional JSON body.
    pub async fn post(&self, url: &str, data: Option<Value>, opts: RequestOptions) -> Result<Response, DispatchError> {
        self.request(with_data(RequestConfig::new(Method::POST, url), data).with_options(opts))
            .await
    }

    /// PUT with an optional JSON body.
    pub async fn put(&self, url: &str, data: Option<Value>, opts: RequestOptions) -> Result<Response, DispatchError> {
        self.request(with_data(RequestConfig::new(Method::PUT, url), data).with_options(opts))
            .await
    }

    /// DELETE with optional query params.
    pub async fn delete(&self, url: &str, params: Option<Value>, opts: RequestOptions) -> Result<Response, DispatchError> {
        self.request(with_data(RequestConfig::new(Method::DELETE, url), params).with_options(opts))
            .await
    }

    /// Multipart file upload.
    ///
    /// Shares throttling, auth/signing headers, the queue and retry with every
    /// other call, but never reads or writes the response cache. The extra
    /// fields are what gets signed.
    pub async fn upload(
        &self,
        url: &str,
        file_path: impl Into<PathBuf>,
        field_name: &str,
        extra_fields: BTreeMap<String, String>,
        opts: RequestOptions,
    ) -> Result<Response, DispatchError> {
        let file_path = file_path.into();
        let meta = tokio::fs::metadata(&file_path)
            .await
            .map_err(|e| DispatchError::Io(format!("{}: {}", file_path.display(), e)))?;
        if !meta.is_file() {
            return Err(DispatchError::Io(format!("{} is not a file", file_path.display())));
        }

        // Only an upload that can actually be sent counts against the throttle window.
        if !opts.throttle.is_zero() {
            let key = format!("{} {}", Method::POST, url);
            if self.throttle.should_throttle(&key, opts.throttle) {
                return Err(DispatchError::Throttled { key });
            }
        }

        let signed_fields: Value = Value::Object(
            extra_fields
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect::<Map<String, Value>>(),
        );
        let headers = self
            .build_headers(opts.headers, opts.sign.then_some(Some(&signed_fields)))
            .await;

        let prepared = Prepared {
            request: TransportRequest {
                method: Method::POST,
                url: url.to_string(),
                headers,
                payload: Payload::Upload(UploadPart {
                    file_path,
                    field_name: field_name.to_string(),
                    fields: extra_fields,
                }),
                timeout: opts.timeout.unwrap_or(self.defaults.timeout),
            },
            priority: opts.priority,
            max_retries: opts.max_retries.unwrap_or(self.defaults.max_retries),
            cache: None,
        };
        self.run(prepared).await
    }

    /// Stores the session after a successful login.
    pub async fn login(&self, grant: SessionGrant) -> Result<(), CryptoError> {
        if let Some(key) = &grant.encryption_key {
            self.credentials.set_encryption_key(key)?;
        }
        if let Some(secret) = grant.signing_secret {
            self.credentials.set_signing_secret(secret);
        }
        self.tokens.set(&grant.token).await;
        log::info!("Session installed");
        Ok(())
    }

    /// Drops the token, the volatile secrets and every cached response.
    pub async fn logout(&self) {
        self.tokens.clear().await;
        self.credentials.clear();
        self.cache.clear().await;
        log::info!("Session cleared");
    }

    /// Clears cache and throttle state. Queue and session are left alone.
    pub async fn reset(&self) {
        self.cache.clear().await;
        self.throttle.reset();
    }

    /// The execution queue, for observability.
    pub fn queue(&self) -> &RequestQueue {
        &self.queue
    }

    /// Volatile session secrets.
    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    /// The response cache.
    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// Persisted bearer token, if any.
    pub async fn token(&self) -> Option<String> {
        self.tokens.token().await
    }

    fn encryption_key(&self) -> Result<PayloadKey, CryptoError> {
        self.credentials
            .encryption_key()
            .or(self.default_encryption_key)
            .ok_or(CryptoError::MissingKey)
    }

    /// Caller headers, overridden by the bearer token and, when `sign` is
    /// `Some`, the signing headers computed over its params.
    async fn build_headers(
        &self,
        mut headers: BTreeMap<String, String>,
        sign: Option<Option<&Value>>,
    ) -> BTreeMap<String, String> {
        if let Some(token) = self.tokens.token().await {
            headers.insert("Authorization".to_string(), format!("Bearer {}", token));
        }
        if let Some(params) = sign {
            for (name, value) in self.signer.sign(params).headers() {
                headers.insert(name.to_string(), value);
            }
        }
        headers
    }

    async fn run(&self, prepared: Prepared) -> Result<Response, DispatchError> {
        let Prepared {
            request,
            priority,
            max_retries,
            cache,
        } = prepared;

        log::debug!("Dispatching {} {} (priority {})", request.method, request.url, priority.0);

        let result = self
            .queue
            .enqueue(priority, || async {
                let result = self.retry.run(max_retries, || self.attempt(&request)).await;
                if let (Ok(response), Some((key, ttl))) = (&result, &cache) {
                    self.cache.set(key, response.body.clone(), *ttl).await;
                }
                result
            })
            .await;

        match result {
            Ok(response) => Ok(Response {
                status: response.status,
                headers: response.headers,
                body: response.body,
                from_cache: false,
            }),
            Err(err) => {
                if let DispatchError::Auth { status } = err {
                    self.on_auth_failure(status).await;
                }
                log::debug!("{} {} rejected: {}", request.method, request.url, err);
                Err(err)
            }
        }
    }

    async fn attempt(&self, request: &TransportRequest) -> Result<TransportResponse, TransportError> {
        match timeout(request.timeout, self.transport.execute(request)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(request.timeout.as_millis() as u64)),
        }
    }

    async fn on_auth_failure(&self, status: u16) {
        log::warn!("Authentication failed (HTTP {}), clearing bearer token", status);
        self.tokens.clear().await;
        if let Some(handler) = &self.auth_handler {
            let handler = Arc::clone(handler);
            let delay = self.defaults.auth_redirect_delay;
            tokio::spawn(async move {
                sleep(delay).await;
                handler.on_auth_failure(status);
            });
        }
    }
}

fn with_data(config: RequestConfig, data: Option<Value>) -> RequestConfig {
    match data {
        Some(data) => config.data(data),
        None => config,
    }
}

static GLOBAL: OnceLock<Arc<Dispatcher>> = OnceLock::new();

/// Installs the process-wide dispatcher. The first installation wins and is returned.
pub fn install_global(dispatcher: Dispatcher) -> Arc<Dispatcher> {
    let mut fresh = false;
    let installed = GLOBAL.get_or_init(|| {
        fresh = true;
        Arc::new(dispatcher)
    });
    if !fresh {
        log::warn!("Global dispatcher already installed; keeping the existing one");
    }
    Arc::clone(installed)
}

/// The process-wide dispatcher, if one was installed.
pub fn global() -> Option<Arc<Dispatcher>> {
    GLOBAL.get().cloned()
}
