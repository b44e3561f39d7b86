//! # Core Dispatch Module
//!
//! This module forms the heart of the outbound request layer. Every network
//! call the storefront makes passes through the components declared here.
//!
//! ## Core Components:
//!
//! - **`dispatcher`**: The orchestrator and single public entry point. It runs
//!   each request through throttle, cache, signing, queue and retry.
//!
//! - **`queue`**: Bounded-concurrency admission with strict priority order and
//!   FIFO tie-break. Slots are RAII guards, so abandoned callers never leak one.
//!
//! - **`retry`**: Outcome classification (transient / terminal / business /
//!   auth) and exponential backoff.
//!
//! - **`cache`**: TTL response cache with lazy expiry over the host key-value store.
//!
//! - **`throttle`**: Per-endpoint minimum interval guard.
//!
//! - **`signature`**, **`crypto`**, **`credentials`**: request signing,
//!   payload encryption and the volatile session secrets they use.
//!
//! - **`transport`**: The `TransportAdapter` seam the physical I/O plugs into.

/// Wall clock abstraction.
pub mod clock;
/// TTL response cache.
pub mod cache;
/// Session secrets and bearer token storage.
pub mod credentials;
/// AES payload encryption.
pub mod crypto;
/// The request orchestrator.
pub mod dispatcher;
/// Error taxonomy.
pub mod error;
/// Priority request queue.
pub mod queue;
/// Request configuration and response types.
pub mod request;
/// Retry classification and backoff.
pub mod retry;
/// Request signing.
pub mod signature;
/// Per-endpoint throttling.
pub mod throttle;
/// Transport adapter trait and request/response shapes.
pub mod transport;

pub use dispatcher::{global, install_global, AuthFailureHandler, Dispatcher, DispatcherBuilder};
pub use error::{DispatchError, ErrorBody, TransportError};
pub use queue::Priority;
pub use request::{RequestConfig, RequestOptions, Response};
pub use transport::{Payload, TransportAdapter, TransportRequest, TransportResponse};
