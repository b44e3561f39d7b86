//! # Data Retrieval Module
//!
//! Concrete network transports for the dispatcher.
//!
//! ## Contained Modules:
//!
//! - **`ky_http`**: `ReqwestTransport`, the HTTP implementation of
//!   `TransportAdapter` built on `reqwest`.

/// reqwest backed HTTP transport.
pub mod ky_http;

pub use ky_http::ReqwestTransport;
