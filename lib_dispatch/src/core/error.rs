//! # Dispatch Errors
//!
//! Every rejection produced by the dispatcher is a `DispatchError`. Callers that
//! only care about the normalized `{code, message}` shape convert it with
//! [`DispatchError::to_body`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Failure reported by a `TransportAdapter` for a single physical attempt.
///
/// Timeouts and connection errors are transient from the retry policy's point of view.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The attempt did not complete within its timeout.
    #[error("request timed out after {0} ms")]
    Timeout(u64),

    /// The connection could not be established or was torn down mid-flight.
    #[error("connection error: {0}")]
    Connection(String),

    /// The request could not be built (bad URL, unreadable upload file).
    /// Retrying cannot help, so this one is terminal.
    #[error("invalid request: {0}")]
    Invalid(String),
}

/// Errors raised while encrypting or decrypting a request payload.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Payload encryption was requested but no key is installed or configured.
    #[error("no payload encryption key available")]
    MissingKey,

    /// The key was not valid hex or not 32 bytes long.
    #[error("invalid encryption key: {0}")]
    InvalidKey(String),

    /// The envelope could not be decoded or decrypted.
    #[error("invalid encrypted payload: {0}")]
    InvalidPayload(String),
}

/// Normalized rejection shape handed to UI collaborators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Numeric error code (HTTP status, business code or a synthetic negative code).
    pub code: i64,
    /// Human readable description.
    pub message: String,
}

/// Terminal outcome of a rejected `request`.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Rejected before any network attempt because the endpoint was hit too recently.
    #[error("request to {key} throttled, try again later")]
    Throttled {
        /// Throttle key (method + url).
        key: String,
    },

    /// Transport level failure, or 5xx responses, after all retries were spent.
    #[error("network error after {attempts} attempt(s): {message}")]
    Network {
        /// Number of transport invocations made.
        attempts: u32,
        /// Description of the last failure.
        message: String,
    },

    /// Non-2xx response not otherwise classified.
    #[error("HTTP {status}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Response body as returned by the backend.
        body: Value,
    },

    /// 2xx response carrying a non-success application status code.
    #[error("business error {code}: {message}")]
    Business {
        /// Application status code.
        code: i64,
        /// Message extracted from the payload, if any.
        message: String,
        /// The backend's payload, verbatim.
        payload: Value,
    },

    /// 401/403. Terminal, and triggers the auth failure side effect.
    #[error("authentication failed (HTTP {status})")]
    Auth {
        /// 401 or 403.
        status: u16,
    },

    /// The caller cancelled the request before it settled.
    #[error("request cancelled")]
    Cancelled,

    /// Payload encryption failed.
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// Local I/O failed (e.g. the file to upload could not be read).
    #[error("I/O error: {0}")]
    Io(String),

    /// The request could not be built from its configuration.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl DispatchError {
    /// Numeric code of the normalized error shape.
    ///
    /// HTTP-derived variants use the status, business errors use the backend
    /// code, and locally generated errors use fixed negative codes.
    pub fn code(&self) -> i64 {
        match self {
            DispatchError::Throttled { .. } => -1,
            DispatchError::Network { .. } => -2,
            DispatchError::Http { status, .. } => i64::from(*status),
            DispatchError::Business { code, .. } => *code,
            DispatchError::Auth { status } => i64::from(*status),
            DispatchError::Cancelled => -3,
            DispatchError::Crypto(_) => -4,
            DispatchError::Io(_) => -5,
            DispatchError::InvalidRequest(_) => -6,
        }
    }

    /// True for the synthetic throttle rejection ("try again later", not a failure).
    pub fn is_throttled(&self) -> bool {
        matches!(self, DispatchError::Throttled { .. })
    }

    /// True for 401/403 rejections.
    pub fn is_auth(&self) -> bool {
        matches!(self, DispatchError::Auth { .. })
    }

    /// Converts into the `{code, message}` shape.
    pub fn to_body(&self) -> ErrorBody {
        let message = match self {
            DispatchError::Business { message, .. } if !message.is_empty() => message.clone(),
            other => other.to_string(),
        };
        ErrorBody {
            code: self.code(),
            message,
        }
    }
}

impl From<&DispatchError> for ErrorBody {
    fn from(err: &DispatchError) -> Self {
        err.to_body()
    }
}
