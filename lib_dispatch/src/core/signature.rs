//! # Request Signing
//!
//! Canonical form: parameter keys sorted lexicographically, each pair written
//! as `key=value&`, followed by the secret, the timestamp and the nonce with no
//! separators. The signature is the lowercase hex SHA-256 of that string.
//!
//! String values are used raw, `null` values are skipped, anything else is
//! written as compact JSON. Only object payloads contribute pairs.
//!
//! Replay protection is advisory: nothing here remembers nonces.

use std::sync::Arc;

use rand::distr::{Alphanumeric, SampleString};
use rand::rng;
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::clock::Clock;
use super::credentials::CredentialStore;

/// Header carrying the signing timestamp (Unix ms).
pub const HEADER_TIMESTAMP: &str = "X-Timestamp";
/// Header carrying the random nonce.
pub const HEADER_NONCE: &str = "X-Nonce";
/// Header carrying the signature.
pub const HEADER_SIGN: &str = "X-Sign";

const NONCE_LEN: usize = 16;

/// Result of signing one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    /// Hex SHA-256 of the canonical string.
    pub signature: String,
    /// Unix ms used in the canonical string.
    pub timestamp: u64,
    /// Random nonce used in the canonical string.
    pub nonce: String,
}

impl SignedHeaders {
    /// Header name/value pairs to attach to the request.
    pub fn headers(&self) -> [(&'static str, String); 3] {
        [
            (HEADER_TIMESTAMP, self.timestamp.to_string()),
            (HEADER_NONCE, self.nonce.clone()),
            (HEADER_SIGN, self.signature.clone()),
        ]
    }
}

/// Builds the string that gets hashed.
pub fn canonical_string(params: Option<&Value>, secret: &str, timestamp: u64, nonce: &str) -> String {
    let mut out = String::new();
    if let Some(Value::Object(map)) = params {
        let mut keys: Vec<&String> = map.keys().collect();
        keys.sort();
        for key in keys {
            let value = match &map[key.as_str()] {
                Value::Null => continue,
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            out.push_str(key);
            out.push('=');
            out.push_str(&value);
            out.push('&');
        }
    }
    out.push_str(secret);
    out.push_str(&timestamp.to_string());
    out.push_str(nonce);
    out
}

/// Signs requests with the session secret, falling back to a static default.
pub struct SignatureProvider {
    credentials: Arc<CredentialStore>,
    default_secret: String,
    clock: Arc<dyn Clock>,
}

impl SignatureProvider {
    /// Creates a provider. `default_secret` is used until a session secret is installed.
    pub fn new(credentials: Arc<CredentialStore>, default_secret: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            credentials,
            default_secret: default_secret.into(),
            clock,
        }
    }

    /// The secret that would be used right now.
    pub fn current_secret(&self) -> String {
        self.credentials
            .signing_secret()
            .unwrap_or_else(|| self.default_secret.clone())
    }

    /// Signs `params` with the current time and a fresh nonce.
    pub fn sign(&self, params: Option<&Value>) -> SignedHeaders {
        let nonce = Alphanumeric.sample_string(&mut rng(), NONCE_LEN);
        self.sign_with(params, self.clock.now_ms(), nonce)
    }

    /// Signs with an explicit timestamp and nonce.
    pub fn sign_with(&self, params: Option<&Value>, timestamp: u64, nonce: String) -> SignedHeaders {
        let canonical = canonical_string(params, &self.current_secret(), timestamp, &nonce);
        let signature = hex::encode(Sha256::digest(canonical.as_bytes()));
        SignedHeaders {
            signature,
            timestamp,
            nonce,
        }
    }
}
