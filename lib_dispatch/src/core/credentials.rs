//! # Session Credentials
//!
//! Two stores with deliberately different lifetimes:
//!
//! - [`CredentialStore`] holds the signing secret and the payload encryption
//!   key in process memory only. They are installed after login, cleared on
//!   logout, and never written anywhere.
//! - [`TokenStore`] keeps the bearer token in host key-value storage so a
//!   restarted client stays logged in.

use std::fmt;
use std::sync::{Arc, RwLock};

use super::crypto::{parse_key, PayloadKey};
use super::error::CryptoError;
use crate::connections::kv_store::KeyValueStore;

/// Storage key of the bearer token.
pub const TOKEN_KEY: &str = "auth:token";

/// What a login collaborator hands to the dispatcher after authenticating.
#[derive(Clone, Default)]
pub struct SessionGrant {
    /// Bearer token, persisted.
    pub token: String,
    /// Per-session signing secret, volatile.
    pub signing_secret: Option<String>,
    /// Hex encoded 32-byte payload key, volatile.
    pub encryption_key: Option<String>,
}

impl fmt::Debug for SessionGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionGrant")
            .field("token", &"<redacted>")
            .field("signing_secret", &self.signing_secret.as_ref().map(|_| "<redacted>"))
            .field("encryption_key", &self.encryption_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Volatile secret material for the current session.
#[derive(Default)]
pub struct CredentialStore {
    signing_secret: RwLock<Option<String>>,
    encryption_key: RwLock<Option<PayloadKey>>,
}

impl CredentialStore {
    /// Creates an empty store (the pre-login state).
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs or rotates the signing secret.
    pub fn set_signing_secret(&self, secret: impl Into<String>) {
        *self.signing_secret.write().expect("Credential lock poisoned") = Some(secret.into());
    }

    /// Installs the payload key from its hex form.
    pub fn set_encryption_key(&self, hex_key: &str) -> Result<(), CryptoError> {
        let key = parse_key(hex_key)?;
        *self.encryption_key.write().expect("Credential lock poisoned") = Some(key);
        Ok(())
    }

    /// Current session secret, if logged in.
    pub fn signing_secret(&self) -> Option<String> {
        self.signing_secret.read().expect("Credential lock poisoned").clone()
    }

    /// Current session payload key, if any.
    pub fn encryption_key(&self) -> Option<PayloadKey> {
        *self.encryption_key.read().expect("Credential lock poisoned")
    }

    /// Forgets all secret material.
    pub fn clear(&self) {
        *self.signing_secret.write().expect("Credential lock poisoned") = None;
        *self.encryption_key.write().expect("Credential lock poisoned") = None;
    }
}

impl fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialStore")
            .field("has_signing_secret", &self.signing_secret().is_some())
            .field("has_encryption_key", &self.encryption_key().is_some())
            .finish()
    }
}

/// Persisted bearer token.
pub struct TokenStore {
    store: Arc<dyn KeyValueStore>,
}

impl TokenStore {
    /// Wraps the host store.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// The stored token. Storage errors read as "no token".
    pub async fn token(&self) -> Option<String> {
        match self.store.get(TOKEN_KEY).await {
            Ok(token) => token.filter(|t| !t.is_empty()),
            Err(e) => {
                log::warn!("Token read failed: {}", e);
                None
            }
        }
    }

    /// Persists a new token.
    pub async fn set(&self, token: &str) {
        if let Err(e) = self.store.set(TOKEN_KEY, token).await {
            log::warn!("Token write failed: {}", e);
        }
    }

    /// Removes the token.
    pub async fn clear(&self) {
        if let Err(e) = self.store.remove(TOKEN_KEY).await {
            log::warn!("Token removal failed: {}", e);
        }
    }
}
