//! # Connections Module
//!
//! This module handles the host storage the dispatcher persists into:
//! the key-value seam, its in-memory default and an optional Redis backend.

/// Key-value storage trait and the in-memory backend.
pub mod kv_store;

/// Module for Redis backed key-value storage.
#[cfg(feature = "connections")]
pub mod cache_redis;
