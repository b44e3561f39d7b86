//! # lib_dispatch
//!
//! Outbound request dispatch layer of the storefront client. Pages and
//! business collaborators call [`Dispatcher::request`] (or one of its
//! `get`/`post`/`put`/`delete`/`upload` wrappers); the dispatcher takes care
//! of throttling, caching, signing, prioritised bounded concurrency and retry,
//! and hands physical I/O to a pluggable [`TransportAdapter`].
//!
//! Folder-based feature gating:
//! - `retrieve`: reqwest backed transport.
//! - `connections`: Redis backed key-value store.
//! - `loggers`: fern stdout + file logging setup.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

pub mod configs;
pub mod connections;
pub mod core;
#[cfg(feature = "loggers")]
pub mod loggers;
#[cfg(feature = "retrieve")]
pub mod retrieve;

pub use crate::configs::config_sys::{load_settings, load_settings_from, resolve_settings, Settings, SettingsError};
pub use crate::connections::kv_store::{KeyValueStore, MemoryStore, StoreError};
pub use crate::core::credentials::SessionGrant;
pub use crate::core::*;
