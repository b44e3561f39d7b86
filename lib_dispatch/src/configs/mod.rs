//! # Configuration Modules
//!
//! Layered dispatcher settings (defaults, JSON file, environment, CLI).

/// Provides dispatcher settings loading and merging.
pub mod config_sys;
