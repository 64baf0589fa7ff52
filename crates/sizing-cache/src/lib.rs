#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/sizing/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! Caching implementations for market-sizing data providers.
//!
//! This crate provides the tiers and the facade combining them:
//!
//! - [`VolatileStore`] - Fast in-memory tier, lost on restart
//! - [`SqliteStore`] - Persistent SQLite-based tier (default, requires `sqlite` feature)
//! - [`FileStore`] - Persistent tier with one file per key
//! - [`CacheService`] - Volatile-primary, durable-secondary facade
//! - [`LocalBroadcaster`] - In-process invalidation broadcaster

/// In-process invalidation broadcaster.
pub mod broadcast;
/// Cache configuration.
pub mod config;
/// One-file-per-key durable store.
pub mod file;
/// In-memory volatile store.
pub mod memory;
/// Hybrid cache facade.
pub mod service;

/// SQLite-based durable store.
#[cfg(feature = "sqlite")]
pub mod sqlite;

// Re-export the traits for convenience
pub use sizing_core::{DurableStore, InvalidationBroadcaster};

// Re-export implementations
pub use broadcast::LocalBroadcaster;
pub use config::{CacheBackend, CacheConfig, DurableMedium};
pub use file::FileStore;
pub use memory::VolatileStore;
pub use service::{CacheService, CacheStats};

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
