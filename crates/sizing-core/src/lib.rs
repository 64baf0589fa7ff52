#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/sizing/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! Core traits and types for cached market-sizing data providers.
//!
//! This crate provides the foundational abstractions:
//!
//! - [`SourceProvider`](provider::SourceProvider) - Adapter trait for third-party data sources
//! - [`DurableStore`](cache::DurableStore) - Persistent cache tier abstraction
//! - [`InvalidationBroadcaster`](cache::InvalidationBroadcaster) - Cross-instance invalidation
//! - [`CacheKey`](key::CacheKey) - Order-independent cache key builder
//! - [`classify`](outcome::classify) and [`TtlPolicy`](outcome::TtlPolicy) - Outcome-driven retention

/// Durable store and invalidation broadcaster traits.
pub mod cache;
/// Error types for provider and cache operations.
pub mod error;
/// Deterministic cache key construction.
pub mod key;
/// Response-outcome classification and TTL policy.
pub mod outcome;
/// Provider adapter trait and identifier matching.
pub mod provider;
/// Core data types (cache entries, outcomes, query context).
pub mod types;

// Re-export commonly used items at crate root
pub use cache::{DurableStore, InvalidationBroadcaster, InvalidationMessage, InvalidationTarget};
pub use error::{Result, SizingError};
pub use key::{CacheKey, ParamValue};
pub use outcome::{OutcomeTtls, TtlPolicy, classify};
pub use provider::{IdentifierPattern, ProviderId, SourceProvider};
pub use types::{CacheEntry, OutcomeKind, ProviderResponse, QueryContext, RawResult};
