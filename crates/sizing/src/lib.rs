#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/sizing/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! Cached, multi-provider market-sizing data orchestration.
//!
//! This crate re-exports the core types, the cache tiers and the provider
//! implementations, and provides the [`ProviderOrchestrator`] that walks
//! registered providers in priority order behind a two-tier cache.
//!
//! # Features
//!
//! - `fmp` - Financial Modeling Prep provider
//! - `cache-sqlite` - SQLite durable cache tier
//!
//! # Example
//!
//! ```rust,ignore
//! use sizing::{CacheConfig, ProviderOrchestrator, QueryContext};
//!
//! #[tokio::main]
//! async fn main() -> sizing::Result<()> {
//!     let orchestrator = ProviderOrchestrator::from_config(&CacheConfig::from_env()?, None)?
//!         .with_fmp_from_env();
//!     let _maintenance = orchestrator.spawn_maintenance();
//!
//!     let answer = orchestrator.resolve("AAPL", &QueryContext::default()).await?;
//!     if answer.is_mock() {
//!         println!("estimate: {:?}", answer.market_size());
//!     } else {
//!         println!("{:?} from {}", answer.market_size(), answer.source);
//!     }
//!     Ok(())
//! }
//! ```

// Core types and traits
pub use sizing_core::*;

// Cache implementations
#[cfg(feature = "cache-sqlite")]
pub use sizing_cache::SqliteStore;
pub use sizing_cache::{
    CacheBackend, CacheConfig, CacheService, CacheStats, DurableMedium, FileStore,
    LocalBroadcaster, VolatileStore,
};

// Providers
#[cfg(feature = "fmp")]
pub use sizing_fmp::FmpProvider;

mod mock;
pub use mock::{DEFAULT_MOCK_VALUE, MOCK_SOURCE, MockTable};

mod orchestrator;
#[cfg(feature = "fmp")]
pub use orchestrator::FMP_PRIORITY;
pub use orchestrator::{
    MARKET_SIZE_NAMESPACE, ProviderAttempt, ProviderDescriptor, ProviderOrchestrator, Resolution,
    SkipReason,
};
