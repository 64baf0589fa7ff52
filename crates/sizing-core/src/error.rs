//! Error types for provider and cache operations.
//!
//! This module defines [`SizingError`]. Only [`SizingError::InvalidParameter`]
//! and [`SizingError::Configuration`] ever reach callers of the orchestrator;
//! provider and storage failures are absorbed and turned into fall-through or
//! a disclosed low-confidence answer.

use thiserror::Error;

/// Errors that can occur while querying providers or touching the cache.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SizingError {
    /// Provider credentials or configuration are missing.
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// A provider rejected the request because its quota is exhausted.
    #[error("Rate limited by {provider}: retry after {retry_after:?}")]
    ProviderRateLimited {
        /// The provider that rate limited the request.
        provider: String,
        /// Suggested time to wait before retrying.
        retry_after: Option<std::time::Duration>,
    },

    /// A provider call failed in transport or while decoding its response.
    #[error("Provider {provider} failed: {message}")]
    Provider {
        /// The provider that failed.
        provider: String,
        /// Description of the failure.
        message: String,
    },

    /// Network-related errors (connection failures, timeouts, etc.).
    #[error("Network error: {0}")]
    Network(String),

    /// Error parsing a provider payload or a stored cache record.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Durable tier I/O failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// An invalid query parameter was provided by the caller.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// The cache or orchestrator was configured inconsistently.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl SizingError {
    /// Returns `true` if this error signals an exhausted provider quota.
    #[must_use]
    pub const fn is_rate_limited(&self) -> bool {
        matches!(self, Self::ProviderRateLimited { .. })
    }
}

/// Result type alias using [`SizingError`].
pub type Result<T> = std::result::Result<T, SizingError>;
