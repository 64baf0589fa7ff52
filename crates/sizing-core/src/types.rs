//! Core data types for cached provider answers.
//!
//! This module defines the fundamental data structures:
//!
//! - [`OutcomeKind`] - Classification of a provider call result
//! - [`CacheEntry`] - A cached provider answer with its retention window
//! - [`QueryContext`] - Region and currency context of a market-size query
//! - [`ProviderResponse`] / [`RawResult`] - What an adapter hands back

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, SizingError};

/// Classification of a provider call result.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutcomeKind {
    /// The provider returned a usable, non-empty payload.
    Success,
    /// The provider confirmed it has no data for the query.
    NoData,
    /// The provider refused the call because its quota is exhausted.
    RateLimited,
    /// The call failed in transport or while decoding.
    Error,
}

impl OutcomeKind {
    /// Returns the outcome as a stable string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "Success",
            Self::NoData => "NoData",
            Self::RateLimited => "RateLimited",
            Self::Error => "Error",
        }
    }

    /// Returns `true` for outcomes that are facts about the data rather than
    /// about the provider's health.
    #[must_use]
    pub const fn is_definitive(&self) -> bool {
        matches!(self, Self::Success | Self::NoData)
    }
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A cached provider answer.
///
/// `stored_at + ttl_ms` is the expiry instant. An entry with `value = None`
/// and `outcome = NoData` is a valid cached fact, distinct from a cache miss.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// The cached payload, absent for no-data and failure outcomes.
    pub value: Option<serde_json::Value>,
    /// When the entry was written.
    pub stored_at: DateTime<Utc>,
    /// Lifetime of the entry in milliseconds.
    pub ttl_ms: u64,
    /// Outcome of the call that produced the entry.
    pub outcome: OutcomeKind,
}

impl CacheEntry {
    /// Creates an entry stamped with the current time.
    #[must_use]
    pub fn new(value: Option<serde_json::Value>, ttl_ms: u64, outcome: OutcomeKind) -> Self {
        Self {
            value,
            stored_at: Utc::now(),
            ttl_ms,
            outcome,
        }
    }

    /// Returns the instant after which the entry is stale.
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        let ttl = TimeDelta::try_milliseconds(i64::try_from(self.ttl_ms).unwrap_or(i64::MAX))
            .unwrap_or(TimeDelta::MAX);
        self.stored_at
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Returns `true` while `now < stored_at + ttl_ms`.
    #[must_use]
    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at()
    }

    /// Returns `true` if the entry has not yet expired.
    #[must_use]
    pub fn is_fresh(&self) -> bool {
        self.is_fresh_at(Utc::now())
    }

    /// Returns the milliseconds left before expiry at `now`, zero once stale.
    #[must_use]
    pub fn remaining_ms_at(&self, now: DateTime<Utc>) -> u64 {
        u64::try_from((self.expires_at() - now).num_milliseconds()).unwrap_or(0)
    }

    /// Returns the milliseconds left before the entry expires.
    #[must_use]
    pub fn remaining_ms(&self) -> u64 {
        self.remaining_ms_at(Utc::now())
    }
}

/// Region and currency context of a market-size query.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryContext {
    /// Region code (e.g., "US", "EU", "global").
    pub region: String,
    /// ISO 4217 currency code the value should be expressed in.
    pub currency: String,
}

impl Default for QueryContext {
    fn default() -> Self {
        Self {
            region: "US".to_string(),
            currency: "USD".to_string(),
        }
    }
}

impl QueryContext {
    /// Creates a new context, uppercasing the currency code.
    #[must_use]
    pub fn new(region: impl Into<String>, currency: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            currency: currency.into().to_uppercase(),
        }
    }

    /// Checks the context for malformed values.
    ///
    /// # Errors
    /// Returns [`SizingError::InvalidParameter`] if the region is blank or the
    /// currency is not a three-letter code.
    pub fn validate(&self) -> Result<()> {
        if self.region.trim().is_empty() {
            return Err(SizingError::InvalidParameter(
                "region must not be empty".to_string(),
            ));
        }
        if self.currency.len() != 3 || !self.currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(SizingError::InvalidParameter(format!(
                "currency must be a three-letter code, got {:?}",
                self.currency
            )));
        }
        Ok(())
    }

    /// Returns the canonical form used for cache keys and adapter calls:
    /// the region trimmed and the currency trimmed and uppercased.
    ///
    /// Contexts built as struct literals skip [`QueryContext::new`], so
    /// callers normalize before keying on them.
    #[must_use]
    pub fn normalized(&self) -> Self {
        Self {
            region: self.region.trim().to_string(),
            currency: self.currency.trim().to_uppercase(),
        }
    }
}

/// Successful response from a provider adapter.
///
/// Adapters hand back the HTTP status (when they have one) and the decoded
/// payload; classification happens in [`classify`](crate::outcome::classify).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// HTTP status code of the underlying call, if any.
    pub status: Option<u16>,
    /// Decoded payload, absent when the provider returned nothing.
    pub payload: Option<serde_json::Value>,
}

impl ProviderResponse {
    /// Creates a response carrying a payload.
    #[must_use]
    pub fn with_payload(payload: serde_json::Value) -> Self {
        Self {
            status: None,
            payload: Some(payload),
        }
    }

    /// Creates a response with no payload.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            status: None,
            payload: None,
        }
    }

    /// Sets the HTTP status code.
    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }
}

/// What a provider adapter returns: a response, or the error it raised.
pub type RawResult = Result<ProviderResponse>;
