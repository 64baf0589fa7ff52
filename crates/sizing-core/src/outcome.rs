//! Response-outcome classification and TTL policy.
//!
//! [`classify`] maps an adapter's [`RawResult`] to an [`OutcomeKind`], and
//! [`TtlPolicy`] picks how long that outcome is retained for a given provider.
//! Failures are kept for a short time so a throttled or broken provider is
//! retried automatically once the entry lapses.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

use crate::types::{OutcomeKind, ProviderResponse, RawResult};

/// Payload fields providers use to carry throttling notices.
const RATE_LIMIT_FIELDS: &[&str] = &["Note", "Information", "Error Message", "message", "error"];

/// Phrases that identify a throttling notice (matched case-insensitively).
const RATE_LIMIT_PHRASES: &[&str] = &[
    "rate limit",
    "call frequency",
    "limit reach",
    "too many requests",
    "quota",
];

const HTTP_TOO_MANY_REQUESTS: u16 = 429;
const HTTP_NOT_FOUND: u16 = 404;

/// Classifies a provider call result.
///
/// - an error carrying a rate-limit signal is [`OutcomeKind::RateLimited`]
/// - any other error is [`OutcomeKind::Error`]
/// - HTTP 429 or a throttling notice in the payload is [`OutcomeKind::RateLimited`]
/// - HTTP 404 or an empty/absent payload is [`OutcomeKind::NoData`]
/// - any other HTTP error status is [`OutcomeKind::Error`]
/// - everything else is [`OutcomeKind::Success`]
#[must_use]
pub fn classify(raw: &RawResult) -> OutcomeKind {
    match raw {
        Err(e) if e.is_rate_limited() => OutcomeKind::RateLimited,
        Err(_) => OutcomeKind::Error,
        Ok(response) => classify_response(response),
    }
}

fn classify_response(response: &ProviderResponse) -> OutcomeKind {
    match response.status {
        Some(HTTP_TOO_MANY_REQUESTS) => return OutcomeKind::RateLimited,
        Some(HTTP_NOT_FOUND) => return OutcomeKind::NoData,
        Some(status) if status >= 400 => return OutcomeKind::Error,
        _ => {}
    }

    match &response.payload {
        Some(payload) if has_rate_limit_marker(payload) => OutcomeKind::RateLimited,
        Some(payload) if !is_empty_payload(payload) => OutcomeKind::Success,
        _ => OutcomeKind::NoData,
    }
}

fn has_rate_limit_marker(payload: &serde_json::Value) -> bool {
    let Some(object) = payload.as_object() else {
        return false;
    };
    RATE_LIMIT_FIELDS
        .iter()
        .filter_map(|field| object.get(*field).and_then(serde_json::Value::as_str))
        .any(|text| {
            let text = text.to_lowercase();
            RATE_LIMIT_PHRASES.iter().any(|phrase| text.contains(phrase))
        })
}

fn is_empty_payload(payload: &serde_json::Value) -> bool {
    match payload {
        serde_json::Value::Null => true,
        serde_json::Value::String(s) => s.trim().is_empty(),
        serde_json::Value::Array(items) => items.iter().all(is_empty_payload),
        serde_json::Value::Object(fields) => fields.is_empty(),
        serde_json::Value::Bool(_) | serde_json::Value::Number(_) => false,
    }
}

/// Per-outcome cache lifetimes, in milliseconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutcomeTtls {
    /// Lifetime of a successful value.
    pub success_ms: u64,
    /// Lifetime of a confirmed "no data" answer.
    pub no_data_ms: u64,
    /// Lifetime of a rate-limit marker.
    pub rate_limited_ms: u64,
    /// Lifetime of an unexpected failure.
    pub error_ms: u64,
}

impl Default for OutcomeTtls {
    fn default() -> Self {
        Self {
            success_ms: 3_600_000,
            no_data_ms: 300_000,
            rate_limited_ms: 60_000,
            error_ms: 30_000,
        }
    }
}

impl OutcomeTtls {
    /// Returns the lifetime for `outcome`.
    #[must_use]
    pub const fn for_outcome(&self, outcome: OutcomeKind) -> u64 {
        match outcome {
            OutcomeKind::Success => self.success_ms,
            OutcomeKind::NoData => self.no_data_ms,
            OutcomeKind::RateLimited => self.rate_limited_ms,
            OutcomeKind::Error => self.error_ms,
        }
    }

    /// Caps every failure lifetime at the success lifetime.
    #[must_use]
    pub fn clamped(self) -> Self {
        Self {
            success_ms: self.success_ms,
            no_data_ms: self.no_data_ms.min(self.success_ms),
            rate_limited_ms: self.rate_limited_ms.min(self.success_ms),
            error_ms: self.error_ms.min(self.success_ms),
        }
    }
}

/// Mapping from `(provider, outcome)` to a cache lifetime.
///
/// Providers without an override use the defaults. Lookups are always
/// clamped so no failure outlives a confirmed value for the same provider.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TtlPolicy {
    /// Lifetimes used for providers without an override.
    pub defaults: OutcomeTtls,
    /// Per-provider lifetimes, keyed by provider name.
    pub overrides: HashMap<String, OutcomeTtls>,
}

impl TtlPolicy {
    /// Creates a policy with the given defaults and no overrides.
    #[must_use]
    pub fn new(defaults: OutcomeTtls) -> Self {
        Self {
            defaults: Self::checked("default", defaults),
            overrides: HashMap::new(),
        }
    }

    /// Adds or replaces the lifetimes for one provider.
    #[must_use]
    pub fn with_override(mut self, provider: impl Into<String>, ttls: OutcomeTtls) -> Self {
        let provider = provider.into();
        let ttls = Self::checked(&provider, ttls);
        self.overrides.insert(provider, ttls);
        self
    }

    /// Returns the lifetime for `outcome` as reported by `provider`.
    #[must_use]
    pub fn ttl_for(&self, provider: &str, outcome: OutcomeKind) -> u64 {
        self.overrides
            .get(provider)
            .unwrap_or(&self.defaults)
            .clamped()
            .for_outcome(outcome)
    }

    fn checked(provider: &str, ttls: OutcomeTtls) -> OutcomeTtls {
        let clamped = ttls.clamped();
        if clamped != ttls {
            warn!(
                provider,
                success_ms = ttls.success_ms,
                "Failure TTL exceeds success TTL, clamping"
            );
        }
        clamped
    }
}
