//! Provider adapter trait and identifier matching.
//!
//! This module defines:
//!
//! - [`ProviderId`] - The closed set of provider identities
//! - [`IdentifierPattern`] - Which identifiers a provider is the natural source for
//! - [`SourceProvider`] - The capability set every adapter exposes

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug};

use crate::types::{QueryContext, RawResult};

/// Identity of a data provider.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderId {
    /// Alpha Vantage company overviews.
    AlphaVantage,
    /// Financial Modeling Prep company profiles.
    Fmp,
    /// Federal Reserve Economic Data series.
    Fred,
    /// Bureau of Labor Statistics industry series.
    Bls,
    /// US Census Bureau economic census.
    Census,
    /// World Bank indicators.
    WorldBank,
    /// OECD statistics.
    Oecd,
    /// IMF datasets.
    Imf,
    /// Any other adapter, named explicitly.
    Custom(String),
}

impl ProviderId {
    /// Returns the provider's cache namespace and display name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::AlphaVantage => "alpha_vantage",
            Self::Fmp => "fmp",
            Self::Fred => "fred",
            Self::Bls => "bls",
            Self::Census => "census",
            Self::WorldBank => "world_bank",
            Self::Oecd => "oecd",
            Self::Imf => "imf",
            Self::Custom(name) => name,
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shape of identifier a provider is the natural source for.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierPattern {
    /// Uppercase ASCII ticker of 2 to 5 letters (e.g., `AAPL`).
    Ticker,
    /// Numeric industry code of 2 to 6 digits (e.g., NAICS `5112`).
    IndustryCode,
    /// Free-text identifiers containing any of these words (case-insensitive).
    Keywords(Vec<String>),
    /// Every identifier.
    Any,
}

impl IdentifierPattern {
    /// Returns `true` if `identifier` has this pattern's shape.
    #[must_use]
    pub fn matches(&self, identifier: &str) -> bool {
        match self {
            Self::Ticker => {
                (2..=5).contains(&identifier.len())
                    && identifier.chars().all(|c| c.is_ascii_uppercase())
            }
            Self::IndustryCode => {
                (2..=6).contains(&identifier.len())
                    && identifier.chars().all(|c| c.is_ascii_digit())
            }
            Self::Keywords(words) => {
                let haystack = identifier.to_lowercase();
                words
                    .iter()
                    .any(|w| !w.is_empty() && haystack.contains(&w.to_lowercase()))
            }
            Self::Any => true,
        }
    }
}

/// A third-party data source adapter.
///
/// Adapters are stateless from the orchestrator's point of view: they turn an
/// identifier and context into a single call and report what came back. Any
/// credential or quota bookkeeping stays inside the adapter.
#[async_trait]
pub trait SourceProvider: Send + Sync + Debug {
    /// Returns the identity of this provider.
    fn id(&self) -> ProviderId;

    /// Returns `true` if credentials are configured and the provider is enabled.
    fn is_available(&self) -> bool;

    /// Fetches the raw answer for `identifier` in `context`.
    ///
    /// Transport and decode failures are returned as `Err`; an answer with no
    /// data is an `Ok` response with an empty payload.
    async fn fetch(&self, identifier: &str, context: &QueryContext) -> RawResult;
}
