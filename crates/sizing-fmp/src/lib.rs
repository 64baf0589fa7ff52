#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/sizing/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! Financial Modeling Prep (FMP) market capitalisation provider.
//!
//! This crate implements [`SourceProvider`] for the
//! [Financial Modeling Prep](https://financialmodelingprep.com/) API.
//!
//! # Usage
//!
//! ```rust,ignore
//! use sizing_fmp::FmpProvider;
//! use sizing_core::{QueryContext, SourceProvider, classify};
//!
//! #[tokio::main]
//! async fn main() {
//!     let provider = FmpProvider::new("your_api_key");
//!     let raw = provider.fetch("AAPL", &QueryContext::default()).await;
//!     println!("{}", classify(&raw));
//! }
//! ```

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use sizing_core::{
    ProviderId, ProviderResponse, QueryContext, RawResult, Result, SizingError, SourceProvider,
};
use std::fmt;
use std::time::Duration;
use tracing::{debug, instrument};

/// Base URL for the FMP stable API.
const FMP_BASE_URL: &str = "https://financialmodelingprep.com/stable";

/// Environment variable holding the API key.
pub const FMP_API_KEY_ENV: &str = "FMP_API_KEY";

/// Financial Modeling Prep provider.
///
/// Answers ticker identifiers with the company's market capitalisation. The
/// payload handed to the orchestrator is
/// `{"symbol", "value", "currency", "companyName", "industry"}`; `value` is the
/// market capitalisation in `currency`.
#[derive(Clone)]
pub struct FmpProvider {
    client: Client,
    api_key: String,
    base_url: String,
}

impl fmt::Debug for FmpProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FmpProvider")
            .field("api_key", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl FmpProvider {
    /// Create a new FMP provider with the given API key.
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_client(Client::new(), api_key)
    }

    /// Create a new FMP provider with a custom HTTP client.
    ///
    /// Use this to set request timeouts; the orchestrator does not bound
    /// provider calls itself.
    #[must_use]
    pub fn with_client(client: Client, api_key: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            base_url: FMP_BASE_URL.to_string(),
        }
    }

    /// Create a provider using the key in `FMP_API_KEY`.
    ///
    /// A missing variable yields a provider that reports itself unavailable.
    #[must_use]
    pub fn from_env() -> Self {
        Self::new(std::env::var(FMP_API_KEY_ENV).unwrap_or_default())
    }

    /// Points the provider at a different API root.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Build a GET request for `endpoint`.
    ///
    /// Query values are form-encoded, so identifiers containing `&`, `#` or
    /// spaces reach FMP intact. The API key is appended last.
    fn request(&self, endpoint: &str, query: &[(&str, &str)]) -> RequestBuilder {
        self.client
            .get(format!("{}/{endpoint}", self.base_url))
            .query(query)
            .query(&[("apikey", self.api_key.as_str())])
    }

    /// Make a GET request, returning the status and decoded body.
    ///
    /// 404 and empty bodies are answers, not errors: they come back with no
    /// payload so they classify as "no data".
    async fn get(&self, endpoint: &str, query: &[(&str, &str)]) -> Result<ProviderResponse> {
        debug!("FMP request: {}", endpoint);

        let response = self
            .request(endpoint, query)
            .send()
            .await
            .map_err(|e| SizingError::Network(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(SizingError::ProviderRateLimited {
                provider: ProviderId::Fmp.to_string(),
                retry_after,
            });
        }

        if status == StatusCode::NOT_FOUND {
            return Ok(ProviderResponse::empty().with_status(status.as_u16()));
        }

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(SizingError::Provider {
                provider: ProviderId::Fmp.to_string(),
                message: format!("HTTP {status}: {text}"),
            });
        }

        let text = response
            .text()
            .await
            .map_err(|e| SizingError::Network(e.to_string()))?;

        if text.trim().is_empty() {
            return Ok(ProviderResponse::empty().with_status(status.as_u16()));
        }

        let body: Value =
            serde_json::from_str(&text).map_err(|e| SizingError::Parse(format!("{e}: {text}")))?;
        Ok(ProviderResponse::with_payload(body).with_status(status.as_u16()))
    }
}

#[async_trait]
impl SourceProvider for FmpProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Fmp
    }

    fn is_available(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    #[instrument(skip(self, context), fields(provider = "fmp"))]
    async fn fetch(&self, identifier: &str, context: &QueryContext) -> RawResult {
        if !self.is_available() {
            return Err(SizingError::ProviderUnavailable(
                "FMP API key not configured".to_string(),
            ));
        }

        let response = self.get("profile", &[("symbol", identifier)]).await?;
        let Some(body) = response.payload else {
            return Ok(response);
        };

        let profile = market_cap_from_profile(body)?;
        if let Some(currency) = profile
            .as_ref()
            .and_then(|p| p.get("currency"))
            .and_then(Value::as_str)
            .filter(|c| !c.eq_ignore_ascii_case(&context.currency))
        {
            debug!(
                reported = currency,
                requested = %context.currency,
                "FMP reports market cap in a different currency"
            );
        }

        Ok(ProviderResponse {
            status: response.status,
            payload: profile,
        })
    }
}

/// FMP Company Profile response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FmpProfile {
    symbol: String,
    #[serde(default)]
    market_cap: f64,
    #[serde(default)]
    company_name: String,
    #[serde(default)]
    industry: String,
    #[serde(default)]
    currency: String,
}

/// Reduces a `profile` response to the market-cap payload.
///
/// Returns `Ok(None)` when FMP knows no such company or reports no positive
/// market cap. FMP signals quota exhaustion and bad keys with an
/// `"Error Message"` object rather than a status code.
fn market_cap_from_profile(body: Value) -> Result<Option<Value>> {
    if let Some(message) = body.get("Error Message").and_then(Value::as_str) {
        let lowered = message.to_lowercase();
        if lowered.contains("limit reach") || lowered.contains("too many") {
            return Err(SizingError::ProviderRateLimited {
                provider: ProviderId::Fmp.to_string(),
                retry_after: None,
            });
        }
        return Err(SizingError::Provider {
            provider: ProviderId::Fmp.to_string(),
            message: message.to_string(),
        });
    }

    let profiles: Vec<FmpProfile> =
        serde_json::from_value(body).map_err(|e| SizingError::Parse(e.to_string()))?;

    Ok(profiles
        .into_iter()
        .find(|p| p.market_cap.is_finite() && p.market_cap > 0.0)
        .map(|p| {
            json!({
                "symbol": p.symbol,
                "value": p.market_cap,
                "currency": if p.currency.is_empty() { "USD".to_string() } else { p.currency },
                "companyName": p.company_name,
                "industry": p.industry,
            })
        }))
}
