//! Provider orchestrator: a cached, priority-ordered provider waterfall.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, trace, warn};

use sizing_cache::{CacheConfig, CacheService};
use sizing_core::{
    CacheKey, IdentifierPattern, InvalidationBroadcaster, OutcomeKind, ProviderId, QueryContext,
    Result, SizingError, SourceProvider, TtlPolicy, classify,
};

use crate::mock::{MOCK_SOURCE, MockTable};

/// Cache namespace of whole resolutions.
pub const MARKET_SIZE_NAMESPACE: &str = "market_size";

/// Priority given to the FMP provider by [`ProviderOrchestrator::with_fmp`].
#[cfg(feature = "fmp")]
pub const FMP_PRIORITY: u32 = 10;

/// A registered provider and where it sits in the waterfall.
#[derive(Clone, Debug)]
pub struct ProviderDescriptor {
    /// Lower runs first.
    pub priority: u32,
    /// Identifiers this provider is the natural source for.
    pub pattern: IdentifierPattern,
    /// The adapter itself.
    pub adapter: Arc<dyn SourceProvider>,
}

impl ProviderDescriptor {
    /// Create a descriptor.
    #[must_use]
    pub fn new(
        adapter: Arc<dyn SourceProvider>,
        priority: u32,
        pattern: IdentifierPattern,
    ) -> Self {
        Self {
            priority,
            pattern,
            adapter,
        }
    }

    /// Returns the provider's name, which is also its cache namespace.
    #[must_use]
    pub fn name(&self) -> String {
        self.adapter.id().to_string()
    }
}

/// Why a provider was not called.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Credentials missing or provider disabled.
    Unavailable,
}

/// Record of one provider considered during a resolution.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProviderAttempt {
    /// Provider name.
    pub provider: String,
    /// Set when the provider was not considered at all.
    pub skipped: Option<SkipReason>,
    /// Outcome of the call, or of the cached entry standing in for it.
    pub outcome: Option<OutcomeKind>,
    /// Whether the outcome came from the cache instead of a call.
    pub from_cache: bool,
    /// Error message when the call failed.
    pub error: Option<String>,
}

impl ProviderAttempt {
    fn skipped(provider: String, reason: SkipReason) -> Self {
        Self {
            provider,
            skipped: Some(reason),
            outcome: None,
            from_cache: false,
            error: None,
        }
    }
}

/// Answer to a [`ProviderOrchestrator::resolve`] call.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Resolution {
    /// Payload of the answering provider; `None` for a confirmed absence.
    pub value: Option<Value>,
    /// Name of the answering provider, or `"mock"` for an estimate.
    pub source: String,
    /// Outcome of the answer.
    pub outcome: OutcomeKind,
    /// Whether the whole resolution was served from cache.
    pub cached: bool,
    /// Providers considered, in order. Empty for cached resolutions.
    pub attempts: Vec<ProviderAttempt>,
}

impl Resolution {
    /// Returns `true` if this is a synthetic estimate rather than provider data.
    #[must_use]
    pub fn is_mock(&self) -> bool {
        self.source == MOCK_SOURCE
    }

    /// Returns the numeric market size carried by the value.
    ///
    /// Accepts either a bare number or an object with a numeric `value` field.
    #[must_use]
    pub fn market_size(&self) -> Option<f64> {
        match self.value.as_ref()? {
            Value::Number(n) => n.as_f64(),
            Value::Object(fields) => fields.get("value").and_then(Value::as_f64),
            _ => None,
        }
    }
}

/// Resolution as stored under the `market_size` namespace.
#[derive(Debug, Serialize, Deserialize)]
struct CachedResolution {
    source: String,
    value: Option<Value>,
}

/// Resolves market-size queries across prioritized, cached providers.
///
/// For each query the orchestrator:
///
/// 1. returns a cached Success or confirmed NoData resolution if one is fresh
/// 2. walks providers whose pattern matches the identifier in ascending
///    priority, then the remaining providers in the same order
/// 3. skips unavailable providers, uses a provider's fresh cached outcome in
///    place of calling it, and otherwise calls it, classifies the result and
///    caches it with the lifetime the TTL policy assigns to that outcome
/// 4. stops at the first Success
///
/// If no provider succeeds but at least one confirmed it has no data, the
/// answer is that confirmed absence. Otherwise the answer is a deterministic
/// estimate with `source = "mock"`, which is never cached.
///
/// Provider calls within one resolution are strictly sequential. Concurrent
/// resolutions of the same query are not deduplicated.
///
/// # Example
///
/// ```rust,ignore
/// use sizing::{ProviderOrchestrator, QueryContext};
///
/// let orchestrator = ProviderOrchestrator::in_memory().with_fmp_from_env();
/// let answer = orchestrator.resolve("AAPL", &QueryContext::default()).await?;
/// println!("{} from {}", answer.market_size().unwrap_or_default(), answer.source);
/// ```
pub struct ProviderOrchestrator {
    providers: Vec<ProviderDescriptor>,
    cache: Arc<CacheService>,
    ttl: TtlPolicy,
    mock: MockTable,
    sweep_interval: Option<Duration>,
}

impl std::fmt::Debug for ProviderOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderOrchestrator")
            .field(
                "providers",
                &self
                    .providers
                    .iter()
                    .map(|d| (d.priority, d.name()))
                    .collect::<Vec<_>>(),
            )
            .field("cache", &self.cache.backend())
            .field("sweep_interval", &self.sweep_interval)
            .finish_non_exhaustive()
    }
}

impl ProviderOrchestrator {
    /// Create an orchestrator over `cache` with default TTLs and estimates.
    #[must_use]
    pub fn new(cache: Arc<CacheService>) -> Self {
        Self {
            providers: Vec::new(),
            cache,
            ttl: TtlPolicy::default(),
            mock: MockTable::default(),
            sweep_interval: None,
        }
    }

    /// Create an orchestrator with a private volatile-only cache.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(CacheService::volatile_only()))
    }

    /// Create an orchestrator whose cache and TTL policy come from `config`.
    ///
    /// # Errors
    /// Returns [`SizingError::Configuration`] if the cache cannot be built.
    pub fn from_config(
        config: &CacheConfig,
        broadcaster: Option<Arc<dyn InvalidationBroadcaster>>,
    ) -> Result<Self> {
        let cache = CacheService::from_config(config, broadcaster)?;
        let mut orchestrator = Self::new(Arc::new(cache)).with_ttl_policy(config.ttl.clone());
        orchestrator.sweep_interval = config.sweep_interval();
        Ok(orchestrator)
    }

    /// Sets the TTL policy.
    #[must_use]
    pub fn with_ttl_policy(mut self, ttl: TtlPolicy) -> Self {
        self.ttl = ttl;
        self
    }

    /// Sets the estimates used when no provider answers.
    #[must_use]
    pub fn with_mock_table(mut self, mock: MockTable) -> Self {
        self.mock = mock;
        self
    }

    /// Registers `adapter` at `priority` for identifiers matching `pattern`.
    #[must_use]
    pub fn with_provider(
        mut self,
        adapter: Arc<dyn SourceProvider>,
        priority: u32,
        pattern: IdentifierPattern,
    ) -> Self {
        self.register(ProviderDescriptor::new(adapter, priority, pattern));
        self
    }

    /// Registers a provider.
    ///
    /// Providers with equal priority keep their registration order.
    pub fn register(&mut self, descriptor: ProviderDescriptor) {
        debug!(
            provider = %descriptor.name(),
            priority = descriptor.priority,
            pattern = ?descriptor.pattern,
            "Registering provider"
        );
        let at = self
            .providers
            .partition_point(|d| d.priority <= descriptor.priority);
        self.providers.insert(at, descriptor);
    }

    /// Add the Financial Modeling Prep provider for ticker identifiers.
    #[cfg(feature = "fmp")]
    #[must_use]
    pub fn with_fmp(self, api_key: &str) -> Self {
        self.with_provider(
            Arc::new(sizing_fmp::FmpProvider::new(api_key)),
            FMP_PRIORITY,
            IdentifierPattern::Ticker,
        )
    }

    /// Add the Financial Modeling Prep provider using `FMP_API_KEY`.
    #[cfg(feature = "fmp")]
    #[must_use]
    pub fn with_fmp_from_env(self) -> Self {
        self.with_provider(
            Arc::new(sizing_fmp::FmpProvider::from_env()),
            FMP_PRIORITY,
            IdentifierPattern::Ticker,
        )
    }

    /// Returns the registered providers in waterfall priority order.
    #[must_use]
    pub fn providers(&self) -> &[ProviderDescriptor] {
        &self.providers
    }

    /// Returns the cache service.
    #[must_use]
    pub const fn cache(&self) -> &Arc<CacheService> {
        &self.cache
    }

    /// Spawns the cache's background tasks: the volatile expiry sweep (when
    /// configured) and the sibling invalidation listener (when a broadcaster
    /// is attached).
    #[must_use = "dropping the handles detaches the tasks"]
    pub fn spawn_maintenance(&self) -> Vec<JoinHandle<()>> {
        let sweeper = self
            .sweep_interval
            .and_then(|interval| self.cache.spawn_sweeper(interval));
        let listener = self.cache.listen_for_invalidations();
        sweeper.into_iter().chain(listener).collect()
    }

    /// Resolves `identifier` in `context`.
    ///
    /// # Errors
    /// Returns [`SizingError::InvalidParameter`] for a blank identifier or a
    /// malformed context. Provider and storage failures never surface here.
    #[instrument(skip(self, context), fields(region = %context.region, currency = %context.currency))]
    pub async fn resolve(&self, identifier: &str, context: &QueryContext) -> Result<Resolution> {
        let identifier = identifier.trim();
        if identifier.is_empty() {
            return Err(SizingError::InvalidParameter(
                "identifier must not be empty".to_string(),
            ));
        }
        let context = &context.normalized();
        context.validate()?;

        let params = query_params(identifier, context);
        let aggregate_key = CacheKey::build(MARKET_SIZE_NAMESPACE, params);

        if let Some(resolution) = self.cached_resolution(&aggregate_key).await {
            return Ok(resolution);
        }

        let mut attempts = Vec::new();
        let mut confirmed_empty: Option<String> = None;
        // Shortest remaining lifetime among the providers consulted so far.
        let mut shortest_ms = u64::MAX;

        for descriptor in self.waterfall(identifier) {
            let name = descriptor.name();
            if !descriptor.adapter.is_available() {
                debug!(provider = %name, "Provider unavailable, skipping");
                attempts.push(ProviderAttempt::skipped(name, SkipReason::Unavailable));
                continue;
            }

            let provider_key = CacheKey::build(&name, params);
            let attempt = match self.cache.get(&provider_key).await {
                Some(entry) => {
                    trace!(provider = %name, outcome = %entry.outcome, "Using cached provider outcome");
                    let lifetime_ms = entry.remaining_ms();
                    AttemptResult {
                        outcome: entry.outcome,
                        value: entry.value,
                        lifetime_ms,
                        from_cache: true,
                        error: None,
                    }
                }
                None => self.call(descriptor, &name, identifier, context, &provider_key).await,
            };

            shortest_ms = shortest_ms.min(attempt.lifetime_ms);
            attempts.push(ProviderAttempt {
                provider: name.clone(),
                skipped: None,
                outcome: Some(attempt.outcome),
                from_cache: attempt.from_cache,
                error: attempt.error,
            });

            match attempt.outcome {
                OutcomeKind::Success => {
                    debug!(provider = %name, "Resolved");
                    let resolution = Resolution {
                        value: attempt.value,
                        source: name,
                        outcome: OutcomeKind::Success,
                        cached: false,
                        attempts,
                    };
                    self.store_resolution(&aggregate_key, &resolution, attempt.lifetime_ms)
                        .await;
                    return Ok(resolution);
                }
                OutcomeKind::NoData => {
                    debug!(provider = %name, "Provider has no data, trying next");
                    confirmed_empty = Some(name);
                }
                OutcomeKind::RateLimited | OutcomeKind::Error => {
                    debug!(provider = %name, outcome = %attempt.outcome, "Provider failed, trying next");
                }
            }
        }

        if let Some(source) = confirmed_empty {
            debug!(provider = %source, "No provider has data");
            let resolution = Resolution {
                value: None,
                source,
                outcome: OutcomeKind::NoData,
                cached: false,
                attempts,
            };
            // A provider that failed transiently must be retried once its
            // back-off lapses, so the absence lives no longer than that.
            self.store_resolution(&aggregate_key, &resolution, shortest_ms)
                .await;
            return Ok(resolution);
        }

        warn!(
            identifier,
            attempted = attempts.len(),
            "No provider could answer, returning mock estimate"
        );
        Ok(Resolution {
            value: Some(Value::from(self.mock.value_for(identifier))),
            source: MOCK_SOURCE.to_string(),
            outcome: OutcomeKind::Success,
            cached: false,
            attempts,
        })
    }

    /// Drops every cached answer for `identifier` in `context`, both the
    /// resolution and each provider's outcome.
    pub async fn invalidate(&self, identifier: &str, context: &QueryContext) {
        let context = context.normalized();
        let params = query_params(identifier.trim(), &context);
        self.cache
            .invalidate(&CacheKey::build(MARKET_SIZE_NAMESPACE, params))
            .await;
        for descriptor in &self.providers {
            self.cache
                .invalidate(&CacheKey::build(&descriptor.name(), params))
                .await;
        }
    }

    /// Drops every cached outcome of one provider, and all cached
    /// resolutions since any of them may have come from it.
    pub async fn invalidate_provider(&self, provider: &ProviderId) {
        self.cache
            .invalidate_pattern(&CacheKey::namespace_prefix(provider.as_str()))
            .await;
        self.cache
            .invalidate_pattern(&CacheKey::namespace_prefix(MARKET_SIZE_NAMESPACE))
            .await;
    }

    /// Matching providers first, then the rest, each in priority order.
    fn waterfall<'a>(
        &'a self,
        identifier: &'a str,
    ) -> impl Iterator<Item = &'a ProviderDescriptor> + 'a {
        let matching = self
            .providers
            .iter()
            .filter(move |d| d.pattern.matches(identifier));
        let broader = self
            .providers
            .iter()
            .filter(move |d| !d.pattern.matches(identifier));
        matching.chain(broader)
    }

    async fn call(
        &self,
        descriptor: &ProviderDescriptor,
        name: &str,
        identifier: &str,
        context: &QueryContext,
        key: &CacheKey,
    ) -> AttemptResult {
        debug!(provider = %name, "Calling provider");
        let raw = descriptor.adapter.fetch(identifier, context).await;
        let outcome = classify(&raw);

        let (value, error) = match raw {
            Ok(response) if outcome == OutcomeKind::Success => (response.payload, None),
            Ok(_) => (None, None),
            Err(e) => {
                warn!(provider = %name, error = %e, "Provider call failed");
                (None, Some(e.to_string()))
            }
        };

        let ttl_ms = self.ttl.ttl_for(name, outcome);
        self.cache.set(key, value.clone(), ttl_ms, outcome).await;

        AttemptResult {
            outcome,
            value,
            lifetime_ms: ttl_ms,
            from_cache: false,
            error,
        }
    }

    async fn cached_resolution(&self, key: &CacheKey) -> Option<Resolution> {
        let entry = self.cache.get(key).await?;
        if !entry.outcome.is_definitive() {
            return None;
        }
        let stored: CachedResolution = match serde_json::from_value(entry.value?) {
            Ok(stored) => stored,
            Err(e) => {
                warn!(key = %key, error = %e, "Unreadable cached resolution, ignoring");
                return None;
            }
        };
        debug!(source = %stored.source, outcome = %entry.outcome, "Resolution served from cache");
        Some(Resolution {
            value: stored.value,
            source: stored.source,
            outcome: entry.outcome,
            cached: true,
            attempts: Vec::new(),
        })
    }

    /// Caches `resolution` for `ttl_ms`, which never exceeds the remaining
    /// lifetime of the provider entries it was derived from.
    async fn store_resolution(&self, key: &CacheKey, resolution: &Resolution, ttl_ms: u64) {
        let stored = CachedResolution {
            source: resolution.source.clone(),
            value: resolution.value.clone(),
        };
        match serde_json::to_value(&stored) {
            Ok(value) if ttl_ms > 0 => {
                self.cache
                    .set(key, Some(value), ttl_ms, resolution.outcome)
                    .await;
            }
            Ok(_) => trace!(key = %key, "Source entry already expired, not caching resolution"),
            Err(e) => warn!(key = %key, error = %e, "Failed to encode resolution for caching"),
        }
    }
}

struct AttemptResult {
    outcome: OutcomeKind,
    value: Option<Value>,
    /// How long the outcome stays valid: the policy TTL for a fresh call, the
    /// remaining lifetime for a cached entry.
    lifetime_ms: u64,
    from_cache: bool,
    error: Option<String>,
}

fn query_params<'a>(identifier: &'a str, context: &'a QueryContext) -> [(&'static str, &'a str); 3] {
    [
        ("identifier", identifier),
        ("region", context.region.as_str()),
        ("currency", context.currency.as_str()),
    ]
}
