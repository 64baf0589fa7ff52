//! Cache configuration.
//!
//! [`CacheConfig`] selects the tiers, the durable medium and its location, the
//! fallback timeout, and the TTL policy. It can be deserialized, built with
//! `with_*` methods, or read from `SIZING_CACHE_*` environment variables.

use serde::{Deserialize, Serialize};
use sizing_core::{Result, SizingError, TtlPolicy};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Which tiers the cache service uses.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheBackend {
    /// In-memory tier only.
    Volatile,
    /// Durable tier only.
    Durable,
    /// In-memory primary with durable secondary.
    #[default]
    Hybrid,
}

impl FromStr for CacheBackend {
    type Err = SizingError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "volatile" | "memory" => Ok(Self::Volatile),
            "durable" => Ok(Self::Durable),
            "hybrid" => Ok(Self::Hybrid),
            other => Err(SizingError::Configuration(format!(
                "unknown cache backend: {other}"
            ))),
        }
    }
}

/// Storage medium of the durable tier.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DurableMedium {
    /// A SQLite database file at the storage path.
    #[default]
    Sqlite,
    /// A directory of JSON files at the storage path.
    Files,
}

impl FromStr for DurableMedium {
    type Err = SizingError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "files" | "file" => Ok(Self::Files),
            other => Err(SizingError::Configuration(format!(
                "unknown durable medium: {other}"
            ))),
        }
    }
}

/// Configuration of a [`CacheService`](crate::CacheService).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Tier selection.
    pub backend: CacheBackend,
    /// Durable tier medium.
    pub medium: DurableMedium,
    /// Database file or record directory of the durable tier.
    pub storage_path: PathBuf,
    /// Upper bound on a durable-tier read before it counts as a miss.
    pub fallback_timeout_ms: u64,
    /// Period of the volatile expiry sweep; `None` disables the sweeper.
    pub sweep_interval_ms: Option<u64>,
    /// Whether invalidations are broadcast to sibling instances.
    pub distributed_invalidation: bool,
    /// Name this instance stamps on the invalidations it publishes.
    pub instance_name: String,
    /// Per-provider, per-outcome lifetimes.
    pub ttl: TtlPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::default(),
            medium: DurableMedium::default(),
            storage_path: PathBuf::from(".sizing-cache/cache.db"),
            fallback_timeout_ms: 1_000,
            sweep_interval_ms: Some(60_000),
            distributed_invalidation: false,
            instance_name: format!("sizing-{}", std::process::id()),
            ttl: TtlPolicy::default(),
        }
    }
}

impl CacheConfig {
    /// Environment variable selecting the backend.
    pub const ENV_BACKEND: &'static str = "SIZING_CACHE_BACKEND";
    /// Environment variable selecting the durable medium.
    pub const ENV_MEDIUM: &'static str = "SIZING_CACHE_MEDIUM";
    /// Environment variable holding the storage path.
    pub const ENV_PATH: &'static str = "SIZING_CACHE_PATH";
    /// Environment variable holding the fallback timeout in milliseconds.
    pub const ENV_FALLBACK_TIMEOUT_MS: &'static str = "SIZING_CACHE_FALLBACK_TIMEOUT_MS";
    /// Environment variable enabling distributed invalidation.
    pub const ENV_DISTRIBUTED: &'static str = "SIZING_CACHE_DISTRIBUTED";
    /// Environment variable naming this instance.
    pub const ENV_INSTANCE: &'static str = "SIZING_INSTANCE_NAME";

    /// A volatile-only configuration.
    #[must_use]
    pub fn volatile() -> Self {
        Self {
            backend: CacheBackend::Volatile,
            ..Self::default()
        }
    }

    /// Reads overrides of the defaults from the process environment.
    ///
    /// # Errors
    /// Returns [`SizingError::Configuration`] if a variable is set to an
    /// unparseable value.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads overrides of the defaults through `lookup`.
    ///
    /// # Errors
    /// Returns [`SizingError::Configuration`] if a value cannot be parsed.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(backend) = lookup(Self::ENV_BACKEND) {
            config.backend = backend.parse()?;
        }
        if let Some(medium) = lookup(Self::ENV_MEDIUM) {
            config.medium = medium.parse()?;
        }
        if let Some(path) = lookup(Self::ENV_PATH) {
            config.storage_path = PathBuf::from(path);
        }
        if let Some(timeout) = lookup(Self::ENV_FALLBACK_TIMEOUT_MS) {
            config.fallback_timeout_ms = timeout.trim().parse().map_err(|e| {
                SizingError::Configuration(format!(
                    "{}: {e}",
                    Self::ENV_FALLBACK_TIMEOUT_MS
                ))
            })?;
        }
        if let Some(flag) = lookup(Self::ENV_DISTRIBUTED) {
            config.distributed_invalidation = parse_flag(&flag).ok_or_else(|| {
                SizingError::Configuration(format!("{}: not a boolean", Self::ENV_DISTRIBUTED))
            })?;
        }
        if let Some(name) = lookup(Self::ENV_INSTANCE) {
            config.instance_name = name;
        }
        Ok(config)
    }

    /// Sets the tier selection.
    #[must_use]
    pub fn with_backend(mut self, backend: CacheBackend) -> Self {
        self.backend = backend;
        self
    }

    /// Sets the durable medium and its location.
    #[must_use]
    pub fn with_storage(mut self, medium: DurableMedium, path: impl Into<PathBuf>) -> Self {
        self.medium = medium;
        self.storage_path = path.into();
        self
    }

    /// Sets the durable fallback timeout.
    #[must_use]
    pub fn with_fallback_timeout(mut self, timeout: Duration) -> Self {
        self.fallback_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Sets the volatile sweep period; `None` disables the sweeper.
    #[must_use]
    pub fn with_sweep_interval(mut self, interval: Option<Duration>) -> Self {
        self.sweep_interval_ms =
            interval.map(|i| u64::try_from(i.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Enables or disables distributed invalidation.
    #[must_use]
    pub fn with_distributed_invalidation(mut self, enabled: bool) -> Self {
        self.distributed_invalidation = enabled;
        self
    }

    /// Sets the name stamped on published invalidations.
    #[must_use]
    pub fn with_instance_name(mut self, name: impl Into<String>) -> Self {
        self.instance_name = name.into();
        self
    }

    /// Sets the TTL policy.
    #[must_use]
    pub fn with_ttl_policy(mut self, ttl: TtlPolicy) -> Self {
        self.ttl = ttl;
        self
    }

    /// Returns the fallback timeout as a [`Duration`].
    #[must_use]
    pub const fn fallback_timeout(&self) -> Duration {
        Duration::from_millis(self.fallback_timeout_ms)
    }

    /// Returns the sweep period as a [`Duration`], if enabled.
    #[must_use]
    pub fn sweep_interval(&self) -> Option<Duration> {
        self.sweep_interval_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
