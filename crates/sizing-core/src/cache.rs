//! Durable store and invalidation broadcaster traits.
//!
//! This module defines the [`DurableStore`] trait for the persistent cache
//! tier and the [`InvalidationBroadcaster`] trait used to keep sibling
//! instances that share a durable tier consistent.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use tokio::sync::broadcast;

use crate::{key::CacheKey, types::CacheEntry};

/// Persistent key to entry storage.
///
/// A durable store has no TTL logic of its own. Failures of the underlying
/// medium are logged by the implementation and degrade to "absent" or a
/// no-op: an outage removes the benefit of persistence but never fails the
/// caller.
#[async_trait]
pub trait DurableStore: Send + Sync + Debug {
    /// Persists `entry` under `key`, replacing any previous record.
    async fn save(&self, key: &CacheKey, entry: &CacheEntry);

    /// Loads the record for `key`.
    ///
    /// Returns `None` if no record exists or the medium could not be read.
    async fn load(&self, key: &CacheKey) -> Option<CacheEntry>;

    /// Deletes the record for `key`, if any.
    async fn remove(&self, key: &CacheKey);

    /// Lists every stored key.
    async fn keys(&self) -> Vec<CacheKey>;

    /// Deletes every record.
    async fn clear_all(&self);

    /// Deletes every record whose key starts with `prefix`.
    ///
    /// Returns the number of records removed. The default implementation
    /// enumerates [`keys`](Self::keys) and removes matches one by one.
    async fn remove_prefix(&self, prefix: &str) -> usize {
        let mut removed = 0usize;
        for key in self.keys().await {
            if key.has_prefix(prefix) {
                self.remove(&key).await;
                removed += 1;
            }
        }
        removed
    }
}

/// What an invalidation message targets.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvalidationTarget {
    /// A single key.
    Key(String),
    /// Every key starting with the prefix.
    Prefix(String),
}

/// A cache invalidation event published to sibling instances.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationMessage {
    /// Name of the instance that performed the invalidation.
    pub origin: String,
    /// The invalidated key or prefix.
    pub target: InvalidationTarget,
}

impl InvalidationMessage {
    /// Creates a message invalidating one key.
    #[must_use]
    pub fn key(origin: impl Into<String>, key: &CacheKey) -> Self {
        Self {
            origin: origin.into(),
            target: InvalidationTarget::Key(key.as_str().to_string()),
        }
    }

    /// Creates a message invalidating a key prefix.
    #[must_use]
    pub fn prefix(origin: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            target: InvalidationTarget::Prefix(prefix.into()),
        }
    }
}

/// Best-effort, at-most-once delivery of invalidation events.
///
/// A missed message is tolerated: every cache entry still carries its own TTL,
/// which bounds how long a sibling can serve a stale value.
#[async_trait]
pub trait InvalidationBroadcaster: Send + Sync + Debug {
    /// Publishes `message` to every current subscriber.
    async fn publish(&self, message: InvalidationMessage);

    /// Subscribes to messages published after this call.
    fn subscribe(&self) -> broadcast::Receiver<InvalidationMessage>;
}
