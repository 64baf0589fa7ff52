//! In-process invalidation broadcaster.

use async_trait::async_trait;
use sizing_core::{InvalidationBroadcaster, InvalidationMessage};
use tokio::sync::broadcast;
use tracing::trace;

/// Default number of messages buffered per subscriber before it lags.
const DEFAULT_CAPACITY: usize = 1024;

/// Invalidation fan-out between cache services in one process.
///
/// Clones share the same channel, so every service built from a clone sees
/// the invalidations of its siblings. Delivery is at-most-once: a subscriber
/// that falls more than the channel capacity behind loses the oldest
/// messages, and publishing with no subscribers drops the message.
#[derive(Debug, Clone)]
pub struct LocalBroadcaster {
    sender: broadcast::Sender<InvalidationMessage>,
}

impl Default for LocalBroadcaster {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl LocalBroadcaster {
    /// Create a broadcaster with the default buffer capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a broadcaster buffering up to `capacity` messages per subscriber.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Returns the number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[async_trait]
impl InvalidationBroadcaster for LocalBroadcaster {
    async fn publish(&self, message: InvalidationMessage) {
        // No receivers means nobody needs telling.
        match self.sender.send(message) {
            Ok(receivers) => trace!(receivers, "Published invalidation"),
            Err(_) => trace!("Published invalidation with no subscribers"),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<InvalidationMessage> {
        self.sender.subscribe()
    }
}
