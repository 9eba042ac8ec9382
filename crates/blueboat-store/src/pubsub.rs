//! The pub/sub interface and its in-memory implementation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, broadcast};

use crate::StoreError;

/// Per-channel buffer for [`MemoryPubSub`]. Slow subscribers that fall
/// further behind than this lose the oldest messages.
const CHANNEL_CAPACITY: usize = 256;

/// Cross-process publish/subscribe keyed by channel name.
///
/// Delivery is fire-and-forget: a message published while nobody is
/// subscribed is dropped, and subscribers only see messages published
/// after they subscribed.
#[async_trait]
pub trait PubSub: Send + Sync + 'static {
    /// Publishes `payload` on `channel`. Returns how many local
    /// subscribers received it (backends that can't tell return 0).
    async fn publish(&self, channel: &str, payload: String) -> Result<usize, StoreError>;

    /// Starts receiving messages published on `channel`.
    async fn subscribe(&self, channel: &str) -> Result<Subscription, StoreError>;
}

/// A live subscription to one channel.
#[derive(Debug)]
pub struct Subscription {
    channel: String,
    receiver: broadcast::Receiver<String>,
}

impl Subscription {
    /// Wraps a broadcast receiver. Backends feed their incoming messages
    /// into the matching sender.
    pub fn new(channel: impl Into<String>, receiver: broadcast::Receiver<String>) -> Self {
        Self {
            channel: channel.into(),
            receiver,
        }
    }

    /// The channel this subscription listens on.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Waits for the next message. Returns `None` once the channel is
    /// closed. Messages lost to lag are skipped with a warning.
    pub async fn recv(&mut self) -> Option<String> {
        loop {
            match self.receiver.recv().await {
                Ok(payload) => return Some(payload),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        channel = %self.channel,
                        skipped,
                        "subscriber lagged, messages dropped"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// An in-process [`PubSub`] built on `tokio::sync::broadcast`.
///
/// Clones share channels, like [`MemoryStore`](crate::MemoryStore).
#[derive(Debug, Clone, Default)]
pub struct MemoryPubSub {
    channels: Arc<Mutex<HashMap<String, broadcast::Sender<String>>>>,
}

impl MemoryPubSub {
    /// Creates a bus with no channels.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PubSub for MemoryPubSub {
    async fn publish(&self, channel: &str, payload: String) -> Result<usize, StoreError> {
        let channels = self.channels.lock().await;
        let Some(sender) = channels.get(channel) else {
            return Ok(0);
        };
        // `send` only fails when there are no receivers left.
        Ok(sender.send(payload).unwrap_or(0))
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, StoreError> {
        let mut channels = self.channels.lock().await;
        let sender = channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        Ok(Subscription::new(channel, sender.subscribe()))
    }
}
