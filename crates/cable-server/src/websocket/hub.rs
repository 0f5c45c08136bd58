//! Central registry and fan-out broadcaster for all live channels.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use cable_core::ChannelId;
use metrics::{counter, gauge};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::metrics::{
    HUB_BROADCASTS_TOTAL, HUB_CHANNELS_ACTIVE, HUB_DELIVERY_FAILURES_TOTAL, HUB_EVICTIONS_TOTAL,
};
use crate::websocket::channel::Channel;

/// Tracks every registered channel and fans broadcasts out to them.
///
/// Registry mutation and broadcast iteration are serialized through one
/// `RwLock`; `count` reads an atomic and may run concurrently with either.
/// A channel whose delivery fails is unregistered immediately and torn
/// down — one dead peer never blocks or aborts delivery to the rest.
pub struct Hub {
    /// Registered channels indexed by channel ID.
    channels: RwLock<HashMap<ChannelId, Arc<Channel>>>,
    /// Atomic counter tracking registrations (avoids read-locking for count queries).
    active_count: AtomicUsize,
}

impl Hub {
    /// Create an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            active_count: AtomicUsize::new(0),
        }
    }

    /// Register a channel. Registration is visible to every broadcast that
    /// starts after this call returns.
    pub async fn register(&self, channel: Arc<Channel>) {
        let mut channels = self.channels.write().await;
        if channels.insert(channel.id.clone(), channel).is_none() {
            let _ = self.active_count.fetch_add(1, Ordering::Relaxed);
            gauge!(HUB_CHANNELS_ACTIVE).increment(1.0);
        }
    }

    /// Unregister a channel and trigger its teardown.
    ///
    /// Idempotent: unregistering a channel that is not in the registry is a
    /// no-op. Teardown (cancel scope, close socket) runs exactly once, on
    /// the call that actually removes the channel, after the registry lock
    /// is released — no send can be observed once this returns.
    pub async fn unregister(&self, id: &ChannelId) {
        let removed = {
            let mut channels = self.channels.write().await;
            channels.remove(id)
        };
        if let Some(channel) = removed {
            let _ = self.active_count.fetch_sub(1, Ordering::Relaxed);
            gauge!(HUB_CHANNELS_ACTIVE).decrement(1.0);
            channel.teardown().await;
        }
    }

    /// Broadcast a payload to every registered channel.
    pub async fn broadcast(&self, payload: &Value) {
        self.fan_out(|_| true, payload, "all").await;
    }

    /// Broadcast a payload to the channels subscribed to one stream.
    pub async fn broadcast_stream(&self, stream: &str, payload: &Value) {
        self.fan_out(
            |c| c.stream_identifier().as_deref() == Some(stream),
            payload,
            "stream",
        )
        .await;
    }

    /// Fan out to matching channels, then evict every failed one.
    async fn fan_out(&self, filter: impl Fn(&Channel) -> bool, payload: &Value, target: &'static str) {
        counter!(HUB_BROADCASTS_TOTAL, "target" => target).increment(1);

        let mut failed = Vec::new();
        {
            let channels = self.channels.read().await;
            let mut recipients = 0u32;
            for channel in channels.values() {
                if !filter(channel) {
                    continue;
                }
                recipients += 1;
                if let Err(err) = channel.send(payload) {
                    counter!(HUB_DELIVERY_FAILURES_TOTAL).increment(1);
                    warn!(channel_id = %channel.id, target, error = %err, "delivery failed, evicting channel");
                    failed.push(channel.id.clone());
                }
            }
            debug!(target, recipients, failures = failed.len(), "broadcast payload");
        }

        for id in &failed {
            counter!(HUB_EVICTIONS_TOTAL).increment(1);
            self.unregister(id).await;
        }
    }

    /// Number of registered channels.
    #[must_use]
    pub fn count(&self) -> usize {
        self.active_count.load(Ordering::Relaxed)
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
