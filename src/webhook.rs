//! Webhook ingress boundary (spec §4.5 `wait` step, §6).
//!
//! The webhook HTTP server itself is an external collaborator (spec §1
//! Non-goals) — something else terminates inbound requests and decides
//! what counts as a delivery for a given `path`. This module only defines
//! the consumption contract the `wait` step handler needs, plus an
//! in-process channel-backed implementation usable both by that external
//! server and by tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use tokio::sync::{mpsc, Mutex};

use crate::value::Value;

#[async_trait]
pub trait WebhookSource: Send + Sync {
    /// Waits up to `timeout` for the next delivery on `path`. `None` means
    /// the wait timed out with nothing received.
    async fn recv(&self, path: &str, timeout: Duration) -> Option<Value>;
}

type PathChannel = Arc<(mpsc::UnboundedSender<Value>, Mutex<mpsc::UnboundedReceiver<Value>>)>;

/// Single process-wide map of unbounded per-path channels. Channels are
/// created lazily on first touch by either side.
///
/// The outer mutex only ever guards a map lookup/insert, never a wait: a
/// `recv` takes the per-path inner mutex to poll its own receiver, so a
/// long wait on path A never blocks a `submit` or `recv` on path B.
#[derive(Default)]
pub struct ChannelWebhookSource {
    channels: Mutex<FxHashMap<String, PathChannel>>,
}

impl ChannelWebhookSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    async fn channel_for(&self, path: &str) -> PathChannel {
        let mut guard = self.channels.lock().await;
        Arc::clone(guard.entry(path.to_string()).or_insert_with(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            Arc::new((tx, Mutex::new(rx)))
        }))
    }

    /// Delivers `value` to whatever is (or later will be) waiting on
    /// `path`. Called by the external webhook server once it has decoded
    /// and routed an inbound request.
    pub async fn submit(&self, path: &str, value: Value) {
        let channel = self.channel_for(path).await;
        let _ = channel.0.send(value);
    }
}

#[async_trait]
impl WebhookSource for ChannelWebhookSource {
    async fn recv(&self, path: &str, timeout: Duration) -> Option<Value> {
        let channel = self.channel_for(path).await;
        let mut receiver = channel.1.lock().await;
        tokio::time::timeout(timeout, receiver.recv()).await.ok().flatten()
    }
}
