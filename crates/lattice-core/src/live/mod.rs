//! Live-data polling for widgets whose source store does not push.
//!
//! Live-mode widgets (auto-refresh interval of -1) get a supervised poll
//! task: fetch the widget's data on an interval, hash the canonicalized
//! result, and publish a `live_data` frame only when the hash changes.
//! Poll failures back off exponentially to a cap. Subscriptions are
//! reference-counted across viewers; the task stops at zero.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;
use uuid::Uuid;

use lattice_error::Result;

use crate::channel::ChannelHub;

/// Where the poller gets widget data. Implemented by the server's widget
/// service, which owns graph loading and the cache layer.
#[async_trait]
pub trait WidgetDataSource: Send + Sync {
    /// Fetch the current data for a widget, tenant-scoped.
    async fn fetch(&self, tenant_id: Uuid, widget_id: Uuid) -> Result<Value>;
}

struct Subscription {
    viewers: usize,
    handle:  JoinHandle<()>,
}

/// Manages background polling for live-mode widgets.
pub struct LiveDataPoller {
    hub:           Arc<ChannelHub>,
    source:        Arc<dyn WidgetDataSource>,
    poll_interval: Duration,
    max_backoff:   Duration,
    subscriptions: DashMap<Uuid, Subscription>,
}

impl LiveDataPoller {
    /// Create a poller.
    #[must_use]
    pub fn new(
        hub: Arc<ChannelHub>,
        source: Arc<dyn WidgetDataSource>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            hub,
            source,
            poll_interval,
            max_backoff: Duration::from_secs(30),
            subscriptions: DashMap::new(),
        }
    }

    /// Add a viewer for a live widget, starting its poll task on the first
    /// viewer.
    pub fn subscribe(self: &Arc<Self>, tenant_id: Uuid, widget_id: Uuid) {
        let mut started = false;
        self.subscriptions
            .entry(widget_id)
            .and_modify(|sub| sub.viewers += 1)
            .or_insert_with(|| {
                started = true;
                let poller = Arc::clone(self);
                Subscription {
                    viewers: 1,
                    handle:  tokio::spawn(async move {
                        poller.poll_loop(tenant_id, widget_id).await;
                    }),
                }
            });
        if started {
            tracing::info!(%widget_id, "live widget subscribed");
        }
    }

    /// Drop a viewer; the poll task stops when the last viewer leaves.
    pub fn unsubscribe(&self, widget_id: Uuid) {
        let stopped = {
            let Some(mut entry) = self.subscriptions.get_mut(&widget_id) else {
                return;
            };
            entry.viewers = entry.viewers.saturating_sub(1);
            entry.viewers == 0
        };
        if stopped {
            if let Some((_, sub)) = self.subscriptions.remove(&widget_id) {
                sub.handle.abort();
                tracing::info!(%widget_id, "live widget unsubscribed");
            }
        }
    }

    /// Number of widgets currently being polled.
    #[must_use]
    pub fn polling_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Stop every poll task.
    pub fn shutdown(&self) {
        for entry in self.subscriptions.iter() {
            entry.value().handle.abort();
        }
        self.subscriptions.clear();
    }

    async fn poll_loop(self: Arc<Self>, tenant_id: Uuid, widget_id: Uuid) {
        let mut last_hash: Option<String> = None;
        let mut backoff = self.poll_interval;

        loop {
            match self.source.fetch(tenant_id, widget_id).await {
                Ok(data) => {
                    let hash = content_hash(&data);
                    if last_hash.as_deref() != Some(hash.as_str()) {
                        last_hash = Some(hash);
                        self.hub.publish_live_data(tenant_id, widget_id, data).await;
                    }
                    backoff = self.poll_interval;
                },
                Err(error) => {
                    tracing::warn!(
                        %widget_id,
                        %error,
                        backoff_secs = backoff.as_secs_f64(),
                        "live widget poll failed, backing off"
                    );
                    backoff = (backoff * 2).min(self.max_backoff);
                },
            }
            tokio::time::sleep(backoff).await;
        }
    }
}

/// Hash of the canonical serialization; object keys serialize sorted, so
/// equal data always hashes equal.
fn content_hash(data: &Value) -> String {
    hex::encode(Sha256::digest(data.to_string().as_bytes()))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use crate::store::FastStore;

    use super::*;

    struct CountingSource {
        fetches: AtomicUsize,
    }

    #[async_trait]
    impl WidgetDataSource for CountingSource {
        async fn fetch(&self, _tenant_id: Uuid, _widget_id: Uuid) -> Result<Value> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(json!({"rows": []}))
        }
    }

    #[test]
    fn test_content_hash_is_stable_and_discriminating() {
        let a = json!({"b": 1, "a": 2});
        let b = json!({"a": 2, "b": 1});
        assert_eq!(content_hash(&a), content_hash(&b), "key order must not matter");
        assert_ne!(content_hash(&a), content_hash(&json!({"a": 2, "b": 3})));
    }

    #[tokio::test]
    async fn test_refcounted_subscribe_unsubscribe() {
        // The hub's bus is never reached: the counting source returns
        // stable data, and the tasks are aborted before any publish.
        let Ok(fast) = FastStore::connect("redis://127.0.0.1:6379/0").await else {
            // No local fast store in this environment; the registry-level
            // behavior is covered by the channel module tests.
            return;
        };
        let hub = Arc::new(ChannelHub::new("lattice", fast));
        let source = Arc::new(CountingSource {
            fetches: AtomicUsize::new(0),
        });
        let poller = Arc::new(LiveDataPoller::new(hub, source, Duration::from_secs(60)));

        let tenant = Uuid::new_v4();
        let widget = Uuid::new_v4();
        poller.subscribe(tenant, widget);
        poller.subscribe(tenant, widget);
        assert_eq!(poller.polling_count(), 1, "viewers share one poll task");

        poller.unsubscribe(widget);
        assert_eq!(poller.polling_count(), 1, "still one viewer left");
        poller.unsubscribe(widget);
        assert_eq!(poller.polling_count(), 0);
    }
}
