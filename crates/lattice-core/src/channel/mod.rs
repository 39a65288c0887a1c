//! Live channel hub: execution status and live-data fan-out.
//!
//! Channels are always named `<ns>:<tenant_id>:<kind>[:<object_id>]`;
//! client-requested subscriptions carry only the suffix and the server
//! prepends the canonical tenant prefix, so a client cannot subscribe
//! across tenant boundaries.
//!
//! Publishes flow through the shared fast-store bus so every process fans
//! out: each process holds its own local connection set (see
//! [`ClientRegistry`]), subscribes to the `<ns>:*` pattern, and forwards
//! incoming messages to the subset of local connections subscribed to that
//! channel. Within one channel, messages preserve publisher order; across
//! channels there is no guarantee.

mod registry;

pub use registry::{ClientId, ClientRegistry};

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use lattice_error::Result;

use crate::store::FastStore;

/// Channel kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum ChannelKind {
    Execution,
    Widget,
    General,
    Broadcast,
}

impl ChannelKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Execution => "execution",
            Self::Widget => "widget",
            Self::General => "general",
            Self::Broadcast => "broadcast",
        }
    }
}

/// Build the canonical channel name for a tenant-scoped object.
#[must_use]
pub fn channel_name(namespace: &str, tenant_id: Uuid, kind: ChannelKind, object_id: &str) -> String {
    if object_id.is_empty() {
        format!("{namespace}:{tenant_id}:{}", kind.as_str())
    } else {
        format!("{namespace}:{tenant_id}:{}:{object_id}", kind.as_str())
    }
}

/// Prefix a client-supplied suffix with the canonical tenant prefix.
///
/// This is the tenant-isolation chokepoint: whatever suffix the client
/// sends, the resulting channel lives inside its own tenant's namespace.
#[must_use]
pub fn prefixed_channel(namespace: &str, tenant_id: Uuid, suffix: &str) -> String {
    format!("{namespace}:{tenant_id}:{suffix}")
}

/// Fans execution-status transitions and live-data updates out to
/// interested clients, across processes via the shared bus.
pub struct ChannelHub {
    namespace: String,
    fast:      FastStore,
    registry:  ClientRegistry,
}

impl ChannelHub {
    /// Create a hub over the shared bus.
    #[must_use]
    pub fn new(namespace: &str, fast: FastStore) -> Self {
        Self {
            namespace: namespace.to_string(),
            fast,
            registry: ClientRegistry::new(),
        }
    }

    /// The configured channel namespace.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The local connection registry.
    #[must_use]
    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    /// Register a connection and attach it to its tenant's general channel.
    pub fn register(&self, tenant_id: Uuid, tx: mpsc::UnboundedSender<String>) -> ClientId {
        let general = channel_name(&self.namespace, tenant_id, ChannelKind::General, "");
        let client_id = self.registry.register(tx, &general);
        tracing::info!(%client_id, %tenant_id, "client connected");
        client_id
    }

    /// Subscribe a client to a tenant-prefixed channel suffix. Returns the
    /// full channel name.
    pub fn subscribe(&self, client_id: ClientId, tenant_id: Uuid, suffix: &str) -> String {
        let channel = prefixed_channel(&self.namespace, tenant_id, suffix);
        self.registry.subscribe(client_id, &channel);
        channel
    }

    /// Unsubscribe a client from a tenant-prefixed channel suffix.
    pub fn unsubscribe(&self, client_id: ClientId, tenant_id: Uuid, suffix: &str) {
        let channel = prefixed_channel(&self.namespace, tenant_id, suffix);
        self.registry.unsubscribe(client_id, &channel);
    }

    /// Remove a connection from all channel sets (idempotent).
    pub fn remove(&self, client_id: ClientId) {
        self.registry.remove(client_id);
    }

    /// Run the heartbeat loop until the process exits.
    pub async fn run_heartbeat(self: Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            self.registry.heartbeat();
        }
    }

    /// Pump the shared bus into local dispatch. Resubscribes with a small
    /// backoff if the bus connection drops.
    pub async fn run_subscriber(self: Arc<Self>) {
        let pattern = format!("{}:*", self.namespace);
        loop {
            match self.fast.subscribe_pattern(&pattern).await {
                Ok(mut messages) => {
                    tracing::info!(%pattern, "bus subscriber attached");
                    while let Some(message) = messages.recv().await {
                        self.registry.dispatch(&message.channel, &message.payload);
                    }
                    tracing::warn!("bus subscription ended, reattaching");
                },
                Err(error) => {
                    tracing::warn!(%error, "bus subscription failed, retrying");
                },
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    /// Publish an execution status transition on the per-execution channel.
    ///
    /// `node_id` is a node id or one of the `__compiler__`/`__workflow__`
    /// pseudo-ids for whole-workflow events.
    pub async fn publish_execution_status(
        &self,
        tenant_id: Uuid,
        execution_id: Uuid,
        node_id: &str,
        status: &str,
        data: Value,
    ) {
        let frame = ExecutionStatusFrame {
            r#type: "execution_status",
            execution_id,
            node_id,
            status,
            data,
        };
        let channel = channel_name(
            &self.namespace,
            tenant_id,
            ChannelKind::Execution,
            &execution_id.to_string(),
        );
        self.publish_frame(&channel, &frame).await;
    }

    /// Publish a live-data update on the per-widget channel.
    pub async fn publish_live_data(&self, tenant_id: Uuid, widget_id: Uuid, data: Value) {
        let frame = LiveDataFrame {
            r#type: "live_data",
            widget_id,
            data,
        };
        let channel = channel_name(
            &self.namespace,
            tenant_id,
            ChannelKind::Widget,
            &widget_id.to_string(),
        );
        self.publish_frame(&channel, &frame).await;
    }

    async fn publish_frame<F: Serialize>(&self, channel: &str, frame: &F) {
        match serde_json::to_string(frame) {
            Ok(payload) => {
                // Bus failures degrade fan-out, never the publisher.
                if let Err(error) = self.fast.publish(channel, &payload).await {
                    tracing::warn!(%channel, %error, "bus publish failed");
                }
            },
            Err(error) => {
                tracing::warn!(%channel, %error, "frame not serializable");
            },
        }
    }

    /// Direct publish for callers that assemble their own frames.
    ///
    /// # Errors
    ///
    /// Returns the bus error; callers decide whether to fail open.
    pub async fn publish_raw(&self, channel: &str, payload: &str) -> Result<()> {
        self.fast.publish(channel, payload).await
    }
}

#[derive(Debug, Serialize)]
struct ExecutionStatusFrame<'a> {
    r#type:       &'static str,
    execution_id: Uuid,
    node_id:      &'a str,
    status:       &'a str,
    data:         Value,
}

#[derive(Debug, Serialize)]
struct LiveDataFrame {
    r#type:    &'static str,
    widget_id: Uuid,
    data:      Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_name_format() {
        let tenant = Uuid::nil();
        assert_eq!(
            channel_name("lattice", tenant, ChannelKind::Execution, "e1"),
            format!("lattice:{tenant}:execution:e1")
        );
        assert_eq!(
            channel_name("lattice", tenant, ChannelKind::General, ""),
            format!("lattice:{tenant}:general")
        );
        assert_eq!(
            channel_name("lattice", tenant, ChannelKind::Broadcast, "all"),
            format!("lattice:{tenant}:broadcast:all")
        );
    }

    #[test]
    fn test_prefixed_channel_contains_own_tenant_only() {
        let tenant = Uuid::new_v4();
        let other = Uuid::new_v4();

        // A hostile suffix naming another tenant still lands inside the
        // caller's own namespace.
        let channel =
            prefixed_channel("lattice", tenant, &format!("lattice:{other}:execution:steal"));
        assert!(channel.starts_with(&format!("lattice:{tenant}:")));
    }

    #[test]
    fn test_execution_status_frame_shape() {
        let frame = ExecutionStatusFrame {
            r#type:       "execution_status",
            execution_id: Uuid::nil(),
            node_id:      "__workflow__",
            status:       "completed",
            data:         serde_json::json!({}),
        };
        let json = serde_json::to_value(&frame).expect("serializable");
        assert_eq!(json["type"], "execution_status");
        assert_eq!(json["node_id"], "__workflow__");
        assert_eq!(json["status"], "completed");
    }
}
