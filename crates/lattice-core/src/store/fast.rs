//! Fast store client: cache entries, counters, execution records, pub/sub.
//!
//! A thin typed wrapper over one multiplexed connection. Command failures
//! surface as `CoreError::Cache`; every caller is expected to fail open —
//! a fast-store outage degrades caching and fan-out, it never takes down
//! the request path.

use futures::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;

use lattice_error::{CoreError, Result};

/// One message received from a pattern subscription.
#[derive(Debug, Clone)]
pub struct BusMessage {
    /// Concrete channel the message was published on.
    pub channel: String,
    /// Raw payload.
    pub payload: String,
}

/// Shared fast-store client.
///
/// Cloning is cheap; all clones multiplex the same connection.
#[derive(Clone)]
pub struct FastStore {
    client:     redis::Client,
    connection: redis::aio::ConnectionManager,
}

impl FastStore {
    /// Connect to the fast store.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Cache` when the URL is invalid or the initial
    /// connection fails.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(|e| CoreError::cache(e.to_string()))?;
        let connection = redis::aio::ConnectionManager::new(client.clone())
            .await
            .map_err(|e| CoreError::cache(e.to_string()))?;
        Ok(Self { client, connection })
    }

    /// A raw multiplexed connection handle (for the point store).
    #[must_use]
    pub fn connection(&self) -> redis::aio::ConnectionManager {
        self.connection.clone()
    }

    /// GET a JSON value. `None` on missing key.
    pub async fn get_json(&self, key: &str) -> Result<Option<Value>> {
        let mut connection = self.connection.clone();
        let raw: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut connection)
            .await
            .map_err(|e| CoreError::cache(e.to_string()))?;
        match raw {
            Some(text) => Ok(Some(
                serde_json::from_str(&text).map_err(|e| CoreError::cache(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    /// SET a JSON value with a TTL.
    pub async fn set_json(&self, key: &str, value: &Value, ttl_secs: u64) -> Result<()> {
        let text = serde_json::to_string(value).map_err(|e| CoreError::cache(e.to_string()))?;
        let mut connection = self.connection.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(text)
            .arg("EX")
            .arg(ttl_secs)
            .query_async::<()>(&mut connection)
            .await
            .map_err(|e| CoreError::cache(e.to_string()))
    }

    /// DEL a key.
    pub async fn delete(&self, key: &str) -> Result<()> {
        let mut connection = self.connection.clone();
        redis::cmd("DEL")
            .arg(key)
            .query_async::<()>(&mut connection)
            .await
            .map_err(|e| CoreError::cache(e.to_string()))
    }

    /// INCR a counter, returning the post-increment value.
    pub async fn incr(&self, key: &str) -> Result<i64> {
        let mut connection = self.connection.clone();
        redis::cmd("INCR")
            .arg(key)
            .query_async(&mut connection)
            .await
            .map_err(|e| CoreError::cache(e.to_string()))
    }

    /// EXPIRE a key.
    pub async fn expire(&self, key: &str, ttl_secs: u64) -> Result<()> {
        let mut connection = self.connection.clone();
        redis::cmd("EXPIRE")
            .arg(key)
            .arg(ttl_secs)
            .query_async::<()>(&mut connection)
            .await
            .map_err(|e| CoreError::cache(e.to_string()))
    }

    /// PUBLISH a payload on a bus channel.
    pub async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        let mut connection = self.connection.clone();
        redis::cmd("PUBLISH")
            .arg(channel)
            .arg(payload)
            .query_async::<()>(&mut connection)
            .await
            .map_err(|e| CoreError::cache(e.to_string()))
    }

    /// PSUBSCRIBE to a channel pattern on a dedicated connection, pumping
    /// messages into the returned channel until the subscription drops.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Cache` when the subscription cannot be
    /// established. Pump failures after that terminate the stream; callers
    /// resubscribe on their own cadence.
    pub async fn subscribe_pattern(
        &self,
        pattern: &str,
    ) -> Result<mpsc::UnboundedReceiver<BusMessage>> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| CoreError::cache(e.to_string()))?;
        pubsub
            .psubscribe(pattern)
            .await
            .map_err(|e| CoreError::cache(e.to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut stream = pubsub.on_message();
            while let Some(message) = stream.next().await {
                let channel = message.get_channel_name().to_string();
                let payload: String = match message.get_payload() {
                    Ok(payload) => payload,
                    Err(error) => {
                        tracing::warn!(%error, "undecodable bus payload dropped");
                        continue;
                    },
                };
                if tx.send(BusMessage { channel, payload }).is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }

    /// Connectivity probe.
    pub async fn ping(&self) -> Result<()> {
        let mut connection = self.connection.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut connection)
            .await
            .map(|_| ())
            .map_err(|e| CoreError::cache(e.to_string()))
    }
}
