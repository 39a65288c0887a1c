//! Fixed-window rate limiter for embed endpoints.
//!
//! Key: `<ns>:ratelimit:<key_hash>:<window_timestamp>`. The first
//! increment of a window sets its expiry. Fails open on fast-store errors
//! — a bus outage must not take down embedded widgets.

use std::time::{SystemTime, UNIX_EPOCH};

use lattice_error::{CoreError, Result};

use crate::config::RateLimitConfig;
use crate::store::FastStore;

/// Fast-store fixed-window rate limiter.
pub struct RateLimiter {
    fast:      FastStore,
    namespace: String,
    config:    RateLimitConfig,
}

impl RateLimiter {
    /// Create a limiter.
    #[must_use]
    pub fn new(fast: FastStore, namespace: &str, config: RateLimitConfig) -> Self {
        Self {
            fast,
            namespace: namespace.to_string(),
            config,
        }
    }

    /// Check the limit for an API-key hash.
    ///
    /// `limit` overrides the default when the key declares its own quota.
    ///
    /// # Errors
    ///
    /// `CoreError::RateLimited` with the seconds remaining in the window.
    /// Fast-store failures log and permit.
    pub async fn check(&self, key_hash: &str, limit: Option<u64>) -> Result<()> {
        let effective_limit = limit.unwrap_or(self.config.default_limit);
        let window = self.config.window_secs.max(1);
        let now = now_secs();
        let window_ts = now / window;
        let key = format!("{}:ratelimit:{key_hash}:{window_ts}", self.namespace);

        let count = match self.fast.incr(&key).await {
            Ok(count) => count,
            Err(error) => {
                tracing::warn!(%key_hash, %error, "rate limiter fast-store error, failing open");
                return Ok(());
            },
        };

        if count == 1 {
            // First request in this window sets the expiry; +1s absorbs
            // clock skew between the counter and the window edge.
            if let Err(error) = self.fast.expire(&key, window + 1).await {
                tracing::warn!(%key_hash, %error, "rate limit window expiry not set");
            }
        }

        if count as u64 > effective_limit {
            let retry_after = (window - (now % window)).max(1);
            tracing::debug!(%key_hash, count, effective_limit, "rate limit rejected");
            return Err(CoreError::RateLimited {
                retry_after_secs: retry_after,
            });
        }
        Ok(())
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_window_arithmetic() {
        let window = 10u64;
        let now = 1_700_000_007u64;
        assert_eq!(now / window, 170_000_000);
        let retry_after = (window - (now % window)).max(1);
        assert_eq!(retry_after, 3, "seconds remaining to window rollover");
    }

    #[test]
    fn test_retry_after_never_zero() {
        let window = 5u64;
        let now = 1_700_000_000u64; // exactly on a window edge
        let retry_after = (window - (now % window)).max(1);
        assert!(retry_after >= 1);
        assert!(retry_after <= window);
    }
}
