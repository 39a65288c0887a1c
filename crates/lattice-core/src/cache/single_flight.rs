//! Per-process single-flight.
//!
//! When concurrent requests fingerprint identically, only one should
//! compile-and-execute; the rest await the winner's result. The latch map
//! is guarded by a short lock; nothing is held across awaits. Cross-process
//! deduplication is explicitly not attempted — the fast-store cache absorbs
//! that case a moment later.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::broadcast;

/// What a joiner got back from the latch map.
enum Entry<T> {
    /// This task computes; it must call [`SingleFlight::finish`].
    Leader(broadcast::Sender<T>),
    /// Another task is computing the same key.
    Follower(broadcast::Receiver<T>),
}

/// Deduplicates concurrent identical work by key.
pub struct SingleFlight<T: Clone> {
    inflight: Mutex<HashMap<String, broadcast::Sender<T>>>,
}

impl<T: Clone + Send + 'static> SingleFlight<T> {
    /// Create an empty latch map.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Run `work` under single-flight for `key`.
    ///
    /// The leader computes and broadcasts; followers await the shared
    /// value. A follower whose leader vanished without broadcasting (panic,
    /// runtime teardown) falls back to computing independently — losing the
    /// deduplication is acceptable, wedging forever is not.
    pub async fn run<F, Fut>(&self, key: &str, work: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        let entry = {
            let mut inflight = self.inflight.lock();
            match inflight.get(key) {
                Some(sender) => Entry::Follower(sender.subscribe()),
                None => {
                    let (sender, _) = broadcast::channel(1);
                    inflight.insert(key.to_string(), sender.clone());
                    Entry::Leader(sender)
                },
            }
        };

        match entry {
            Entry::Leader(sender) => {
                let value = work().await;
                {
                    let mut inflight = self.inflight.lock();
                    inflight.remove(key);
                }
                let _ = sender.send(value.clone());
                value
            },
            Entry::Follower(mut receiver) => match receiver.recv().await {
                Ok(value) => value,
                Err(_) => work().await,
            },
        }
    }

    /// Number of keys currently in flight.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inflight.lock().len()
    }
}

impl<T: Clone + Send + 'static> Default for SingleFlight<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn test_concurrent_joiners_share_one_computation() {
        let flight = Arc::new(SingleFlight::<u64>::new());
        let computations = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let flight = Arc::clone(&flight);
            let computations = Arc::clone(&computations);
            handles.push(tokio::spawn(async move {
                flight
                    .run("fp", || async {
                        computations.fetch_add(1, Ordering::SeqCst);
                        // Hold the flight open long enough for followers to pile up.
                        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                        42u64
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.expect("task completes"), 42);
        }
        // The first joiner leads; stragglers that arrive after completion
        // may recompute, but the 8 concurrent joiners must not fan out 8x.
        assert!(computations.load(Ordering::SeqCst) <= 2);
        assert_eq!(flight.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_serialize() {
        let flight = SingleFlight::<&'static str>::new();
        let a = flight.run("a", || async { "a" }).await;
        let b = flight.run("b", || async { "b" }).await;
        assert_eq!((a, b), ("a", "b"));
    }

    #[tokio::test]
    async fn test_sequential_runs_recompute() {
        let flight = SingleFlight::<u32>::new();
        let first = flight.run("k", || async { 1 }).await;
        let second = flight.run("k", || async { 2 }).await;
        assert_eq!((first, second), (1, 2), "flights do not cache completed values");
    }
}
