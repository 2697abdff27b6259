// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-key in-flight deduplication.
//!
//! The first caller for a key becomes the leader and runs the work; callers
//! arriving while it is in flight subscribe to a `watch` channel and receive
//! the leader's result instead of repeating the work. If the leader is
//! dropped before finishing (request cancelled), the first follower to notice
//! takes over as leader and the others join it.
//!
//! ```
//! use geo_resolve::SingleFlight;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let flights: SingleFlight<u32> = SingleFlight::new();
//! let (value, shared) = flights.run("8.8.8.8", || async { 42 }).await;
//! assert_eq!(value, 42);
//! assert!(!shared);
//! assert_eq!(flights.in_flight(), 0);
//! # }
//! ```

use std::future::Future;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::watch;
use tracing::debug;

pub struct SingleFlight<T> {
    inflight: DashMap<String, watch::Receiver<Option<T>>>,
}

/// Removes the in-flight entry when the leader finishes or is cancelled.
struct LeaderGuard<'a, T> {
    map: &'a DashMap<String, watch::Receiver<Option<T>>>,
    key: &'a str,
}

impl<T> Drop for LeaderGuard<'_, T> {
    fn drop(&mut self) {
        self.map.remove(self.key);
    }
}

impl<T: Clone + Send + Sync> SingleFlight<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inflight: DashMap::new(),
        }
    }

    /// Number of keys currently being worked on.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inflight.len()
    }

    /// Run `work` for `key`, or join an identical call already in flight.
    ///
    /// Returns the value and whether it was shared from another caller.
    pub async fn run<F, Fut>(&self, key: &str, work: F) -> (T, bool)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let tx = loop {
            let mut rx = match self.inflight.entry(key.to_string()) {
                Entry::Occupied(entry) if entry.get().has_changed().is_ok() => entry.get().clone(),
                Entry::Occupied(mut entry) => {
                    let (tx, rx) = watch::channel(None);
                    entry.insert(rx);
                    break tx;
                }
                Entry::Vacant(entry) => {
                    let (tx, rx) = watch::channel(None);
                    entry.insert(rx);
                    break tx;
                }
            };
            if let Some(value) = Self::wait_for(&mut rx).await {
                crate::metrics::record_single_flight_join();
                return (value, true);
            }
            debug!(key = %key, "In-flight leader dropped, retrying");
        };

        // Declared after `tx`, so the entry is gone before followers see the close
        let _guard = LeaderGuard { map: &self.inflight, key };
        let value = work().await;
        tx.send_replace(Some(value.clone()));
        (value, false)
    }

    /// Wait for the leader's value; `None` if the leader went away without one.
    async fn wait_for(rx: &mut watch::Receiver<Option<T>>) -> Option<T> {
        loop {
            let current = rx.borrow_and_update().clone();
            if current.is_some() {
                return current;
            }
            rx.changed().await.ok()?;
        }
    }
}

impl<T: Clone + Send + Sync> Default for SingleFlight<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_single_caller_runs_work() {
        let flights: SingleFlight<u32> = SingleFlight::new();
        let (value, shared) = flights.run("k", || async { 7 }).await;
        assert_eq!(value, 7);
        assert!(!shared);
        assert_eq!(flights.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_execution() {
        let flights: Arc<SingleFlight<usize>> = Arc::new(SingleFlight::new());
        let runs = Arc::new(AtomicUsize::new(0));
        let mut handles = vec![];

        for _ in 0..8 {
            let flights = flights.clone();
            let runs = runs.clone();
            handles.push(tokio::spawn(async move {
                flights
                    .run("1.2.3.4", || async move {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        runs.fetch_add(1, Ordering::SeqCst) + 100
                    })
                    .await
            }));
        }

        let mut shared_count = 0;
        for handle in handles {
            let (value, shared) = handle.await.unwrap();
            assert_eq!(value, 100);
            if shared {
                shared_count += 1;
            }
        }

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(shared_count, 7);
        assert_eq!(flights.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_different_keys_run_independently() {
        let flights: Arc<SingleFlight<String>> = Arc::new(SingleFlight::new());
        let a = flights.run("a", || async { "A".to_string() });
        let b = flights.run("b", || async { "B".to_string() });
        let ((va, _), (vb, _)) = tokio::join!(a, b);
        assert_eq!(va, "A");
        assert_eq!(vb, "B");
    }

    #[tokio::test]
    async fn test_one_follower_takes_over_when_leader_cancelled() {
        let flights: Arc<SingleFlight<u32>> = Arc::new(SingleFlight::new());
        let runs = Arc::new(AtomicUsize::new(0));

        let leader_flights = flights.clone();
        let leader = tokio::spawn(async move {
            leader_flights
                .run("k", || async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    1
                })
                .await
        });
        // Let the leader register
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(flights.in_flight(), 1);

        let mut followers = vec![];
        for _ in 0..5 {
            let flights = flights.clone();
            let runs = runs.clone();
            followers.push(tokio::spawn(async move {
                flights
                    .run("k", || async move {
                        runs.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        2
                    })
                    .await
            }));
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        leader.abort();

        let mut shared_count = 0;
        for follower in followers {
            let (value, shared) = follower.await.unwrap();
            assert_eq!(value, 2);
            if shared {
                shared_count += 1;
            }
        }

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(shared_count, 4);
        assert_eq!(flights.in_flight(), 0);
    }
}
