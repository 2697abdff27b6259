// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Resolver coordinator.
//!
//! The [`GeoResolver`] ties the components together:
//! - cache tier (in-memory or Redis) for recently fused answers
//! - store tier (in-memory or SQL) for the last fused answer per address
//! - offline, hosted and active-probe providers behind circuit breakers
//! - a [`Fuser`] that merges candidates into one location
//!
//! # Lifecycle
//!
//! ```text
//! Created → Connecting → Ready → ShuttingDown
//! ```
//!
//! A freshly created resolver already works with in-memory tiers and the
//! active probe; [`start()`](GeoResolver::start) connects whatever the config
//! points at.
//!
//! # Example
//!
//! ```rust,no_run
//! use geo_resolve::{GeoResolver, ResolverConfig, ResolverState};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let mut resolver = GeoResolver::new(ResolverConfig::from_env());
//! assert_eq!(resolver.state(), ResolverState::Created);
//!
//! resolver.start().await.expect("Start failed");
//! let location = resolver.resolve("8.8.8.8").await.expect("valid address");
//! println!("{} → {},{} ({})", "8.8.8.8", location.latitude, location.longitude, location.source);
//!
//! resolver.shutdown().await;
//! # }
//! ```

mod lifecycle;
mod pipeline;
mod types;

pub use pipeline::{cache_key, CACHE_KEY_PREFIX};
pub use types::{
    BackendHealth, HealthCheck, ProviderHealth, Resolution, ResolutionPath, ResolveError, ResolverState,
};

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;

use crate::config::ResolverConfig;
use crate::fusion::{Fuser, WeightedMeanFusion};
use crate::provider::{
    ActiveProbeProvider, GuardedProvider, LocationProvider, OfflineDbProvider, ProviderError, StoreProvider,
};
use crate::resilience::circuit_breaker::TierCircuits;
use crate::resilience::single_flight::SingleFlight;
use crate::storage::memory::{MemoryCache, MemoryStore};
use crate::storage::sql::SqlStore;
use crate::storage::traits::{CacheTier, LocationStore, StorageError};

/// Main resolver.
///
/// `Send + Sync`; share it behind an `Arc` and call [`resolve`](Self::resolve)
/// from as many tasks as needed.
pub struct GeoResolver {
    pub(super) config: ResolverConfig,

    /// Lifecycle state (broadcast to watchers)
    pub(super) state: watch::Sender<ResolverState>,
    pub(super) state_rx: watch::Receiver<ResolverState>,

    pub(super) cache: Arc<dyn CacheTier>,
    pub(super) cache_backend: &'static str,

    pub(super) store: Arc<dyn LocationStore>,
    pub(super) store_backend: &'static str,
    /// Reads store rows as fusion candidates
    pub(super) store_provider: StoreProvider,
    /// Direct SqlStore reference so shutdown can close the pool
    pub(super) sql_store: Option<Arc<SqlStore>>,

    pub(super) offline: Option<GuardedProvider>,
    /// Direct reference for reload()
    pub(super) offline_db: Option<Arc<OfflineDbProvider>>,
    pub(super) hosted: Option<GuardedProvider>,
    pub(super) probe: Option<GuardedProvider>,

    pub(super) fuser: Arc<dyn Fuser>,
    pub(super) tiers: TierCircuits,
    pub(super) flights: SingleFlight<Resolution>,
}

impl GeoResolver {
    /// Create a resolver with in-memory tiers and the active probe.
    ///
    /// Call [`start()`](Self::start) to connect the backends and providers
    /// named in `config`, or inject them with the `with_*` builders.
    pub fn new(config: ResolverConfig) -> Self {
        let (state_tx, state_rx) = watch::channel(ResolverState::Created);

        let store: Arc<dyn LocationStore> = Arc::new(MemoryStore::new());
        let store_provider = StoreProvider::new(store.clone(), config.store_weight);

        let probe = ActiveProbeProvider::new(
            config.probe_anchor,
            Duration::from_millis(config.probe_delay_ms),
            config.probe_weight,
        );
        let probe = GuardedProvider::new(Arc::new(probe), config.probe_timeout());

        Self {
            config,
            state: state_tx,
            state_rx,
            cache: Arc::new(MemoryCache::new()),
            cache_backend: "memory",
            store,
            store_backend: "memory",
            store_provider,
            sql_store: None,
            offline: None,
            offline_db: None,
            hosted: None,
            probe: Some(probe),
            fuser: Arc::new(WeightedMeanFusion),
            tiers: TierCircuits::new(),
            flights: SingleFlight::new(),
        }
    }

    /// Replace the cache tier.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<dyn CacheTier>) -> Self {
        self.cache = cache;
        self.cache_backend = "custom";
        self
    }

    /// Replace the store tier (also used as the store-backed candidate source).
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn LocationStore>) -> Self {
        self.store_provider = StoreProvider::new(store.clone(), self.config.store_weight);
        self.store = store;
        self.store_backend = "custom";
        self.sql_store = None;
        self
    }

    #[must_use]
    pub fn with_offline_provider(mut self, provider: Arc<dyn LocationProvider>) -> Self {
        self.offline = Some(GuardedProvider::new(provider, self.config.provider_timeout()));
        self.offline_db = None;
        self
    }

    #[must_use]
    pub fn with_hosted_provider(mut self, provider: Arc<dyn LocationProvider>) -> Self {
        self.hosted = Some(GuardedProvider::new(provider, self.config.provider_timeout()));
        self
    }

    #[must_use]
    pub fn with_probe_provider(mut self, provider: Arc<dyn LocationProvider>) -> Self {
        self.probe = Some(GuardedProvider::new(provider, self.config.probe_timeout()));
        self
    }

    /// Disable the active probe entirely.
    #[must_use]
    pub fn without_probe(mut self) -> Self {
        self.probe = None;
        self
    }

    #[must_use]
    pub fn with_fuser(mut self, fuser: Arc<dyn Fuser>) -> Self {
        self.fuser = fuser;
        self
    }

    #[must_use]
    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    #[must_use]
    pub fn state(&self) -> ResolverState {
        *self.state_rx.borrow()
    }

    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ResolverState> {
        self.state_rx.clone()
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state() == ResolverState::Ready
    }

    pub(super) fn set_state(&self, state: ResolverState) {
        self.state.send_replace(state);
        crate::metrics::set_resolver_state(&state.to_string());
    }

    /// Names of the providers that are configured and loaded, in call order.
    #[must_use]
    pub fn providers(&self) -> Vec<&str> {
        [&self.offline, &self.hosted, &self.probe]
            .into_iter()
            .flatten()
            .filter(|p| p.is_available())
            .map(GuardedProvider::name)
            .collect()
    }

    /// Re-read the offline database file.
    pub fn reload_offline_db(&self) -> Result<(), ProviderError> {
        match self.offline_db {
            Some(ref db) => db.reload(),
            None => Err(ProviderError::Unavailable("no offline database configured".into())),
        }
    }

    /// Probe tier connectivity (Redis PING, SQL SELECT 1) and collect state.
    pub async fn health_check(&self) -> HealthCheck {
        let _timer = crate::metrics::LatencyTimer::new("resolver", "health_check");
        let state = self.state();
        let ready = state == ResolverState::Ready;
        let timeout = self.config.tier_timeout();

        let (cache, store, store_rows) = tokio::join!(
            probe_tier(self.cache_backend, timeout, self.cache.ping()),
            probe_tier(self.store_backend, timeout, self.store.ping()),
            async {
                tokio::time::timeout(timeout, self.store.count())
                    .await
                    .ok()
                    .and_then(Result::ok)
            }
        );
        crate::metrics::set_backend_healthy("cache", cache.reachable);
        crate::metrics::set_backend_healthy("store", store.reachable);

        let providers = [&self.offline, &self.hosted, &self.probe]
            .into_iter()
            .flatten()
            .map(|p| ProviderHealth {
                name: p.name().to_string(),
                available: p.is_available(),
                circuit_rejections: p.circuit().rejections(),
            })
            .collect();

        let healthy = ready && cache.reachable && store.reachable;

        HealthCheck {
            state,
            ready,
            cache,
            store,
            store_rows,
            providers,
            in_flight: self.flights.in_flight(),
            healthy,
        }
    }
}

async fn probe_tier(
    backend: &'static str,
    timeout: Duration,
    ping: impl std::future::Future<Output = Result<(), StorageError>>,
) -> BackendHealth {
    let start = Instant::now();
    match tokio::time::timeout(timeout, ping).await {
        Ok(Ok(())) => BackendHealth {
            backend,
            reachable: true,
            latency_ms: Some(start.elapsed().as_millis() as u64),
        },
        _ => BackendHealth {
            backend,
            reachable: false,
            latency_ms: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_resolver_defaults() {
        let resolver = GeoResolver::new(ResolverConfig::default());
        assert_eq!(resolver.state(), ResolverState::Created);
        assert!(!resolver.is_ready());
        assert_eq!(resolver.providers(), vec!["active_probe"]);
        assert_eq!(resolver.fuser.name(), "weighted_mean");
    }

    #[test]
    fn test_without_probe_has_no_providers() {
        let resolver = GeoResolver::new(ResolverConfig::default()).without_probe();
        assert!(resolver.providers().is_empty());
    }

    #[test]
    fn test_reload_without_offline_db() {
        let resolver = GeoResolver::new(ResolverConfig::default());
        assert!(matches!(resolver.reload_offline_db(), Err(ProviderError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_health_check_in_memory() {
        let resolver = GeoResolver::new(ResolverConfig::default());
        let health = resolver.health_check().await;

        assert_eq!(health.state, ResolverState::Created);
        assert!(!health.healthy);
        assert!(health.cache.reachable);
        assert_eq!(health.cache.backend, "memory");
        assert!(health.store.reachable);
        assert_eq!(health.store_rows, Some(0));
        assert_eq!(health.providers.len(), 1);
        assert_eq!(health.in_flight, 0);
    }

    #[test]
    fn test_state_receiver_sees_transitions() {
        let resolver = GeoResolver::new(ResolverConfig::default());
        let rx = resolver.state_receiver();
        resolver.set_state(ResolverState::Ready);
        assert_eq!(*rx.borrow(), ResolverState::Ready);
        assert!(resolver.is_ready());
    }
}
