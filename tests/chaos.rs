//! Chaos Testing for Geo Resolve
//!
//! This module tests failure scenarios using:
//! 1. **Failing tier wrappers** - precise error injection at specific call counts
//! 2. **Hanging tiers** - backends that never answer
//! 3. **Data corruption** - garbage coming back from the cache
//!
//! Container-level chaos (killing Redis mid-run) lives in `integration.rs`.
//!
//! # Running Chaos Tests
//! ```bash
//! cargo test --test chaos -- --nocapture
//! ```

use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use geo_resolve::{
    cache_key, CacheTier, Estimate, GeoResolver, LocationProvider, LocationStore, MemoryCache, MemoryStore,
    ProviderError, ResolutionPath, ResolvedLocation, ResolverConfig, StorageError, StoredLocation,
};

// =============================================================================
// Failing Tier Wrappers - Precise Error Injection
// =============================================================================

/// How an injected failure shows up.
#[derive(Clone, Copy)]
enum Fault {
    Error,
    Corrupt,
    Hang,
}

/// Decides, per call, whether to inject a fault.
struct FaultPlan {
    call_count: AtomicU64,
    /// Fail on these call numbers (1-indexed)
    fail_on_calls: Vec<u64>,
    /// Fail every call from `fail_on_calls[0]` onwards
    fail_permanently: AtomicBool,
    fault: Fault,
}

impl FaultPlan {
    fn on_calls(fail_on_calls: Vec<u64>, fault: Fault) -> Self {
        Self {
            call_count: AtomicU64::new(0),
            fail_on_calls,
            fail_permanently: AtomicBool::new(false),
            fault,
        }
    }

    fn always(fault: Fault) -> Self {
        Self::after(0, fault)
    }

    /// Fail permanently after N good calls
    fn after(n: u64, fault: Fault) -> Self {
        let plan = Self::on_calls(vec![n + 1], fault);
        plan.fail_permanently.store(true, Ordering::SeqCst);
        plan
    }

    fn calls(&self) -> u64 {
        self.call_count.load(Ordering::SeqCst)
    }

    fn should_fail(&self) -> bool {
        let count = self.call_count.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_permanently.load(Ordering::SeqCst) {
            count >= self.fail_on_calls[0]
        } else {
            self.fail_on_calls.contains(&count)
        }
    }

    async fn inject(&self, key: &str) -> Result<(), StorageError> {
        if !self.should_fail() {
            return Ok(());
        }
        match self.fault {
            Fault::Error => Err(StorageError::Backend("injected failure".into())),
            Fault::Corrupt => Err(StorageError::Corruption {
                key: key.to_string(),
                reason: "expected value at line 1 column 1".into(),
            }),
            Fault::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            }
        }
    }
}

struct FailingCache {
    inner: MemoryCache,
    plan: FaultPlan,
}

impl FailingCache {
    fn new(plan: FaultPlan) -> Arc<Self> {
        Arc::new(Self { inner: MemoryCache::new(), plan })
    }
}

#[async_trait]
impl CacheTier for FailingCache {
    async fn get(&self, key: &str) -> Result<Option<ResolvedLocation>, StorageError> {
        self.plan.inject(key).await?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &ResolvedLocation, ttl: Duration) -> Result<(), StorageError> {
        self.plan.inject(key).await?;
        self.inner.set(key, value, ttl).await
    }

    async fn ping(&self) -> Result<(), StorageError> {
        self.plan.inject("ping").await
    }
}

struct FailingStore {
    inner: MemoryStore,
    plan: FaultPlan,
}

impl FailingStore {
    fn new(plan: FaultPlan) -> Arc<Self> {
        Arc::new(Self { inner: MemoryStore::new(), plan })
    }
}

#[async_trait]
impl LocationStore for FailingStore {
    async fn lookup(&self, address: &str) -> Result<Option<StoredLocation>, StorageError> {
        self.plan.inject(address).await?;
        self.inner.lookup(address).await
    }

    async fn upsert(&self, address: &str, location: &ResolvedLocation) -> Result<(), StorageError> {
        self.plan.inject(address).await?;
        self.inner.upsert(address, location).await
    }

    async fn count(&self) -> Result<u64, StorageError> {
        self.inner.count().await
    }

    async fn ping(&self) -> Result<(), StorageError> {
        self.plan.inject("ping").await
    }
}

/// Always answers with the same estimate.
struct FixedProvider(Estimate);

#[async_trait]
impl LocationProvider for FixedProvider {
    fn name(&self) -> &str {
        &self.0.source
    }

    async fn lookup(&self, _address: IpAddr) -> Result<Option<Estimate>, ProviderError> {
        Ok(Some(self.0.clone()))
    }
}

fn config() -> ResolverConfig {
    ResolverConfig {
        tier_timeout_ms: 50,
        ..Default::default()
    }
}

fn offline() -> Arc<FixedProvider> {
    Arc::new(FixedProvider(Estimate::new("MaxMind", 52.52, 13.40, 91.0).with_accuracy(1000)))
}

/// Resolver with the given tiers and one confident offline provider.
fn resolver(cache: Arc<dyn CacheTier>, store: Arc<dyn LocationStore>) -> GeoResolver {
    GeoResolver::new(config())
        .with_cache(cache)
        .with_store(store)
        .with_offline_provider(offline())
        .without_probe()
}

// =============================================================================
// Cache Failures
// =============================================================================

#[tokio::test]
async fn chaos_cache_down_degrades_to_miss() {
    let cache = FailingCache::new(FaultPlan::always(Fault::Error));
    let store = Arc::new(MemoryStore::new());
    let resolver = resolver(cache.clone(), store.clone());

    let resolution = resolver.resolve_traced("192.0.2.1").await.unwrap();

    assert_eq!(resolution.path, ResolutionPath::Fused);
    assert_eq!(resolution.location.source, "fused_from_MaxMind");
    // Store write still happened
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn chaos_corrupt_cache_entry_is_a_miss() {
    let cache = FailingCache::new(FaultPlan::on_calls(vec![1], Fault::Corrupt));
    let resolver = resolver(cache.clone(), Arc::new(MemoryStore::new()));

    let resolution = resolver.resolve_traced("192.0.2.2").await.unwrap();
    assert_eq!(resolution.path, ResolutionPath::Fused);

    // Call 2 was the set, so the next get succeeds
    let resolution = resolver.resolve_traced("192.0.2.2").await.unwrap();
    assert_eq!(resolution.path, ResolutionPath::Cache);
}

#[tokio::test]
async fn chaos_hanging_cache_is_cut_by_tier_timeout() {
    let cache = FailingCache::new(FaultPlan::always(Fault::Hang));
    let resolver = resolver(cache, Arc::new(MemoryStore::new()));

    let started = Instant::now();
    let loc = resolver.resolve("192.0.2.3").await.unwrap();

    assert_eq!(loc.source, "fused_from_MaxMind");
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn chaos_cache_dies_mid_run() {
    let cache = FailingCache::new(FaultPlan::after(2, Fault::Error));
    let resolver = resolver(cache.clone(), Arc::new(MemoryStore::new()));

    // get (miss) + set succeed
    let first = resolver.resolve_traced("192.0.2.4").await.unwrap();
    assert_eq!(first.path, ResolutionPath::Fused);

    // Cache is now down: the stored row (< 95) is fused again instead
    let second = resolver.resolve_traced("192.0.2.4").await.unwrap();
    assert_eq!(second.path, ResolutionPath::Fused);
    assert!((second.location.latitude - 52.52).abs() < 1e-9);
}

#[tokio::test]
async fn chaos_repeated_cache_failures_trip_the_circuit() {
    let cache = FailingCache::new(FaultPlan::always(Fault::Error));
    let resolver = resolver(cache.clone(), Arc::new(MemoryStore::new()));

    for i in 0..40 {
        let loc = resolver.resolve(&format!("10.0.0.{}", i)).await.unwrap();
        assert_eq!(loc.source, "fused_from_MaxMind");
    }

    // Two cache calls per resolution; once open, calls no longer reach the backend
    assert!(cache.plan.calls() < 80, "calls = {}", cache.plan.calls());
}

// =============================================================================
// Store Failures
// =============================================================================

#[tokio::test]
async fn chaos_store_down_still_resolves_and_caches() {
    let cache = Arc::new(MemoryCache::new());
    let store = FailingStore::new(FaultPlan::always(Fault::Error));
    let resolver = resolver(cache.clone(), store);

    let loc = resolver.resolve("192.0.2.10").await.unwrap();

    assert_eq!(loc.source, "fused_from_MaxMind");
    let cached = cache.get(&cache_key("192.0.2.10")).await.unwrap();
    assert_eq!(cached, Some(loc));
}

#[tokio::test]
async fn chaos_hanging_store_is_cut_by_tier_timeout() {
    let store = FailingStore::new(FaultPlan::always(Fault::Hang));
    let resolver = resolver(Arc::new(MemoryCache::new()), store);

    let started = Instant::now();
    let loc = resolver.resolve("192.0.2.11").await.unwrap();

    assert_eq!(loc.source, "fused_from_MaxMind");
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn chaos_store_write_failure_is_best_effort() {
    // lookup ok, upsert fails
    let store = FailingStore::new(FaultPlan::on_calls(vec![2], Fault::Error));
    let cache = Arc::new(MemoryCache::new());
    let resolver = resolver(cache.clone(), store.clone());

    let loc = resolver.resolve("192.0.2.12").await.unwrap();

    assert_eq!(loc.source, "fused_from_MaxMind");
    assert_eq!(store.inner.len(), 0);
    assert_eq!(cache.len(), 1);
}

// =============================================================================
// Everything Down
// =============================================================================

#[tokio::test]
async fn chaos_both_tiers_down() {
    let resolver = resolver(
        FailingCache::new(FaultPlan::always(Fault::Error)),
        FailingStore::new(FaultPlan::always(Fault::Error)),
    );

    let loc = resolver.resolve("192.0.2.20").await.unwrap();
    assert!((loc.latitude - 52.52).abs() < 1e-9);
    assert_eq!(loc.confidence_score, 91.0);
}

#[tokio::test]
async fn chaos_everything_down_yields_fallback() {
    let resolver = GeoResolver::new(config())
        .with_cache(FailingCache::new(FaultPlan::always(Fault::Error)))
        .with_store(FailingStore::new(FaultPlan::always(Fault::Error)))
        .without_probe();

    let loc = resolver.resolve("192.0.2.21").await.unwrap();
    assert!(loc.is_fallback());
}

#[tokio::test]
async fn chaos_health_check_reports_unreachable_tiers() {
    let resolver = resolver(
        FailingCache::new(FaultPlan::always(Fault::Error)),
        FailingStore::new(FaultPlan::always(Fault::Hang)),
    );

    let health = resolver.health_check().await;

    assert!(!health.cache.reachable);
    assert!(!health.store.reachable);
    assert!(health.cache.latency_ms.is_none());
    assert!(!health.healthy);
}
