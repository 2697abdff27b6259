// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The resolution pipeline.
//!
//! ```text
//! resolve(addr)
//!   ├─ cache hit ─────────────────────────────► cached_<source>
//!   ├─ store row, confidence ≥ 95 ─► cache ───► cached_<source>
//!   ├─ store row < 95 → candidate
//!   ├─ offline ∥ hosted → candidates
//!   ├─ every candidate < 90 → active probe → candidate
//!   ├─ fuse
//!   └─ store upsert ∥ cache set (best effort) ► fused_from_<best> | fallback
//! ```
//!
//! Any tier or provider failure removes that source from the request and
//! nothing else.

use std::future::Future;
use std::net::IpAddr;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::location::{Estimate, ResolvedLocation, StoredLocation};
use crate::provider::{GuardedProvider, ProviderReport};
use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitError};
use crate::storage::traits::StorageError;

use super::{GeoResolver, Resolution, ResolutionPath, ResolveError, ResolverState};

/// Namespace of cache keys.
pub const CACHE_KEY_PREFIX: &str = "ip_geolocation:";

/// Cache key for a normalized address.
#[must_use]
pub fn cache_key(address: &str) -> String {
    format!("{}{}", CACHE_KEY_PREFIX, address)
}

/// The probe only runs while nothing confident enough is on the table.
/// A candidate without a confidence counts as below the threshold.
fn needs_probe(candidates: &[Estimate], threshold: f64) -> bool {
    candidates
        .iter()
        .all(|c| c.confidence_score.map_or(true, |score| score < threshold))
}

impl GeoResolver {
    /// Resolve an address to a location.
    ///
    /// Returns the fallback location (source `"fallback"`) when no source
    /// knows anything; errors only for malformed input or during shutdown.
    #[tracing::instrument(skip(self), fields(path))]
    pub async fn resolve(&self, address: &str) -> Result<ResolvedLocation, ResolveError> {
        let resolution = self.resolve_traced(address).await?;
        tracing::Span::current().record("path", resolution.path.as_str());
        Ok(resolution.location)
    }

    /// Resolve and report which path was taken and what each provider said.
    pub async fn resolve_traced(&self, address: &str) -> Result<Resolution, ResolveError> {
        let addr = self.admit(address)?;

        if !self.config.single_flight {
            return Ok(self.run_pipeline(addr).await);
        }

        let key = addr.to_string();
        let (mut resolution, shared) = self.flights.run(&key, || self.run_pipeline(addr)).await;
        resolution.shared = shared;
        Ok(resolution)
    }

    /// Refuse requests during shutdown and parse the address.
    fn admit(&self, address: &str) -> Result<IpAddr, ResolveError> {
        if self.state() == ResolverState::ShuttingDown {
            crate::metrics::record_rejected_request("shutting_down");
            return Err(ResolveError::ShuttingDown);
        }

        address.trim().parse::<IpAddr>().map_err(|_| {
            crate::metrics::record_rejected_request("invalid_address");
            ResolveError::InvalidAddress(address.to_string())
        })
    }

    async fn run_pipeline(&self, addr: IpAddr) -> Resolution {
        let start = Instant::now();
        let address = addr.to_string();
        let key = cache_key(&address);

        // 1. Cache
        if let Some(hit) = self.cache_get(&key).await {
            debug!(%address, source = %hit.source, "Cache hit");
            return self.finish(start, hit.into_cached(), ResolutionPath::Cache, Vec::new());
        }

        // 2. Store
        let mut candidates: Vec<Estimate> = Vec::new();
        if let Some(row) = self.store_lookup(&address).await {
            if row.location.confidence_score >= self.config.authoritative_confidence {
                debug!(%address, confidence = row.location.confidence_score, "Authoritative store hit");
                self.cache_set(&key, &row.location).await;
                return self.finish(start, row.location.into_cached(), ResolutionPath::StoreAuthoritative, Vec::new());
            }
            if row.location.is_fallback() {
                // A remembered "nothing known" is not evidence of null island
                debug!(%address, "Ignoring stored fallback row");
            } else {
                candidates.push(self.store_provider.candidate(&row));
            }
        }

        // 3. Offline and hosted, concurrently; appended in that order
        let (offline, hosted) = tokio::join!(
            call_provider(self.offline.as_ref(), addr),
            call_provider(self.hosted.as_ref(), addr)
        );
        let mut reports: Vec<ProviderReport> = Vec::with_capacity(3);
        for report in [offline, hosted].into_iter().flatten() {
            if let Some(estimate) = report.outcome.estimate() {
                candidates.push(estimate.clone());
            }
            reports.push(report);
        }

        // 4. Active probe, only if nothing confident so far
        let probe_needed = needs_probe(&candidates, self.config.probe_trigger_confidence);
        crate::metrics::record_probe_decision(probe_needed);
        if probe_needed {
            if let Some(report) = call_provider(self.probe.as_ref(), addr).await {
                if let Some(estimate) = report.outcome.estimate() {
                    candidates.push(estimate.clone());
                }
                reports.push(report);
            }
        } else {
            debug!(%address, "Confident candidate present, skipping active probe");
        }

        // 5. Fuse
        crate::metrics::record_fusion_candidates(candidates.len());
        let location = self.fuser.fuse(&candidates);
        crate::metrics::record_fused_confidence(location.confidence_score);

        // 6. Persist, best effort
        tokio::join!(self.store_upsert(&address, &location), self.cache_set(&key, &location));

        info!(
            %address,
            source = %location.source,
            confidence = location.confidence_score,
            accuracy = location.accuracy_radius,
            candidates = candidates.len(),
            "Resolved location"
        );
        self.finish(start, location, ResolutionPath::Fused, reports)
    }

    fn finish(
        &self,
        start: Instant,
        location: ResolvedLocation,
        path: ResolutionPath,
        providers: Vec<ProviderReport>,
    ) -> Resolution {
        crate::metrics::record_resolution(path.as_str());
        crate::metrics::record_latency("pipeline", path.as_str(), start.elapsed());
        Resolution {
            location,
            path,
            providers,
            shared: false,
        }
    }

    async fn cache_get(&self, key: &str) -> Option<ResolvedLocation> {
        let result = self
            .guarded_tier(&self.tiers.cache, "cache", "get", || self.cache.get(key))
            .await;
        match result {
            Ok(Some(value)) => {
                crate::metrics::record_tier_operation("cache", "get", "hit");
                Some(value)
            }
            Ok(None) => {
                crate::metrics::record_tier_operation("cache", "get", "miss");
                None
            }
            Err(e) => {
                warn!(key, error = %e, "Cache read failed, treating as miss");
                crate::metrics::record_tier_operation("cache", "get", "error");
                None
            }
        }
    }

    async fn cache_set(&self, key: &str, value: &ResolvedLocation) {
        let ttl = self.config.cache_ttl();
        let result = self
            .guarded_tier(&self.tiers.cache, "cache", "set", || self.cache.set(key, value, ttl))
            .await;
        match result {
            Ok(()) => crate::metrics::record_tier_operation("cache", "set", "ok"),
            Err(e) => {
                warn!(key, error = %e, "Cache write failed");
                crate::metrics::record_tier_operation("cache", "set", "error");
            }
        }
    }

    async fn store_lookup(&self, address: &str) -> Option<StoredLocation> {
        let result = self
            .guarded_tier(&self.tiers.store, "store", "lookup", || self.store_provider.row(address))
            .await;
        match result {
            Ok(Some(row)) => {
                crate::metrics::record_tier_operation("store", "lookup", "hit");
                Some(row)
            }
            Ok(None) => {
                crate::metrics::record_tier_operation("store", "lookup", "miss");
                None
            }
            Err(e) => {
                warn!(address, error = %e, "Store read failed, treating as miss");
                crate::metrics::record_tier_operation("store", "lookup", "error");
                None
            }
        }
    }

    async fn store_upsert(&self, address: &str, location: &ResolvedLocation) {
        let result = self
            .guarded_tier(&self.tiers.store, "store", "upsert", || self.store.upsert(address, location))
            .await;
        match result {
            Ok(()) => crate::metrics::record_tier_operation("store", "upsert", "ok"),
            Err(e) => {
                warn!(address, error = %e, "Store write failed");
                crate::metrics::record_tier_operation("store", "upsert", "error");
            }
        }
    }

    /// Run one tier operation under its circuit breaker and the tier timeout.
    async fn guarded_tier<T, F, Fut>(
        &self,
        circuit: &CircuitBreaker,
        tier: &'static str,
        operation: &'static str,
        op: F,
    ) -> Result<T, CircuitError<StorageError>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, StorageError>>,
    {
        let timeout = self.config.tier_timeout();
        let start = Instant::now();
        let result = circuit
            .call(|| async move {
                match tokio::time::timeout(timeout, op()).await {
                    Ok(result) => result,
                    Err(_) => {
                        crate::metrics::record_timeout(tier, operation);
                        Err(StorageError::Timeout(timeout))
                    }
                }
            })
            .await;
        crate::metrics::record_latency(tier, operation, start.elapsed());
        result
    }
}

/// Call a provider if it is configured and loaded.
async fn call_provider(provider: Option<&GuardedProvider>, addr: IpAddr) -> Option<ProviderReport> {
    match provider {
        Some(p) if p.is_available() => Some(p.report(addr).await),
        _ => None,
    }
}
