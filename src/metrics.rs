// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for geo-resolve.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The host process is responsible for choosing the exporter (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `geo_resolve_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `tier`: cache, store
//! - `provider`: MaxMind, ipinfo, active_probe, ...
//! - `path`: cache, store_authoritative, fused
//! - `status` / `outcome`: hit, miss, error, found, absent, timeout, rejected

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Record a cache/store operation outcome
pub fn record_tier_operation(tier: &str, operation: &str, status: &str) {
    counter!(
        "geo_resolve_tier_operations_total",
        "tier" => tier.to_string(),
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record operation latency
pub fn record_latency(component: &str, operation: &str, duration: Duration) {
    histogram!(
        "geo_resolve_operation_seconds",
        "component" => component.to_string(),
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record a provider call outcome
pub fn record_provider_call(provider: &str, outcome: &str) {
    counter!(
        "geo_resolve_provider_calls_total",
        "provider" => provider.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record which terminal path a resolution took
pub fn record_resolution(path: &str) {
    counter!(
        "geo_resolve_resolutions_total",
        "path" => path.to_string()
    )
    .increment(1);
}

/// Record a rejected request (malformed address, shutting down)
pub fn record_rejected_request(reason: &str) {
    counter!(
        "geo_resolve_rejected_requests_total",
        "reason" => reason.to_string()
    )
    .increment(1);
}

/// Record how many candidates went into a fusion
pub fn record_fusion_candidates(count: usize) {
    histogram!("geo_resolve_fusion_candidates").record(count as f64);
}

/// Record the fused confidence score
pub fn record_fused_confidence(confidence: f64) {
    histogram!("geo_resolve_fused_confidence").record(confidence);
}

/// Record that the active probe was gated on/off
pub fn record_probe_decision(invoked: bool) {
    let decision = if invoked { "invoked" } else { "skipped" };
    counter!(
        "geo_resolve_probe_decisions_total",
        "decision" => decision
    )
    .increment(1);
}

/// Record a timeout
pub fn record_timeout(component: &str, operation: &str) {
    counter!(
        "geo_resolve_timeouts_total",
        "component" => component.to_string(),
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// Record an error with category for alerting
pub fn record_error(component: &str, operation: &str, error_type: &str) {
    counter!(
        "geo_resolve_errors_total",
        "component" => component.to_string(),
        "operation" => operation.to_string(),
        "error_type" => error_type.to_string()
    )
    .increment(1);
}

/// Record a connection/backend error
pub fn record_connection_error(backend: &str) {
    counter!(
        "geo_resolve_connection_errors_total",
        "backend" => backend.to_string()
    )
    .increment(1);
}

/// Record a request that joined an in-flight resolution
pub fn record_single_flight_join() {
    counter!("geo_resolve_single_flight_joins_total").increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// BACKEND HEALTH - Connection status
// ═══════════════════════════════════════════════════════════════════════════

/// Set backend health status (1 = healthy, 0 = unhealthy)
pub fn set_backend_healthy(backend: &str, healthy: bool) {
    gauge!(
        "geo_resolve_backend_healthy",
        "backend" => backend.to_string()
    )
    .set(if healthy { 1.0 } else { 0.0 });
}

/// Set whether a provider is configured and loaded (1 = enabled)
pub fn set_provider_enabled(provider: &str, enabled: bool) {
    gauge!(
        "geo_resolve_provider_enabled",
        "provider" => provider.to_string()
    )
    .set(if enabled { 1.0 } else { 0.0 });
}

/// Record circuit breaker call outcome
pub fn record_circuit_breaker_call(circuit: &str, outcome: &str) {
    counter!(
        "geo_resolve_circuit_breaker_calls_total",
        "circuit" => circuit.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// STARTUP - Timing for cold start monitoring
// ═══════════════════════════════════════════════════════════════════════════

/// Record startup phase duration
pub fn record_startup_phase(phase: &str, duration: Duration) {
    histogram!(
        "geo_resolve_startup_seconds",
        "phase" => phase.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record total startup time
pub fn record_startup_total(duration: Duration) {
    histogram!("geo_resolve_startup_total_seconds").record(duration.as_secs_f64());
}

/// Record resolver state transitions
pub fn set_resolver_state(state: &str) {
    counter!(
        "geo_resolve_state_transitions_total",
        "state" => state.to_string()
    )
    .increment(1);
}

/// A timing guard that records latency on drop
pub struct LatencyTimer {
    component: &'static str,
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    pub fn new(component: &'static str, operation: &'static str) -> Self {
        Self {
            component,
            operation,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_latency(self.component, self.operation, self.start.elapsed());
    }
}
