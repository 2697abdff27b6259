// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Location providers.
//!
//! Each provider turns an address into at most one [`Estimate`]. The pipeline
//! never calls a provider directly: every call goes through a
//! [`GuardedProvider`], which bounds it with a timeout, routes it through a
//! circuit breaker and validates whatever comes back. The result is a typed
//! [`ProviderOutcome`], so a provider that errors, times out or is tripped
//! open looks exactly like one that simply has no data.
//!
//! ```text
//!   addr ──► GuardedProvider ──► CircuitBreaker ──► timeout ──► LocationProvider::lookup
//!                  │
//!                  └──► ProviderOutcome::{Found(Estimate), Absent(reason)}
//! ```

pub mod ipinfo;
pub mod maxmind;
pub mod probe;
pub mod store;

pub use ipinfo::HostedApiProvider;
pub use maxmind::OfflineDbProvider;
pub use probe::ActiveProbeProvider;
pub use store::StoreProvider;

use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use crate::location::Estimate;
use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitConfig, CircuitError};

#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    #[error("Provider unavailable: {0}")]
    Unavailable(String),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("Malformed response: {0}")]
    Malformed(String),
    #[error("Provider call timed out after {0:?}")]
    Timeout(Duration),
}

/// A source of location estimates.
#[async_trait]
pub trait LocationProvider: Send + Sync {
    /// Stable name, used as the estimate source and in logs/metrics.
    fn name(&self) -> &str;

    /// Look up `address`. `Ok(None)` means the source has no data for it.
    async fn lookup(&self, address: IpAddr) -> Result<Option<Estimate>, ProviderError>;

    /// Whether the provider is loaded and worth calling.
    fn is_available(&self) -> bool {
        true
    }
}

/// Why a provider contributed nothing.
#[derive(Debug, Clone, PartialEq)]
pub enum AbsenceReason {
    NotFound,
    Failed(String),
    TimedOut(Duration),
    CircuitOpen,
}

/// Result of one guarded provider call.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderOutcome {
    Found(Estimate),
    Absent(AbsenceReason),
}

impl ProviderOutcome {
    #[must_use]
    pub fn estimate(&self) -> Option<&Estimate> {
        match self {
            Self::Found(estimate) => Some(estimate),
            Self::Absent(_) => None,
        }
    }

    /// Metric label for this outcome.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Found(_) => "found",
            Self::Absent(AbsenceReason::NotFound) => "not_found",
            Self::Absent(AbsenceReason::Failed(_)) => "failed",
            Self::Absent(AbsenceReason::TimedOut(_)) => "timeout",
            Self::Absent(AbsenceReason::CircuitOpen) => "rejected",
        }
    }
}

/// Outcome of a provider call, tagged with the provider's name.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderReport {
    pub provider: String,
    pub outcome: ProviderOutcome,
}

/// A provider behind a timeout, a circuit breaker and output validation.
pub struct GuardedProvider {
    inner: Arc<dyn LocationProvider>,
    circuit: CircuitBreaker,
    timeout: Duration,
}

impl GuardedProvider {
    pub fn new(inner: Arc<dyn LocationProvider>, timeout: Duration) -> Self {
        Self::with_circuit(inner, timeout, CircuitConfig::provider())
    }

    pub fn with_circuit(inner: Arc<dyn LocationProvider>, timeout: Duration, config: CircuitConfig) -> Self {
        let circuit = CircuitBreaker::new(inner.name().to_string(), config);
        Self { inner, circuit, timeout }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.inner.name()
    }

    #[must_use]
    pub fn is_available(&self) -> bool {
        self.inner.is_available()
    }

    #[must_use]
    pub fn circuit(&self) -> &CircuitBreaker {
        &self.circuit
    }

    /// Call the provider. Never fails: every error becomes an absence.
    pub async fn lookup(&self, address: IpAddr) -> ProviderOutcome {
        let start = Instant::now();
        let timeout = self.timeout;
        let inner = &self.inner;

        let result = self
            .circuit
            .call(|| async move {
                match tokio::time::timeout(timeout, inner.lookup(address)).await {
                    Ok(result) => result,
                    Err(_) => Err(ProviderError::Timeout(timeout)),
                }
            })
            .await;

        let outcome = match result {
            Ok(Some(estimate)) => match estimate.validate() {
                Ok(()) => ProviderOutcome::Found(estimate),
                Err(reason) => {
                    warn!(provider = %self.name(), %address, %reason, "Provider returned invalid estimate");
                    ProviderOutcome::Absent(AbsenceReason::Failed(reason))
                }
            },
            Ok(None) => ProviderOutcome::Absent(AbsenceReason::NotFound),
            Err(CircuitError::Rejected) => ProviderOutcome::Absent(AbsenceReason::CircuitOpen),
            Err(CircuitError::Inner(ProviderError::Timeout(after))) => {
                warn!(provider = %self.name(), %address, ?after, "Provider timed out");
                crate::metrics::record_timeout("provider", self.name());
                ProviderOutcome::Absent(AbsenceReason::TimedOut(after))
            }
            Err(CircuitError::Inner(e)) => {
                warn!(provider = %self.name(), %address, error = %e, "Provider failed");
                crate::metrics::record_error("provider", self.name(), error_type(&e));
                ProviderOutcome::Absent(AbsenceReason::Failed(e.to_string()))
            }
        };

        debug!(provider = %self.name(), %address, outcome = outcome.label(), "Provider call finished");
        crate::metrics::record_provider_call(self.name(), outcome.label());
        crate::metrics::record_latency("provider", "lookup", start.elapsed());
        outcome
    }

    /// Call the provider and tag the outcome with its name.
    pub async fn report(&self, address: IpAddr) -> ProviderReport {
        ProviderReport {
            provider: self.name().to_string(),
            outcome: self.lookup(address).await,
        }
    }
}

fn error_type(error: &ProviderError) -> &'static str {
    match error {
        ProviderError::Unavailable(_) => "unavailable",
        ProviderError::Http(_) => "http",
        ProviderError::Malformed(_) => "malformed",
        ProviderError::Timeout(_) => "timeout",
    }
}
