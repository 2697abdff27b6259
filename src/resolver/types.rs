// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Public types for the resolver.

use serde::Serialize;
use thiserror::Error;

use crate::location::ResolvedLocation;
use crate::provider::ProviderReport;
use crate::storage::traits::StorageError;

/// Resolver lifecycle state.
///
/// Use [`super::GeoResolver::state()`] to check the current state or
/// [`super::GeoResolver::state_receiver()`] to watch for changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ResolverState {
    /// Just created, in-memory tiers only
    Created,
    /// Connecting to configured backends
    Connecting,
    /// Backends connected, providers loaded
    Ready,
    /// Shutdown in progress; new requests are refused
    ShuttingDown,
}

impl std::fmt::Display for ResolverState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Ready => write!(f, "Ready"),
            Self::ShuttingDown => write!(f, "ShuttingDown"),
        }
    }
}

/// Which step produced the answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ResolutionPath {
    /// Served from the cache tier
    Cache,
    /// Served from a stored result confident enough to skip the providers
    StoreAuthoritative,
    /// Candidates gathered and fused (includes the fallback answer)
    Fused,
}

impl ResolutionPath {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::StoreAuthoritative => "store_authoritative",
            Self::Fused => "fused",
        }
    }
}

impl std::fmt::Display for ResolutionPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolved location plus how it was reached.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub location: ResolvedLocation,
    pub path: ResolutionPath,
    /// Outcome of every provider called, in call order (offline, hosted, probe)
    pub providers: Vec<ProviderReport>,
    /// Result was shared from a concurrent resolution of the same address
    pub shared: bool,
}

impl Resolution {
    /// Whether the named provider was called for this resolution.
    #[must_use]
    pub fn called(&self, provider: &str) -> bool {
        self.providers.iter().any(|r| r.provider == provider)
    }
}

/// Errors surfaced by the resolver. Source failures never show up here:
/// they only remove that source from the request.
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("Invalid IP address: {0:?}")]
    InvalidAddress(String),
    #[error("Resolver is shutting down")]
    ShuttingDown,
    #[error("Startup failed: {0}")]
    Storage(#[from] StorageError),
}

/// Reachability of one tier.
#[derive(Debug, Clone, Serialize)]
pub struct BackendHealth {
    /// "memory", "redis", "sqlite", "mysql", "postgres" or "custom"
    pub backend: &'static str,
    pub reachable: bool,
    pub latency_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderHealth {
    pub name: String,
    pub available: bool,
    pub circuit_rejections: u64,
}

/// Snapshot for `/health` and `/ready` style endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    pub state: ResolverState,
    pub ready: bool,
    pub cache: BackendHealth,
    pub store: BackendHealth,
    /// Rows in the store, when the count query succeeded
    pub store_rows: Option<u64>,
    pub providers: Vec<ProviderHealth>,
    pub in_flight: usize,
    /// Ready and both tiers reachable
    pub healthy: bool,
}
