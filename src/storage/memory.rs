// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-process cache and store backends.
//!
//! Used when no Redis / SQL URL is configured, and as the tier doubles in tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use super::traits::{CacheTier, LocationStore, StorageError};
use crate::location::{now_millis, ResolvedLocation, StoredLocation};

struct CacheEntry {
    value: ResolvedLocation,
    expires_at: Instant,
}

/// Entry count at which a write first sweeps expired entries.
pub const DEFAULT_SWEEP_THRESHOLD: usize = 4096;

/// DashMap-backed cache with per-entry expiry.
///
/// Expired entries are dropped lazily on read, and in bulk whenever a write
/// pushes the map past the sweep threshold. The threshold then moves to twice
/// the surviving entry count (never below the configured floor), so sweeps
/// stay amortized while live entries grow.
pub struct MemoryCache {
    data: DashMap<String, CacheEntry>,
    sweep_floor: usize,
    next_sweep: AtomicUsize,
}

impl MemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self::with_sweep_threshold(DEFAULT_SWEEP_THRESHOLD)
    }

    #[must_use]
    pub fn with_sweep_threshold(threshold: usize) -> Self {
        let floor = threshold.max(1);
        Self {
            data: DashMap::new(),
            sweep_floor: floor,
            next_sweep: AtomicUsize::new(floor),
        }
    }

    /// Number of entries, including expired ones not yet swept.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.data.len();
        self.data.retain(|_, entry| entry.expires_at > now);
        before.saturating_sub(self.data.len())
    }

    fn maybe_sweep(&self) {
        let len = self.data.len();
        if len < self.next_sweep.load(Ordering::Relaxed) {
            return;
        }
        let removed = self.purge_expired();
        let remaining = self.data.len();
        self.next_sweep
            .store(remaining.saturating_mul(2).max(self.sweep_floor), Ordering::Relaxed);
        tracing::debug!(removed, remaining, "Swept expired cache entries");
    }

    pub fn clear(&self) {
        self.data.clear();
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheTier for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<ResolvedLocation>, StorageError> {
        let now = Instant::now();
        if let Some(entry) = self.data.get(key) {
            if entry.expires_at > now {
                return Ok(Some(entry.value.clone()));
            }
        }
        // Expired: remove lazily (the read guard above is already released)
        self.data.remove_if(key, |_, entry| entry.expires_at <= now);
        Ok(None)
    }

    async fn set(&self, key: &str, value: &ResolvedLocation, ttl: Duration) -> Result<(), StorageError> {
        self.data.insert(
            key.to_string(),
            CacheEntry {
                value: value.clone(),
                expires_at: Instant::now() + ttl,
            },
        );
        self.maybe_sweep();
        Ok(())
    }
}

/// DashMap-backed store. Rows live for the lifetime of the process.
pub struct MemoryStore {
    rows: DashMap<String, StoredLocation>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            rows: DashMap::new(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Seed a row directly, keeping the given location as-is.
    pub fn insert(&self, address: &str, location: ResolvedLocation) {
        self.rows.insert(
            address.to_string(),
            StoredLocation {
                address: address.to_string(),
                location,
                last_updated: now_millis(),
            },
        );
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LocationStore for MemoryStore {
    async fn lookup(&self, address: &str) -> Result<Option<StoredLocation>, StorageError> {
        Ok(self.rows.get(address).map(|r| r.value().clone()))
    }

    async fn upsert(&self, address: &str, location: &ResolvedLocation) -> Result<(), StorageError> {
        self.insert(address, location.clone());
        Ok(())
    }

    async fn count(&self) -> Result<u64, StorageError> {
        Ok(self.rows.len() as u64)
    }
}
