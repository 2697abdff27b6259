// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::location::{ResolvedLocation, StoredLocation};

#[derive(Error, Debug, Clone)]
pub enum StorageError {
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Data corruption detected for '{key}': {reason}")]
    Corruption {
        key: String,
        reason: String,
    },
    #[error("Storage operation timed out after {0:?}")]
    Timeout(Duration),
}

/// Fast key-value layer holding fused results with an expiry.
#[async_trait]
pub trait CacheTier: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<ResolvedLocation>, StorageError>;

    /// Write `value` under `key`, (re)starting its TTL clock.
    async fn set(&self, key: &str, value: &ResolvedLocation, ttl: Duration) -> Result<(), StorageError>;

    /// Connectivity probe for health checks. In-process backends are always up.
    async fn ping(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

/// Durable layer keyed by address: one row per address, overwritten on each fusion.
#[async_trait]
pub trait LocationStore: Send + Sync {
    async fn lookup(&self, address: &str) -> Result<Option<StoredLocation>, StorageError>;

    /// Insert or replace the row for `address`, bumping its last-modified time.
    async fn upsert(&self, address: &str, location: &ResolvedLocation) -> Result<(), StorageError>;

    /// Number of rows in the store.
    async fn count(&self) -> Result<u64, StorageError>;

    async fn ping(&self) -> Result<(), StorageError> {
        Ok(())
    }
}
