// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Redis backend for the cache tier.
//!
//! Values are the JSON form of a [`ResolvedLocation`] stored as plain strings
//! with an expiry:
//!
//! ```text
//! SET ip_geolocation:8.8.8.8 '{"latitude":37.4,...,"source":"fused_from_ipinfo"}' EX 3600
//! ```
//!
//! An optional namespace prefix is prepended to every key so the cache can
//! share a Redis instance with other applications.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{cmd, Client};

use super::traits::{CacheTier, StorageError};
use crate::location::ResolvedLocation;
use crate::resilience::retry::{retry, RetryConfig};

pub struct RedisCache {
    connection: ConnectionManager,
    /// Optional key prefix for namespacing (e.g., "geo:" → "geo:ip_geolocation:1.2.3.4")
    prefix: String,
}

impl RedisCache {
    /// Connect without a key prefix.
    pub async fn new(connection_string: &str) -> Result<Self, StorageError> {
        Self::with_prefix(connection_string, None).await
    }

    /// Connect with an optional key prefix.
    ///
    /// ```rust,no_run
    /// # use geo_resolve::storage::redis::RedisCache;
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let cache = RedisCache::with_prefix("redis://localhost", Some("geo:")).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn with_prefix(connection_string: &str, prefix: Option<&str>) -> Result<Self, StorageError> {
        let client = Client::open(connection_string)
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        // Fast-fail at startup rather than hanging on a bad URL
        let connection = retry("redis_connect", &RetryConfig::startup(), || async {
            ConnectionManager::new(client.clone()).await
        })
        .await
        .map_err(|e: redis::RedisError| StorageError::Backend(e.to_string()))?;

        Ok(Self {
            connection,
            prefix: prefix.unwrap_or("").to_string(),
        })
    }

    #[inline]
    fn prefixed_key(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}{}", self.prefix, key)
        }
    }

    /// Get a clone of the connection manager.
    pub fn connection(&self) -> ConnectionManager {
        self.connection.clone()
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn decode(key: &str, raw: &str) -> Result<ResolvedLocation, StorageError> {
        serde_json::from_str(raw).map_err(|e| StorageError::Corruption {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl CacheTier for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<ResolvedLocation>, StorageError> {
        let mut conn = self.connection.clone();
        let prefixed = self.prefixed_key(key);

        let raw: Option<String> = cmd("GET")
            .arg(&prefixed)
            .query_async(&mut conn)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        raw.map(|s| Self::decode(&prefixed, &s)).transpose()
    }

    async fn set(&self, key: &str, value: &ResolvedLocation, ttl: Duration) -> Result<(), StorageError> {
        let mut conn = self.connection.clone();
        let prefixed = self.prefixed_key(key);
        let doc = serde_json::to_string(value)
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        // Redis rejects EX 0
        let ttl_secs = ttl.as_secs().max(1);

        let _: () = cmd("SET")
            .arg(&prefixed)
            .arg(&doc)
            .arg("EX")
            .arg(ttl_secs)
            .query_async(&mut conn)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), StorageError> {
        let mut conn = self.connection.clone();
        let _: String = cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(())
    }
}
