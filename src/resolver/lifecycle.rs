// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Resolver lifecycle: start and shutdown.

use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info, warn};

use crate::provider::{GuardedProvider, HostedApiProvider, OfflineDbProvider, StoreProvider};
use crate::storage::redis::RedisCache;
use crate::storage::sql::SqlStore;

use super::{GeoResolver, ResolveError, ResolverState};

impl GeoResolver {
    /// Connect the configured backends and load the providers.
    ///
    /// Startup flow:
    /// 1. Connect SQL (store). A configured but unreachable store is fatal.
    /// 2. Connect Redis (cache). Failure falls back to the in-memory cache.
    /// 3. Open the offline database. A missing file disables the provider.
    /// 4. Build the hosted client if a token is configured.
    ///
    /// Providers injected with the `with_*` builders are kept as-is.
    #[tracing::instrument(skip(self), fields(has_redis, has_sql))]
    pub async fn start(&mut self) -> Result<(), ResolveError> {
        let startup_start = Instant::now();
        info!("Starting geo resolver...");
        self.set_state(ResolverState::Connecting);

        // ========== PHASE 1: SQL store ==========
        let phase_start = Instant::now();
        if let Some(ref sql_url) = self.config.sql_url {
            info!("Connecting to SQL store...");
            match SqlStore::new(sql_url).await {
                Ok(store) => {
                    let dialect = store.dialect();
                    let store = Arc::new(store);
                    self.store_provider = StoreProvider::new(store.clone(), self.config.store_weight);
                    self.sql_store = Some(store.clone());
                    self.store = store;
                    self.store_backend = dialect.as_str();
                    tracing::Span::current().record("has_sql", true);
                    crate::metrics::set_backend_healthy("store", true);
                    crate::metrics::record_startup_phase("sql_connect", phase_start.elapsed());
                    info!(dialect = dialect.as_str(), "SQL store connected");
                }
                Err(e) => {
                    tracing::Span::current().record("has_sql", false);
                    error!(error = %e, "Failed to connect to SQL store");
                    crate::metrics::set_backend_healthy("store", false);
                    crate::metrics::record_connection_error("sql");
                    self.set_state(ResolverState::Created);
                    return Err(ResolveError::Storage(e));
                }
            }
        } else {
            tracing::Span::current().record("has_sql", false);
            info!("No SQL URL configured, using in-memory store");
        }

        // ========== PHASE 2: Redis cache ==========
        let phase_start = Instant::now();
        if let Some(ref redis_url) = self.config.redis_url {
            info!(prefix = ?self.config.redis_prefix, "Connecting to Redis cache...");
            match RedisCache::with_prefix(redis_url, self.config.redis_prefix.as_deref()).await {
                Ok(cache) => {
                    self.cache = Arc::new(cache);
                    self.cache_backend = "redis";
                    tracing::Span::current().record("has_redis", true);
                    crate::metrics::set_backend_healthy("cache", true);
                    crate::metrics::record_startup_phase("redis_connect", phase_start.elapsed());
                    info!("Redis cache connected");
                }
                Err(e) => {
                    tracing::Span::current().record("has_redis", false);
                    warn!(error = %e, "Failed to connect to Redis, continuing with in-memory cache");
                    crate::metrics::set_backend_healthy("cache", false);
                    crate::metrics::record_connection_error("redis");
                }
            }
        } else {
            tracing::Span::current().record("has_redis", false);
        }

        // ========== PHASE 3: Offline database ==========
        if self.offline.is_none() {
            let phase_start = Instant::now();
            let db = Arc::new(OfflineDbProvider::open(&self.config.maxmind_db_path, self.config.offline_weight));
            self.offline = Some(GuardedProvider::new(db.clone(), self.config.provider_timeout()));
            self.offline_db = Some(db);
            crate::metrics::record_startup_phase("offline_db_open", phase_start.elapsed());
        }

        // ========== PHASE 4: Hosted lookup ==========
        if self.hosted.is_none() {
            match self.config.ipinfo_token {
                Some(ref token) => match HostedApiProvider::new(
                    self.config.ipinfo_base_url.clone(),
                    token.clone(),
                    self.config.hosted_weight,
                    self.config.provider_timeout(),
                ) {
                    Ok(provider) => {
                        self.hosted = Some(GuardedProvider::new(Arc::new(provider), self.config.provider_timeout()));
                        crate::metrics::set_provider_enabled("ipinfo", true);
                        info!(base_url = %self.config.ipinfo_base_url, "Hosted lookup enabled");
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to build hosted lookup client, skipping");
                        crate::metrics::set_provider_enabled("ipinfo", false);
                    }
                },
                None => {
                    warn!("IPINFO_TOKEN not set, hosted lookups will be skipped");
                    crate::metrics::set_provider_enabled("ipinfo", false);
                }
            }
        }

        self.set_state(ResolverState::Ready);
        crate::metrics::record_startup_total(startup_start.elapsed());
        info!(
            cache = self.cache_backend,
            store = self.store_backend,
            providers = ?self.providers(),
            "Geo resolver ready"
        );
        Ok(())
    }

    /// Refuse new requests and close pooled connections.
    ///
    /// Requests already in flight finish normally; their best-effort writes
    /// may fail once the pool is closed.
    #[tracing::instrument(skip(self))]
    pub async fn shutdown(&self) {
        let shutdown_start = Instant::now();
        info!("Initiating geo resolver shutdown...");
        self.set_state(ResolverState::ShuttingDown);

        if let Some(ref sql) = self.sql_store {
            sql.close().await;
            info!("SQL pool closed");
        }

        crate::metrics::record_startup_phase("shutdown", shutdown_start.elapsed());
        info!("Geo resolver shutdown complete");
    }
}
