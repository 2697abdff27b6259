// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQL backend for the store tier.
//!
//! One row per address, overwritten on every fresh fusion:
//! ```sql
//! CREATE TABLE ip_locations (
//!   ip_address VARCHAR(45) PRIMARY KEY,
//!   latitude DOUBLE NOT NULL,
//!   longitude DOUBLE NOT NULL,
//!   accuracy_radius BIGINT NOT NULL,
//!   confidence_score DOUBLE NOT NULL,
//!   source VARCHAR(128) NOT NULL,
//!   last_updated BIGINT NOT NULL     -- epoch millis
//! )
//! ```
//!
//! ## sqlx Any Driver Quirks
//!
//! The `Any` driver passes SQL through untouched, so placeholders and upsert
//! syntax differ per backend (`?` vs `$1`, `ON CONFLICT` vs
//! `ON DUPLICATE KEY`). MySQL text columns can come back as bytes, so text is
//! read as `String` first and `Vec<u8>` second.

use std::sync::Once;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Row};

use super::traits::{LocationStore, StorageError};
use crate::location::{now_millis, ResolvedLocation, StoredLocation};
use crate::resilience::retry::{retry, RetryConfig};

// SQLx `Any` driver requires runtime installation
static INSTALL_DRIVERS: Once = Once::new();

fn install_drivers() {
    INSTALL_DRIVERS.call_once(|| {
        sqlx::any::install_default_drivers();
    });
}

/// SQL flavour, detected from the connection string scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    MySql,
    Postgres,
}

impl Dialect {
    pub fn from_url(url: &str) -> Result<Self, StorageError> {
        if url.starts_with("sqlite:") {
            Ok(Self::Sqlite)
        } else if url.starts_with("mysql:") || url.starts_with("mariadb:") {
            Ok(Self::MySql)
        } else if url.starts_with("postgres:") || url.starts_with("postgresql:") {
            Ok(Self::Postgres)
        } else {
            Err(StorageError::Backend(format!("Unsupported SQL URL scheme: {}", url)))
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::MySql => "mysql",
            Self::Postgres => "postgres",
        }
    }

    fn create_table(self) -> &'static str {
        match self {
            Self::Sqlite => {
                r#"
                CREATE TABLE IF NOT EXISTS ip_locations (
                    ip_address TEXT PRIMARY KEY,
                    latitude REAL NOT NULL,
                    longitude REAL NOT NULL,
                    accuracy_radius INTEGER NOT NULL,
                    confidence_score REAL NOT NULL,
                    source TEXT NOT NULL,
                    last_updated INTEGER NOT NULL
                )
                "#
            }
            Self::MySql => {
                r#"
                CREATE TABLE IF NOT EXISTS ip_locations (
                    ip_address VARCHAR(45) PRIMARY KEY,
                    latitude DOUBLE NOT NULL,
                    longitude DOUBLE NOT NULL,
                    accuracy_radius BIGINT NOT NULL,
                    confidence_score DOUBLE NOT NULL,
                    source VARCHAR(128) NOT NULL,
                    last_updated BIGINT NOT NULL,
                    INDEX idx_last_updated (last_updated)
                )
                "#
            }
            Self::Postgres => {
                r#"
                CREATE TABLE IF NOT EXISTS ip_locations (
                    ip_address VARCHAR(45) PRIMARY KEY,
                    latitude DOUBLE PRECISION NOT NULL,
                    longitude DOUBLE PRECISION NOT NULL,
                    accuracy_radius BIGINT NOT NULL,
                    confidence_score DOUBLE PRECISION NOT NULL,
                    source VARCHAR(128) NOT NULL,
                    last_updated BIGINT NOT NULL
                )
                "#
            }
        }
    }

    fn select_one(self) -> &'static str {
        match self {
            Self::Sqlite | Self::MySql => {
                "SELECT ip_address, latitude, longitude, accuracy_radius, confidence_score, source, last_updated \
                 FROM ip_locations WHERE ip_address = ?"
            }
            Self::Postgres => {
                "SELECT ip_address, latitude, longitude, accuracy_radius, confidence_score, source, last_updated \
                 FROM ip_locations WHERE ip_address = $1"
            }
        }
    }

    fn upsert(self) -> &'static str {
        match self {
            Self::Sqlite => {
                "INSERT INTO ip_locations (ip_address, latitude, longitude, accuracy_radius, confidence_score, source, last_updated)
                 VALUES (?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(ip_address) DO UPDATE SET
                    latitude = excluded.latitude,
                    longitude = excluded.longitude,
                    accuracy_radius = excluded.accuracy_radius,
                    confidence_score = excluded.confidence_score,
                    source = excluded.source,
                    last_updated = excluded.last_updated"
            }
            Self::MySql => {
                "INSERT INTO ip_locations (ip_address, latitude, longitude, accuracy_radius, confidence_score, source, last_updated)
                 VALUES (?, ?, ?, ?, ?, ?, ?)
                 ON DUPLICATE KEY UPDATE
                    latitude = VALUES(latitude),
                    longitude = VALUES(longitude),
                    accuracy_radius = VALUES(accuracy_radius),
                    confidence_score = VALUES(confidence_score),
                    source = VALUES(source),
                    last_updated = VALUES(last_updated)"
            }
            Self::Postgres => {
                "INSERT INTO ip_locations (ip_address, latitude, longitude, accuracy_radius, confidence_score, source, last_updated)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)
                 ON CONFLICT (ip_address) DO UPDATE SET
                    latitude = EXCLUDED.latitude,
                    longitude = EXCLUDED.longitude,
                    accuracy_radius = EXCLUDED.accuracy_radius,
                    confidence_score = EXCLUDED.confidence_score,
                    source = EXCLUDED.source,
                    last_updated = EXCLUDED.last_updated"
            }
        }
    }
}

pub struct SqlStore {
    pool: AnyPool,
    dialect: Dialect,
}

impl SqlStore {
    /// Connect with startup-mode retry (fails fast if config is wrong) and
    /// create the table if it does not exist.
    pub async fn new(connection_string: &str) -> Result<Self, StorageError> {
        install_drivers();

        let dialect = Dialect::from_url(connection_string)?;

        let pool = retry("sql_connect", &RetryConfig::startup(), || async {
            AnyPoolOptions::new()
                .max_connections(20)
                .acquire_timeout(Duration::from_secs(10))
                .idle_timeout(Duration::from_secs(300))
                .connect(connection_string)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))
        })
        .await?;

        let store = Self { pool, dialect };

        if dialect == Dialect::Sqlite {
            store.enable_wal_mode().await?;
        }

        store.init_schema().await?;
        Ok(store)
    }

    #[must_use]
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Close the pool, waiting for checked-out connections to return.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Readers don't block the writer in WAL mode.
    async fn enable_wal_mode(&self) -> Result<(), StorageError> {
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to enable WAL mode: {}", e)))?;

        sqlx::query("PRAGMA synchronous = NORMAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to set synchronous mode: {}", e)))?;

        Ok(())
    }

    async fn init_schema(&self) -> Result<(), StorageError> {
        let sql = self.dialect.create_table();
        retry("sql_init_schema", &RetryConfig::startup(), || async {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))
        })
        .await?;
        Ok(())
    }

    fn text_column(row: &AnyRow, column: &str) -> Option<String> {
        row.try_get::<String, _>(column).ok().or_else(|| {
            row.try_get::<Vec<u8>, _>(column)
                .ok()
                .and_then(|bytes| String::from_utf8(bytes).ok())
        })
    }

    fn decode_row(address: &str, row: &AnyRow) -> Result<StoredLocation, StorageError> {
        let corrupt = |column: &str, e: sqlx::Error| StorageError::Corruption {
            key: address.to_string(),
            reason: format!("column {}: {}", column, e),
        };

        let latitude: f64 = row.try_get("latitude").map_err(|e| corrupt("latitude", e))?;
        let longitude: f64 = row.try_get("longitude").map_err(|e| corrupt("longitude", e))?;
        let accuracy: i64 = row.try_get("accuracy_radius").map_err(|e| corrupt("accuracy_radius", e))?;
        let confidence: f64 = row.try_get("confidence_score").map_err(|e| corrupt("confidence_score", e))?;
        let last_updated: i64 = row.try_get("last_updated").unwrap_or(0);
        let source = Self::text_column(row, "source").ok_or_else(|| StorageError::Corruption {
            key: address.to_string(),
            reason: "column source: unreadable".to_string(),
        })?;

        let accuracy_radius = u32::try_from(accuracy).map_err(|_| StorageError::Corruption {
            key: address.to_string(),
            reason: format!("accuracy_radius out of range: {}", accuracy),
        })?;

        Ok(StoredLocation {
            address: address.to_string(),
            location: ResolvedLocation {
                latitude,
                longitude,
                accuracy_radius,
                confidence_score: confidence,
                source,
            },
            last_updated,
        })
    }
}

#[async_trait]
impl LocationStore for SqlStore {
    async fn lookup(&self, address: &str) -> Result<Option<StoredLocation>, StorageError> {
        let row = sqlx::query(self.dialect.select_one())
            .bind(address)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        row.map(|row| Self::decode_row(address, &row)).transpose()
    }

    async fn upsert(&self, address: &str, location: &ResolvedLocation) -> Result<(), StorageError> {
        sqlx::query(self.dialect.upsert())
            .bind(address)
            .bind(location.latitude)
            .bind(location.longitude)
            .bind(i64::from(location.accuracy_radius))
            .bind(location.confidence_score)
            .bind(&location.source)
            .bind(now_millis())
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn count(&self) -> Result<u64, StorageError> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM ip_locations")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        let count: i64 = row.try_get("cnt").map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(count.max(0) as u64)
    }

    async fn ping(&self) -> Result<(), StorageError> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(())
    }
}
