// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Offline lookup against a MaxMind GeoLite2-City `.mmdb` file.
//!
//! A missing or unreadable file does not fail startup: the provider stays
//! loaded-but-empty and reports itself unavailable. [`OfflineDbProvider::reload`]
//! re-reads the file in place so a periodically refreshed database can be
//! picked up without a restart.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use maxminddb::{geoip2, MaxMindDBError, Reader};
use parking_lot::RwLock;
use tracing::{info, warn};

use super::{LocationProvider, ProviderError};
use crate::location::{Estimate, DEFAULT_ACCURACY_RADIUS};

pub const MAXMIND_PROVIDER: &str = "MaxMind";
const MAXMIND_CONFIDENCE: f64 = 70.0;

pub struct OfflineDbProvider {
    path: PathBuf,
    reader: RwLock<Option<Arc<Reader<Vec<u8>>>>>,
    weight: f64,
}

impl OfflineDbProvider {
    /// Open the database at `path`. Never fails; check [`is_loaded`](Self::is_loaded).
    pub fn open(path: impl AsRef<Path>, weight: f64) -> Self {
        let path = path.as_ref().to_path_buf();
        let reader = match Reader::open_readfile(&path) {
            Ok(reader) => {
                info!(path = %path.display(), build_epoch = reader.metadata.build_epoch, "MaxMind database loaded");
                Some(Arc::new(reader))
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "MaxMind database not loaded, offline lookups disabled");
                None
            }
        };
        crate::metrics::set_provider_enabled(MAXMIND_PROVIDER, reader.is_some());

        Self {
            path,
            reader: RwLock::new(reader),
            weight,
        }
    }

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.reader.read().is_some()
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the database file. On failure the previously loaded database
    /// (if any) stays in service.
    pub fn reload(&self) -> Result<(), ProviderError> {
        let reader = Reader::open_readfile(&self.path).map_err(|e| {
            warn!(path = %self.path.display(), error = %e, "MaxMind reload failed, keeping current database");
            ProviderError::Unavailable(e.to_string())
        })?;
        info!(path = %self.path.display(), build_epoch = reader.metadata.build_epoch, "MaxMind database reloaded");
        *self.reader.write() = Some(Arc::new(reader));
        crate::metrics::set_provider_enabled(MAXMIND_PROVIDER, true);
        Ok(())
    }

    fn lookup_sync(&self, address: IpAddr) -> Result<Option<Estimate>, ProviderError> {
        let Some(reader) = self.reader.read().clone() else {
            return Err(ProviderError::Unavailable("database not loaded".into()));
        };

        let city = match reader.lookup::<geoip2::City>(address) {
            Ok(city) => city,
            Err(MaxMindDBError::AddressNotFoundError(_)) => return Ok(None),
            Err(MaxMindDBError::InvalidDatabaseError(e)) | Err(MaxMindDBError::DecodingError(e)) => {
                return Err(ProviderError::Malformed(e))
            }
            Err(e) => return Err(ProviderError::Unavailable(e.to_string())),
        };

        Ok(city.location.and_then(|location| {
            estimate_from_record(location.latitude, location.longitude, location.accuracy_radius, self.weight)
        }))
    }
}

/// Build an estimate from a City record's location block. Records without
/// coordinates (country-level only) contribute nothing.
fn estimate_from_record(
    latitude: Option<f64>,
    longitude: Option<f64>,
    accuracy_radius: Option<u16>,
    weight: f64,
) -> Option<Estimate> {
    let (latitude, longitude) = (latitude?, longitude?);
    let accuracy = accuracy_radius
        .filter(|r| *r > 0)
        .map_or(DEFAULT_ACCURACY_RADIUS, u32::from);

    Some(
        Estimate::new(MAXMIND_PROVIDER, latitude, longitude, MAXMIND_CONFIDENCE)
            .with_accuracy(accuracy)
            .with_weight(weight),
    )
}

#[async_trait]
impl LocationProvider for OfflineDbProvider {
    fn name(&self) -> &str {
        MAXMIND_PROVIDER
    }

    async fn lookup(&self, address: IpAddr) -> Result<Option<Estimate>, ProviderError> {
        // Database is held in memory; no I/O once loaded
        self.lookup_sync(address)
    }

    fn is_available(&self) -> bool {
        self.is_loaded()
    }
}
