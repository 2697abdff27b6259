// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Location data structures.
//!
//! An [`Estimate`] is one source's opinion about where an address lives. It is
//! created by a provider, consumed by the fusion engine, and discarded.
//! A [`ResolvedLocation`] is the fused, fully populated answer that gets
//! persisted to the store and mirrored into the cache.
//!
//! # Example
//!
//! ```
//! use geo_resolve::{Estimate, ResolvedLocation};
//!
//! let estimate = Estimate::new("MaxMind", 51.5, -0.12, 70.0)
//!     .with_accuracy(1000)
//!     .with_weight(0.7);
//! assert!(estimate.is_usable());
//!
//! let fallback = ResolvedLocation::fallback();
//! assert_eq!(fallback.source, "fallback");
//! assert_eq!(fallback.accuracy_radius, 40_000_000);
//! ```

use serde::{Deserialize, Serialize};

/// Accuracy assumed when a source reports coordinates without a radius (meters).
pub const DEFAULT_ACCURACY_RADIUS: u32 = 5_000;

/// Accuracy radius of the fallback location: the whole planet (meters).
pub const WORLD_ACCURACY_RADIUS: u32 = 40_000_000;

/// Weight assumed when a source does not specify one.
pub const DEFAULT_WEIGHT: f64 = 1.0;

/// Source tag of the fallback location.
pub const FALLBACK_SOURCE: &str = "fallback";

const CACHED_PREFIX: &str = "cached_";
const FUSED_PREFIX: &str = "fused_from_";

/// One source's opinion about a location.
///
/// Coordinates and confidence are optional: an estimate missing any of them
/// is excluded from fusion rather than treated as zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Estimate {
    /// Latitude in signed degrees
    #[serde(default)]
    pub latitude: Option<f64>,
    /// Longitude in signed degrees
    #[serde(default)]
    pub longitude: Option<f64>,
    /// Radius of the confidence circle in meters
    #[serde(default)]
    pub accuracy_radius: Option<u32>,
    /// Self-reported reliability on a 0-100 scale
    #[serde(default)]
    pub confidence_score: Option<f64>,
    /// Which provider produced this estimate
    pub source: String,
    /// Relative trust during fusion (static per provider type)
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_weight() -> f64 {
    DEFAULT_WEIGHT
}

impl Estimate {
    /// Create a fully populated estimate with the default weight and no radius.
    pub fn new(source: impl Into<String>, latitude: f64, longitude: f64, confidence_score: f64) -> Self {
        Self {
            latitude: Some(latitude),
            longitude: Some(longitude),
            accuracy_radius: None,
            confidence_score: Some(confidence_score),
            source: source.into(),
            weight: DEFAULT_WEIGHT,
        }
    }

    /// Create an estimate with no data at all (only useful in tests and as a
    /// starting point for partially populated records).
    pub fn empty(source: impl Into<String>) -> Self {
        Self {
            latitude: None,
            longitude: None,
            accuracy_radius: None,
            confidence_score: None,
            source: source.into(),
            weight: DEFAULT_WEIGHT,
        }
    }

    #[must_use]
    pub fn with_accuracy(mut self, meters: u32) -> Self {
        self.accuracy_radius = Some(meters);
        self
    }

    #[must_use]
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    /// Turn a previously fused location back into a fusion candidate.
    pub fn from_resolved(location: &ResolvedLocation, weight: f64) -> Self {
        Self {
            latitude: Some(location.latitude),
            longitude: Some(location.longitude),
            accuracy_radius: Some(location.accuracy_radius),
            confidence_score: Some(location.confidence_score),
            source: location.source.clone(),
            weight,
        }
    }

    /// Latitude, longitude and confidence are all present.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        self.latitude.is_some() && self.longitude.is_some() && self.confidence_score.is_some()
    }

    /// Weight used by fusion. Non-finite or non-positive weights fall back to 1.0.
    #[must_use]
    pub fn effective_weight(&self) -> f64 {
        if self.weight.is_finite() && self.weight > 0.0 {
            self.weight
        } else {
            DEFAULT_WEIGHT
        }
    }

    /// Accuracy used by fusion, substituting the default radius when absent.
    #[must_use]
    pub fn effective_accuracy(&self) -> u32 {
        self.accuracy_radius.unwrap_or(DEFAULT_ACCURACY_RADIUS)
    }

    /// Check the fields that are present for range and finiteness.
    ///
    /// Absent fields are fine here; they only exclude the estimate from fusion.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(lat) = self.latitude {
            if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
                return Err(format!("latitude out of range: {}", lat));
            }
        }
        if let Some(lon) = self.longitude {
            if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) {
                return Err(format!("longitude out of range: {}", lon));
            }
        }
        if let Some(conf) = self.confidence_score {
            if !conf.is_finite() || !(0.0..=100.0).contains(&conf) {
                return Err(format!("confidence out of range: {}", conf));
            }
        }
        Ok(())
    }
}

/// Fused, fully populated location: the pipeline's output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedLocation {
    pub latitude: f64,
    pub longitude: f64,
    /// Meters
    pub accuracy_radius: u32,
    /// 0-100, two decimal places
    pub confidence_score: f64,
    /// Provenance: a provider name, `fused_from_<source>`, `cached_<source>` or `fallback`
    pub source: String,
}

impl ResolvedLocation {
    /// The "nothing known" answer: null island with a world-sized radius.
    #[must_use]
    pub fn fallback() -> Self {
        Self {
            latitude: 0.0,
            longitude: 0.0,
            accuracy_radius: WORLD_ACCURACY_RADIUS,
            confidence_score: 0.0,
            source: FALLBACK_SOURCE.to_string(),
        }
    }

    #[must_use]
    pub fn is_fallback(&self) -> bool {
        self.source == FALLBACK_SOURCE
    }

    /// Re-tag as served from a cache layer: `cached_<source>`.
    #[must_use]
    pub fn into_cached(mut self) -> Self {
        self.source = format!("{}{}", CACHED_PREFIX, self.source);
        self
    }

    /// Tag for a freshly fused result whose best contributor was `source`.
    #[must_use]
    pub fn fused_source(source: &str) -> String {
        format!("{}{}", FUSED_PREFIX, source)
    }
}

/// A store row: the last fused location for an address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredLocation {
    pub address: String,
    pub location: ResolvedLocation,
    /// Epoch millis of the last upsert
    pub last_updated: i64,
}

/// Current time as epoch millis.
pub(crate) fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
