// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Fusion of candidate estimates into a single location.
//!
//! The [`Fuser`] trait is the seam between the pipeline and the combination
//! policy. [`WeightedMeanFusion`] is the deterministic policy used today:
//!
//! - keep estimates that carry latitude, longitude and confidence
//! - nothing left → [`ResolvedLocation::fallback()`]
//! - weight-normalized mean of latitude, longitude, accuracy and confidence
//! - provenance is the single most confident estimate: `fused_from_<source>`
//!
//! Floating-point addition is not associative, so candidates are sorted into a
//! canonical order before summing. The same multiset of estimates therefore
//! yields a bit-identical result regardless of the order providers answered in.
//!
//! ```
//! use geo_resolve::{Estimate, Fuser, WeightedMeanFusion};
//!
//! let fused = WeightedMeanFusion.fuse(&[
//!     Estimate::new("a", 10.0, 10.0, 80.0).with_accuracy(100),
//!     Estimate::new("b", 20.0, 20.0, 40.0).with_accuracy(200),
//! ]);
//! assert_eq!(fused.latitude, 15.0);
//! assert_eq!(fused.accuracy_radius, 150);
//! assert_eq!(fused.confidence_score, 60.0);
//! assert_eq!(fused.source, "fused_from_a");
//! ```

use std::cmp::Ordering;

use crate::location::{Estimate, ResolvedLocation};

/// Combines candidate estimates into one resolved location.
///
/// Implementations must be pure and order-independent: the pipeline relies on
/// being able to gather candidates concurrently.
pub trait Fuser: Send + Sync {
    /// Short name used in logs and metrics.
    fn name(&self) -> &str;

    fn fuse(&self, estimates: &[Estimate]) -> ResolvedLocation;
}

/// Static-weight weighted mean.
#[derive(Debug, Clone, Copy, Default)]
pub struct WeightedMeanFusion;

impl Fuser for WeightedMeanFusion {
    fn name(&self) -> &str {
        "weighted_mean"
    }

    fn fuse(&self, estimates: &[Estimate]) -> ResolvedLocation {
        let mut usable: Vec<&Estimate> = estimates.iter().filter(|e| e.is_usable()).collect();
        if usable.is_empty() {
            return ResolvedLocation::fallback();
        }
        usable.sort_by(|a, b| canonical_order(a, b));

        let mut total_weight = 0.0;
        let mut latitude_sum = 0.0;
        let mut longitude_sum = 0.0;
        let mut accuracy_sum = 0.0;
        let mut confidence_sum = 0.0;

        for est in &usable {
            let weight = est.effective_weight();
            latitude_sum += est.latitude.unwrap_or_default() * weight;
            longitude_sum += est.longitude.unwrap_or_default() * weight;
            accuracy_sum += f64::from(est.effective_accuracy()) * weight;
            confidence_sum += est.confidence_score.unwrap_or_default() * weight;
            total_weight += weight;
        }

        // Sorted by confidence descending, so the head is the most confident
        // estimate and ties resolve to the canonical first.
        let best = usable[0];

        ResolvedLocation {
            latitude: latitude_sum / total_weight,
            longitude: longitude_sum / total_weight,
            accuracy_radius: (accuracy_sum / total_weight).round().clamp(0.0, f64::from(u32::MAX)) as u32,
            confidence_score: round_to_cents(confidence_sum / total_weight),
            source: ResolvedLocation::fused_source(&best.source),
        }
    }
}

/// Total order over usable estimates: confidence desc, weight desc, then
/// source, latitude, longitude, accuracy ascending.
fn canonical_order(a: &Estimate, b: &Estimate) -> Ordering {
    let conf = |e: &Estimate| e.confidence_score.unwrap_or_default();
    conf(b)
        .total_cmp(&conf(a))
        .then_with(|| b.effective_weight().total_cmp(&a.effective_weight()))
        .then_with(|| a.source.cmp(&b.source))
        .then_with(|| a.latitude.unwrap_or_default().total_cmp(&b.latitude.unwrap_or_default()))
        .then_with(|| a.longitude.unwrap_or_default().total_cmp(&b.longitude.unwrap_or_default()))
        .then_with(|| a.effective_accuracy().cmp(&b.effective_accuracy()))
}

fn round_to_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
