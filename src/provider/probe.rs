// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Active probe provider.
//!
//! Stands in for latency triangulation: after a simulated measurement delay
//! it reports a point jittered around a configured anchor with a tight radius
//! and high confidence. The RNG is seedable so tests are reproducible.

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use super::{LocationProvider, ProviderError};
use crate::location::Estimate;

pub const PROBE_PROVIDER: &str = "active_probe";

/// Max offset from the anchor, per axis, in degrees.
const JITTER_DEGREES: f64 = 0.05;
const MIN_ACCURACY: u32 = 100;
const MAX_ACCURACY: u32 = 500;
const MIN_CONFIDENCE: f64 = 90.0;
const MAX_CONFIDENCE: f64 = 95.0;

pub struct ActiveProbeProvider {
    anchor: (f64, f64),
    delay: Duration,
    weight: f64,
    rng: Mutex<StdRng>,
}

impl ActiveProbeProvider {
    pub fn new(anchor: (f64, f64), delay: Duration, weight: f64) -> Self {
        Self::with_rng(anchor, delay, weight, StdRng::from_entropy())
    }

    /// Deterministic probe for tests and replays.
    pub fn seeded(anchor: (f64, f64), delay: Duration, weight: f64, seed: u64) -> Self {
        Self::with_rng(anchor, delay, weight, StdRng::seed_from_u64(seed))
    }

    fn with_rng(anchor: (f64, f64), delay: Duration, weight: f64, rng: StdRng) -> Self {
        Self {
            anchor,
            delay,
            weight,
            rng: Mutex::new(rng),
        }
    }

    fn measure(&self) -> Estimate {
        let mut rng = self.rng.lock();
        let latitude = (self.anchor.0 + rng.gen_range(-JITTER_DEGREES..=JITTER_DEGREES)).clamp(-90.0, 90.0);
        let longitude = (self.anchor.1 + rng.gen_range(-JITTER_DEGREES..=JITTER_DEGREES)).clamp(-180.0, 180.0);
        let accuracy = rng.gen_range(MIN_ACCURACY..=MAX_ACCURACY);
        let confidence = rng.gen_range(MIN_CONFIDENCE..MAX_CONFIDENCE);

        Estimate::new(PROBE_PROVIDER, latitude, longitude, confidence)
            .with_accuracy(accuracy)
            .with_weight(self.weight)
    }
}

#[async_trait]
impl LocationProvider for ActiveProbeProvider {
    fn name(&self) -> &str {
        PROBE_PROVIDER
    }

    async fn lookup(&self, address: IpAddr) -> Result<Option<Estimate>, ProviderError> {
        debug!(%address, delay = ?self.delay, "Running active probe");
        tokio::time::sleep(self.delay).await;
        Ok(Some(self.measure()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LA: (f64, f64) = (34.0522, -118.2437);

    fn addr() -> IpAddr {
        "203.0.113.7".parse().unwrap()
    }

    #[tokio::test]
    async fn test_probe_stays_within_bounds() {
        let probe = ActiveProbeProvider::seeded(LA, Duration::ZERO, 0.95, 7);
        for _ in 0..200 {
            let est = probe.lookup(addr()).await.unwrap().unwrap();
            assert!((est.latitude.unwrap() - LA.0).abs() <= JITTER_DEGREES + 1e-9);
            assert!((est.longitude.unwrap() - LA.1).abs() <= JITTER_DEGREES + 1e-9);
            let acc = est.accuracy_radius.unwrap();
            assert!((100..=500).contains(&acc));
            let conf = est.confidence_score.unwrap();
            assert!((90.0..95.0).contains(&conf));
            assert_eq!(est.weight, 0.95);
            assert_eq!(est.source, "active_probe");
        }
    }

    #[tokio::test]
    async fn test_seeded_probes_are_reproducible() {
        let a = ActiveProbeProvider::seeded(LA, Duration::ZERO, 0.95, 42);
        let b = ActiveProbeProvider::seeded(LA, Duration::ZERO, 0.95, 42);
        assert_eq!(a.lookup(addr()).await.unwrap(), b.lookup(addr()).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_waits_for_simulated_delay() {
        let probe = ActiveProbeProvider::seeded(LA, Duration::from_millis(500), 0.95, 1);
        let start = tokio::time::Instant::now();
        probe.lookup(addr()).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(500));
    }
}
