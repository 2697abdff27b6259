//! Property-based tests (fuzzing) for geo-resolve.
//!
//! Uses proptest to generate random candidate sets and malformed inputs, and
//! verifies fusion stays order independent and bounded while the resolver
//! never panics, only returns clean errors.
//!
//! Run with: `cargo test --test proptest_fuzz`

use proptest::prelude::*;
use serde_json::Value;

use geo_resolve::provider::ipinfo::parse_loc;
use geo_resolve::{
    Estimate, Fuser, GeoResolver, ResolveError, ResolvedLocation, ResolverConfig, StoredLocation,
    WeightedMeanFusion,
};

// =============================================================================
// Strategies for generating test data
// =============================================================================

/// Candidate with occasionally missing fields. Sources, weights and
/// confidences come from small pools so ties are common.
fn estimate_strategy() -> impl Strategy<Value = Estimate> {
    (
        "[a-c]{1,2}",
        prop::option::weighted(0.9, -90.0f64..=90.0),
        prop::option::weighted(0.9, -180.0f64..=180.0),
        prop::option::weighted(0.8, 0u32..=20_000),
        prop::option::weighted(
            0.9,
            prop_oneof![Just(50.0), Just(80.0), Just(90.0), 0.0f64..=100.0],
        ),
        prop_oneof![Just(0.7), Just(0.8), Just(0.9), Just(0.95), Just(1.0)],
    )
        .prop_map(|(source, latitude, longitude, accuracy_radius, confidence_score, weight)| Estimate {
            latitude,
            longitude,
            accuracy_radius,
            confidence_score,
            source,
            weight,
        })
}

fn candidates_strategy() -> impl Strategy<Value = Vec<Estimate>> {
    prop::collection::vec(estimate_strategy(), 0..8)
}

/// Generate arbitrary JSON values (including invalid structures)
fn arbitrary_json_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| Value::Number(n.into())),
        any::<f64>().prop_filter_map("finite", |f| serde_json::Number::from_f64(f).map(Value::Number)),
        ".*".prop_map(Value::String),
    ];

    leaf.prop_recursive(
        4,   // depth
        64,  // max nodes
        10,  // items per collection
        |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..10).prop_map(Value::Array),
                prop::collection::hash_map(".*", inner, 0..10)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        },
    )
}

fn usable(candidates: &[Estimate]) -> Vec<&Estimate> {
    candidates.iter().filter(|e| e.is_usable()).collect()
}

fn bounds(values: impl Iterator<Item = f64>) -> (f64, f64) {
    values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)))
}

// =============================================================================
// Fusion Invariant Tests
// =============================================================================

proptest! {
    /// Any reordering of the candidates gives a bit-identical result
    #[test]
    fn prop_fusion_order_independent(
        (original, shuffled) in candidates_strategy()
            .prop_flat_map(|v| (Just(v.clone()), Just(v).prop_shuffle()))
    ) {
        let a = WeightedMeanFusion.fuse(&original);
        let b = WeightedMeanFusion.fuse(&shuffled);

        prop_assert_eq!(a.latitude.to_bits(), b.latitude.to_bits());
        prop_assert_eq!(a.longitude.to_bits(), b.longitude.to_bits());
        prop_assert_eq!(a.confidence_score.to_bits(), b.confidence_score.to_bits());
        prop_assert_eq!(a.accuracy_radius, b.accuracy_radius);
        prop_assert_eq!(a.source, b.source);
    }

    /// Fallback exactly when no candidate is usable
    #[test]
    fn prop_fallback_iff_nothing_usable(candidates in candidates_strategy()) {
        let fused = WeightedMeanFusion.fuse(&candidates);
        prop_assert_eq!(fused.is_fallback(), usable(&candidates).is_empty());
        if fused.is_fallback() {
            prop_assert_eq!(fused, ResolvedLocation::fallback());
        }
    }

    /// A weighted mean never leaves the range of its inputs
    #[test]
    fn prop_fusion_within_input_bounds(candidates in candidates_strategy()) {
        let inputs = usable(&candidates);
        prop_assume!(!inputs.is_empty());
        let fused = WeightedMeanFusion.fuse(&candidates);

        let (lat_lo, lat_hi) = bounds(inputs.iter().filter_map(|e| e.latitude));
        let (lon_lo, lon_hi) = bounds(inputs.iter().filter_map(|e| e.longitude));
        let (conf_lo, conf_hi) = bounds(inputs.iter().filter_map(|e| e.confidence_score));
        let (acc_lo, acc_hi) = bounds(inputs.iter().map(|e| f64::from(e.effective_accuracy())));

        let eps = 1e-9;
        prop_assert!(fused.latitude >= lat_lo - eps && fused.latitude <= lat_hi + eps);
        prop_assert!(fused.longitude >= lon_lo - eps && fused.longitude <= lon_hi + eps);
        // Rounded to cents
        prop_assert!(fused.confidence_score >= conf_lo - 0.01 && fused.confidence_score <= conf_hi + 0.01);
        let acc = f64::from(fused.accuracy_radius);
        prop_assert!(acc >= acc_lo && acc <= acc_hi);
    }

    /// Provenance names a candidate with the highest confidence
    #[test]
    fn prop_fused_source_is_most_confident(candidates in candidates_strategy()) {
        let inputs = usable(&candidates);
        prop_assume!(!inputs.is_empty());
        let fused = WeightedMeanFusion.fuse(&candidates);

        let best = fused.source.strip_prefix("fused_from_");
        prop_assert!(best.is_some(), "unexpected source {}", fused.source);
        let best = best.unwrap_or_default();

        let top = inputs.iter().filter_map(|e| e.confidence_score).fold(f64::MIN, f64::max);
        prop_assert!(inputs
            .iter()
            .any(|e| e.source == best && e.confidence_score == Some(top)));
    }

    /// Confidence always lands on two decimal places
    #[test]
    fn prop_fused_confidence_two_decimals(candidates in candidates_strategy()) {
        let fused = WeightedMeanFusion.fuse(&candidates);
        let cents = fused.confidence_score * 100.0;
        prop_assert!((cents - cents.round()).abs() < 1e-6);
    }
}

// =============================================================================
// Deserialization Fuzz Tests
// =============================================================================

proptest! {
    /// Estimate deserialization should never panic on arbitrary bytes
    #[test]
    fn fuzz_estimate_from_random_bytes(bytes in prop::collection::vec(any::<u8>(), 0..4096)) {
        let result: Result<Estimate, _> = serde_json::from_slice(&bytes);
        let _ = result;
    }

    /// Cached and stored payloads should handle arbitrary JSON gracefully
    #[test]
    fn fuzz_locations_from_arbitrary_json(json in arbitrary_json_strategy()) {
        let serialized = serde_json::to_vec(&json).unwrap();
        let _ = serde_json::from_slice::<ResolvedLocation>(&serialized);
        let _ = serde_json::from_slice::<StoredLocation>(&serialized);
        let _ = serde_json::from_slice::<ResolverConfig>(&serialized);
    }

    /// Corrupted serialized location should fail gracefully
    #[test]
    fn fuzz_corrupted_resolved_location(
        candidates in candidates_strategy(),
        corruption in prop::collection::vec(any::<u8>(), 1..20),
        position in 0usize..1000,
    ) {
        let location = WeightedMeanFusion.fuse(&candidates);
        let mut corrupted = serde_json::to_vec(&location).unwrap();

        let pos = position % corrupted.len();
        for (i, b) in corruption.iter().enumerate() {
            let idx = (pos + i) % corrupted.len();
            corrupted[idx] ^= b;
        }

        let _ = serde_json::from_slice::<ResolvedLocation>(&corrupted);
    }

    /// Whatever a provider hands back, validation answers instead of panicking
    #[test]
    fn fuzz_estimate_validate(
        latitude in prop::option::of(any::<f64>()),
        longitude in prop::option::of(any::<f64>()),
        confidence_score in prop::option::of(any::<f64>()),
    ) {
        let estimate = Estimate {
            latitude,
            longitude,
            accuracy_radius: None,
            confidence_score,
            source: "fuzz".into(),
            weight: 1.0,
        };
        if estimate.validate().is_ok() {
            prop_assert!(latitude.map_or(true, |v| (-90.0..=90.0).contains(&v)));
            prop_assert!(longitude.map_or(true, |v| (-180.0..=180.0).contains(&v)));
            prop_assert!(confidence_score.map_or(true, |v| (0.0..=100.0).contains(&v)));
        }
    }

    /// Hosted `loc` strings: parse or clean error
    #[test]
    fn fuzz_parse_loc(loc in ".*") {
        let _ = parse_loc(&loc);
    }
}

// =============================================================================
// Address Input Tests
// =============================================================================

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Arbitrary text either resolves or is rejected as an invalid address
    #[test]
    fn fuzz_resolve_arbitrary_input(input in ".*") {
        let resolver = GeoResolver::new(ResolverConfig::default()).without_probe();
        let result = runtime().block_on(resolver.resolve(&input));

        match result {
            Ok(location) => {
                prop_assert!(input.trim().parse::<std::net::IpAddr>().is_ok());
                prop_assert!(location.is_fallback());
            }
            Err(ResolveError::InvalidAddress(raw)) => prop_assert_eq!(raw, input),
            Err(other) => prop_assert!(false, "unexpected error {:?}", other),
        }
    }

    /// Every textual form of an IPv4 address lands on the same key
    #[test]
    fn prop_ipv4_normalized(octets in any::<[u8; 4]>(), pad in 0usize..3) {
        let addr = std::net::Ipv4Addr::from(octets);
        let padded = format!("{}{}{}", " ".repeat(pad), addr, "\t".repeat(pad));

        let resolver = GeoResolver::new(ResolverConfig::default()).without_probe();
        let rt = runtime();
        rt.block_on(resolver.resolve(&padded)).unwrap();
        let second = rt.block_on(resolver.resolve_traced(&addr.to_string())).unwrap();

        // The padded request populated the cache under the canonical key
        prop_assert_eq!(second.path, geo_resolve::ResolutionPath::Cache);
    }

    /// IPv6 in any case or compression normalizes to one key
    #[test]
    fn prop_ipv6_normalized(segments in any::<[u16; 8]>(), upper in any::<bool>()) {
        let addr = std::net::Ipv6Addr::from(segments);
        let expanded = segments
            .iter()
            .map(|s| format!("{:x}", s))
            .collect::<Vec<_>>()
            .join(":");
        let variant = if upper { expanded.to_uppercase() } else { expanded };

        let resolver = GeoResolver::new(ResolverConfig::default()).without_probe();
        let rt = runtime();
        rt.block_on(resolver.resolve(&variant)).unwrap();
        let second = rt.block_on(resolver.resolve_traced(&addr.to_string())).unwrap();

        prop_assert_eq!(second.path, geo_resolve::ResolutionPath::Cache);
    }
}
