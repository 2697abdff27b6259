// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Basic geo-resolve usage example.
//!
//! Demonstrates:
//! 1. Building a resolver from the environment (GEO_REDIS_URL, GEO_SQL_URL,
//!    GEO_MAXMIND_DB, IPINFO_TOKEN are all optional)
//! 2. Resolving the addresses given on the command line
//! 3. Resolving them again to show the cache path
//! 4. Health check and captured metrics
//! 5. Clean shutdown
//!
//! # Run
//!
//! ```bash
//! cargo run --example basic_usage -- 8.8.8.8 2001:4860:4860::8888
//! RUST_LOG=geo_resolve=debug cargo run --example basic_usage
//! ```

use std::time::Instant;

use geo_resolve::{GeoResolver, ResolverConfig, ResolverState};
use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use tracing_subscriber::EnvFilter;

const DEFAULT_ADDRESSES: &[&str] = &["8.8.8.8", "1.1.1.1", "2001:4860:4860::8888", "not-an-ip"];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Install metrics recorder (captures all metrics for display at the end)
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("failed to install metrics recorder");

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("geo_resolve=info")))
        .with_target(false)
        .compact()
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let addresses: Vec<String> = if args.is_empty() {
        DEFAULT_ADDRESSES.iter().map(|s| s.to_string()).collect()
    } else {
        args
    };

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║             geo-resolve: Basic Usage Example                  ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Configure and start the resolver
    // ─────────────────────────────────────────────────────────────────────────
    let config = ResolverConfig::from_env();
    println!("📦 Configuration:");
    println!("   └─ Redis:   {}", config.redis_url.as_deref().unwrap_or("(in-memory)"));
    println!("   └─ SQL:     {}", config.sql_url.as_deref().map(redact).unwrap_or_else(|| "(in-memory)".into()));
    println!("   └─ MaxMind: {}", config.maxmind_db_path);
    println!("   └─ ipinfo:  {}", if config.ipinfo_token.is_some() { "token set" } else { "disabled" });

    let mut resolver = GeoResolver::new(config);
    println!("\n🚀 Starting resolver...");
    resolver.start().await?;
    assert_eq!(resolver.state(), ResolverState::Ready);
    println!("   ✅ Ready! Providers: {:?}", resolver.providers());

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Resolve each address (cold)
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🌍 Resolving (cold)...");
    for address in &addresses {
        let start = Instant::now();
        match resolver.resolve_traced(address).await {
            Ok(resolution) => {
                let loc = &resolution.location;
                println!(
                    "   └─ {} → {:.4},{:.4} ±{}m conf={} src={} [{}] ({:?})",
                    address,
                    loc.latitude,
                    loc.longitude,
                    loc.accuracy_radius,
                    loc.confidence_score,
                    loc.source,
                    resolution.path,
                    start.elapsed()
                );
                for report in &resolution.providers {
                    println!("      · {}: {}", report.provider, report.outcome.label());
                }
            }
            Err(e) => println!("   └─ {} → error: {}", address, e),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Resolve again (warm)
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n⚡ Resolving again (should hit the cache)...");
    for address in &addresses {
        let start = Instant::now();
        if let Ok(resolution) = resolver.resolve_traced(address).await {
            println!(
                "   └─ {} → {} [{}] ({:?})",
                address,
                resolution.location.source,
                resolution.path,
                start.elapsed()
            );
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Health and metrics
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🩺 Health check:");
    let health = resolver.health_check().await;
    println!("{}", serde_json::to_string_pretty(&health)?);

    println!("\n📈 Metrics:");
    dump_metrics(&snapshotter);

    // ─────────────────────────────────────────────────────────────────────────
    // 5. Clean shutdown
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🛑 Shutting down...");
    resolver.shutdown().await;
    println!("   ✅ Shutdown complete! State: {:?}", resolver.state());

    Ok(())
}

/// Hide the password in a connection string.
fn redact(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme), Some(at)) if at > scheme => {
            let creds = &url[scheme + 3..at];
            let user = creds.split(':').next().unwrap_or("");
            format!("{}{}:***{}", &url[..scheme + 3], user, &url[at..])
        }
        _ => url.to_string(),
    }
}

fn dump_metrics(snapshotter: &Snapshotter) {
    let mut lines: Vec<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, value)| {
            let (_, key) = composite_key.into_parts();
            let labels: Vec<_> = key.labels().map(|l| format!("{}={}", l.key(), l.value())).collect();
            let label_str = if labels.is_empty() { String::new() } else { format!("{{{}}}", labels.join(",")) };
            let rendered = match value {
                DebugValue::Counter(v) => v.to_string(),
                DebugValue::Gauge(v) => format!("{:.2}", v.into_inner()),
                DebugValue::Histogram(samples) => {
                    let sum: f64 = samples.iter().map(|v| v.into_inner()).sum();
                    format!("count={} sum={:.4}", samples.len(), sum)
                }
            };
            format!("{}{} = {}", key.name(), label_str, rendered)
        })
        .collect();
    lines.sort();

    if lines.is_empty() {
        println!("   └─ (no metrics recorded)");
    }
    for line in lines {
        println!("   └─ {}", line);
    }
}
