//! CoucheCache demo runner
//!
//! Starts an in-memory cluster from configuration, benchmarks the
//! compression pipeline over sample files, drives a short cache-aside
//! workload and prints a JSON report.
//!
//! ```text
//! ┌──────────────┐   ┌───────────────────┐   ┌───────────────────────┐
//! │ Settings     │──▶│ In-memory cluster │──▶│ Benchmark + workload  │──▶ JSON report
//! │ (YAML + --set│   │ (shards × nodes)  │   │ (pipeline, patterns)  │
//! └──────────────┘   └───────────────────┘   └───────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use serde_json::json;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use couchecache::adapters::InMemoryDataSource;
use couchecache::{
    CacheAside, ClusterConfig, ConfigOverrides, DistributedCache, NodeStores, RetryPolicy,
    Settings,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// CoucheCache - sharded cache layer with adaptive compression
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(long, env = "COUCHECACHE_CONFIG")]
    config: Option<PathBuf>,

    /// Option override such as `minSize=512` (repeatable)
    #[arg(long = "set", value_name = "KEY=VALUE")]
    overrides: Vec<String>,

    /// Replace the configured topology with N uniform shards
    #[arg(long, env = "COUCHECACHE_SHARDS")]
    shards: Option<u32>,

    /// Nodes per shard when --shards is given
    #[arg(long, default_value = "1")]
    nodes_per_shard: u32,

    /// Keys driven through the cache-aside workload
    #[arg(long, default_value = "100")]
    keys: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    /// Files used as compression benchmark samples
    samples: Vec<PathBuf>,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let settings = load_settings(&args)?;
    info!("Starting CoucheCache {}", couchecache::version());
    info!("  Shards: {}", settings.cluster.shards.len());
    info!("  Consistency: {}", settings.cache.consistency_level);
    info!("  Compression: {:?}", settings.compression.algorithm);

    let (stores, _) = NodeStores::in_memory(&settings.cluster);
    let cache = Arc::new(DistributedCache::new(&settings, stores)?);
    cache.start();

    // Benchmark
    let samples = load_samples(&args.samples)?;
    let benchmark = cache.pipeline().benchmark(&samples);

    // Workload
    let source = Arc::new(InMemoryDataSource::<serde_json::Value>::new());
    for i in 0..args.keys {
        source.insert(
            format!("item:{}", i),
            json!({ "id": i, "name": format!("item-{}", i), "tags": ["demo", "seed"] }),
        );
    }
    let aside = CacheAside::new(
        Arc::clone(&cache),
        source.clone(),
        settings.patterns.clone(),
        RetryPolicy::new(settings.retry.clone()),
    );
    for round in 0..2 {
        for i in 0..args.keys {
            if let Err(e) = aside.get(&format!("item:{}", i)).await {
                warn!(round, "Workload read failed: {}", e);
            }
        }
    }

    let health = cache.health().check_all().await;
    aside.shutdown().await;
    cache.stop().await;

    let report = json!({
        "version": couchecache::version(),
        "benchmark": benchmark,
        "compression": cache.pipeline().stats(),
        "cache": cache.metrics(),
        "source": source.counters(),
        "health": health,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    info!("CoucheCache stopped");
    Ok(())
}

fn load_settings(args: &Args) -> anyhow::Result<Settings> {
    let mut settings = match &args.config {
        Some(path) => Settings::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => Settings::default(),
    };
    if let Some(shards) = args.shards {
        settings.cluster = ClusterConfig {
            health_check_interval: settings.cluster.health_check_interval,
            health_check_timeout: settings.cluster.health_check_timeout,
            ..ClusterConfig::uniform(shards, args.nodes_per_shard)
        };
    }
    let overrides = ConfigOverrides::from_pairs(&args.overrides)?;
    Ok(settings.merge(&overrides)?)
}

/// Sample payloads: the given files, or a built-in mix
fn load_samples(paths: &[PathBuf]) -> anyhow::Result<Vec<Vec<u8>>> {
    if paths.is_empty() {
        let text = "The quick brown fox jumps over the lazy dog. ".repeat(512);
        let records: Vec<_> = (0..256)
            .map(|i| json!({ "id": i, "user": format!("user-{}", i), "active": i % 2 == 0 }))
            .collect();
        let noise: Vec<u8> = (0..64)
            .flat_map(|_| *uuid::Uuid::new_v4().as_bytes())
            .collect();
        return Ok(vec![text.into_bytes(), serde_json::to_vec(&records)?, noise]);
    }
    paths
        .iter()
        .map(|p| std::fs::read(p).with_context(|| format!("reading sample {}", p.display())))
        .collect()
}

// =============================================================================
// Logging
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    // Logs go to stderr so stdout carries only the report
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}
