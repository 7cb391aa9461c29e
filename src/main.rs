//! SKIMMER — Cross-Market Skin Listing Arbitrage Scanner
//!
//! Entry point. Loads configuration, initialises structured logging,
//! builds the shared network stack (proxy pool, rate limiter, fetcher),
//! launches every source group on its own cadence and runs the periodic
//! arbitrage analysis loop with graceful shutdown.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use skimmer::arb::ArbitrageEngine;
use skimmer::config::AppConfig;
use skimmer::net::{HttpProber, ProxyPool, RateLimiter, RetryingFetcher};
use skimmer::notify::{self, JsonFileSink, LogSink, OpportunitySink};
use skimmer::scheduler::{stop_channel, Scheduler};
use skimmer::sources;
use skimmer::storage::{JsonSnapshotStore, SnapshotStore};
use skimmer::types::Snapshot;

const BANNER: &str = r#"
 ____  _  _ ___ __  __ __  __ _____ ____
/ ___|| |/ /|_ _|  \/  |  \/  | ____|  _ \
\___ \| ' /  | || |\/| | |\/| |  _| | |_) |
 ___) | . \  | || |  | | |  | | |___|  _ <
|____/|_|\_\|___|_|  |_|_|  |_|_____|_| \_\

  Skin Market Margin Engine & Ranker
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    // Load configuration from TOML
    let cfg = AppConfig::load("config.toml")?;

    // Initialise structured logging
    init_logging();

    println!("{BANNER}");
    info!(
        name = %cfg.app.name,
        sources = cfg.sources.len(),
        analysis_interval_secs = cfg.app.analysis_interval_secs,
        "SKIMMER starting up"
    );

    // -- Shared network stack ---------------------------------------------

    let limiter = Arc::new(RateLimiter::new());
    for limit in &cfg.rate_limits {
        limiter.add_limit(&limit.key, limit.max_calls, limit.window_secs);
    }

    let proxies = if cfg.proxy.enabled {
        let prober = Arc::new(HttpProber::new(
            cfg.proxy.probe_url.clone(),
            Duration::from_secs(cfg.proxy.probe_timeout_secs),
        ));
        match ProxyPool::from_file(&cfg.proxy.file, prober) {
            Ok(pool) => {
                let pool = Arc::new(pool);
                if cfg.proxy.health_check {
                    pool.initial_health_check().await;
                }
                let stats = pool.stats();
                info!(
                    total = stats.total,
                    available = stats.available,
                    "Proxy pool ready"
                );
                Some(pool)
            }
            Err(e) => {
                warn!(error = %e, "Proxy list unavailable, continuing without proxies");
                None
            }
        }
    } else {
        None
    };

    let alerts = notify::spawn_alert_log();
    let fetcher = Arc::new(RetryingFetcher::new(
        Arc::clone(&limiter),
        proxies.clone(),
        Some(alerts),
    )?);

    // -- Sources, storage, scheduler --------------------------------------

    // Browser-driven sources need a session from a driver integration;
    // the bare binary runs without one and skips those sources.
    let registry = sources::build_registry(&cfg, None);
    let store: Arc<dyn SnapshotStore> = Arc::new(JsonSnapshotStore::new(&cfg.app.output_dir)?);

    let (stop_tx, stop_rx) = stop_channel();
    let scheduler = Arc::new(Scheduler::new(
        registry,
        cfg.sources.clone(),
        Arc::clone(&fetcher),
        Arc::clone(&store),
        stop_rx,
    ));

    // Launch one loop set per named group.
    let mut groups: Vec<String> = cfg
        .sources
        .values()
        .filter(|s| s.enabled)
        .map(|s| s.group.clone())
        .collect();
    groups.sort();
    groups.dedup();

    let mut group_handles = Vec::new();
    for group in groups {
        let members = cfg.group_members(&group);
        if members.is_empty() {
            continue;
        }
        let workers = cfg.group_workers(&group);
        info!(group = %group, members = members.len(), workers, "Launching group");

        let scheduler = Arc::clone(&scheduler);
        group_handles.push(tokio::spawn(async move {
            scheduler.run_forever(&members, workers).await;
        }));
    }

    // -- Analysis loop -----------------------------------------------------

    let mut engine = ArbitrageEngine::new(0.5);
    for (key, source_cfg) in &cfg.sources {
        engine.set_threshold(key, source_cfg.min_profitability);
    }

    let sinks: Vec<Box<dyn OpportunitySink>> = vec![
        Box::new(JsonFileSink::new(
            std::path::Path::new(&cfg.app.output_dir).join("opportunities.json"),
        )),
        Box::new(LogSink { top: 5 }),
    ];

    let buy_sources: Vec<String> = cfg
        .sources
        .iter()
        .filter(|(key, source_cfg)| source_cfg.enabled && **key != cfg.reference.source)
        .map(|(key, _)| key.clone())
        .collect();

    let mut interval =
        tokio::time::interval(Duration::from_secs(cfg.app.analysis_interval_secs));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!("Entering analysis loop. Press Ctrl+C to stop.");

    loop {
        tokio::select! {
            _ = interval.tick() => {
                run_analysis(&engine, store.as_ref(), &cfg.reference.source, &buy_sources, &sinks);
                log_source_health(&scheduler);
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }
    }

    // Stop all source loops and let in-flight cycles finish.
    let _ = stop_tx.send(true);
    for handle in group_handles {
        if let Err(e) = handle.await {
            error!(error = %e, "Group task ended abnormally");
        }
    }

    let stats = fetcher.stats();
    info!(
        requests = stats.requests_made,
        failed = stats.requests_failed,
        "SKIMMER shut down cleanly."
    );

    Ok(())
}

/// Recompute the opportunity set from the latest snapshots and hand it
/// to every sink.
fn run_analysis(
    engine: &ArbitrageEngine,
    store: &dyn SnapshotStore,
    reference_source: &str,
    buy_sources: &[String],
    sinks: &[Box<dyn OpportunitySink>],
) {
    let reference = match store.get_snapshot(reference_source) {
        Ok(Some(snapshot)) => snapshot,
        Ok(None) => {
            info!("Reference snapshot not published yet, skipping analysis");
            return;
        }
        Err(e) => {
            error!(error = %e, "Failed to load reference snapshot");
            return;
        }
    };

    let mut buy_snapshots: Vec<(String, Snapshot)> = Vec::new();
    for source in buy_sources {
        match store.get_snapshot(source) {
            Ok(Some(snapshot)) => buy_snapshots.push((source.clone(), snapshot)),
            Ok(None) => {}
            Err(e) => error!(source = %source, error = %e, "Failed to load snapshot"),
        }
    }

    let opportunities = engine.find_opportunities(&reference, &buy_snapshots);
    for sink in sinks {
        if let Err(e) = sink.publish(&opportunities) {
            error!(error = %e, "Sink publish failed");
        }
    }
}

/// One status line per source so stalled loops are visible in the log.
fn log_source_health(scheduler: &Scheduler) {
    for (source, status) in scheduler.statuses() {
        info!(
            source = %source,
            state = %status.state,
            consecutive_failures = status.consecutive_failures,
            items = status.items_last_cycle,
            last_success = ?status.last_success,
            "Source status"
        );
    }
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("skimmer=info"));

    let json_logging = std::env::var("SKIMMER_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
