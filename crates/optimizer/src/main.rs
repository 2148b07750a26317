//! Cost optimizer - cloud cost optimization control plane
//!
//! Runs the observe-orient-decide-act loop against the configured cloud
//! adapter, staging remediations in a durable ledger and applying them
//! unless dry run is on.

use anyhow::{Context, Result};
use optimizer_lib::{
    adapter::SimulatorAdapter,
    cache::MemoryResponseCache,
    engine::{HeuristicEngine, HttpDecisionEngine},
    ledger,
    observability::StructuredLogger,
    ooda::{Controller, ControllerSettings},
    router::{DecisionRouter, EnhancedRouter},
    scoring::ScoringEngine,
    tracker::TokenTracker,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting cost-optimizer");

    let config = config::load()?;
    info!(
        instance = %config.instance,
        dry_run = config.dry_run,
        ledger = ?config.ledger.backend,
        engines = config.engines.len(),
        "Optimizer configured"
    );

    let logger = StructuredLogger::new(&config.instance);

    let (ledger, learning) = ledger::open(config.ledger.backend, &config.ledger.url)
        .await
        .with_context(|| format!("failed to open ledger at {}", config.ledger.url))?;

    let tracker = Arc::new(
        TokenTracker::load(config.tracker.settings()).context("failed to load token usage")?,
    );

    // Heuristic engine always registered as the last resort
    let mut router = DecisionRouter::builder(config.router_config())
        .engine(Arc::new(HeuristicEngine::new()))
        .cache(Arc::new(MemoryResponseCache::new(config.decision_cache_max_entries)))
        .tracker(tracker.clone())
        .logger(logger.clone());
    for spec in &config.engines {
        let engine_config = spec.to_engine_config(config.engine_timeout(spec.tier))?;
        let engine = HttpDecisionEngine::new(engine_config)
            .with_context(|| format!("failed to build engine {}", spec.model))?;
        info!(tier = %spec.tier, model = %spec.model, "Decision engine registered");
        router = router.engine(Arc::new(engine));
    }
    let router = EnhancedRouter::new(router.build()?);

    let adapter = Arc::new(SimulatorAdapter::sample_fleet());

    let controller = Arc::new(
        Controller::builder(adapter, ledger)
            .settings(ControllerSettings::from(&config))
            .learning(learning)
            .scoring(ScoringEngine::new(config.scoring.clone()))
            .router(Arc::new(router))
            .tracker(tracker.clone())
            .logger(logger.clone())
            .build(),
    );

    let recovery = controller.recover().await.context("crash recovery failed")?;
    if recovery.examined > 0 {
        info!(
            examined = recovery.examined,
            reapplied = recovery.reapplied,
            failed = recovery.failed,
            skipped = recovery.skipped,
            deferred = recovery.deferred,
            "Crash recovery complete"
        );
    }

    let (shutdown_tx, _) = broadcast::channel(1);

    let flush_handle = tokio::spawn({
        let tracker = tracker.clone();
        let shutdown = shutdown_tx.subscribe();
        async move { tracker.run_flush_loop(shutdown).await }
    });

    let mut loop_handle = tokio::spawn({
        let controller = controller.clone();
        let shutdown = shutdown_tx.subscribe();
        async move { controller.run(shutdown).await }
    });

    // Wait for shutdown signal or the loop stopping on its own
    let outcome = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for shutdown signal")?;
            info!("Shutting down");
            let _ = shutdown_tx.send(());
            (&mut loop_handle).await
        }
        finished = &mut loop_handle => finished,
    };

    let _ = shutdown_tx.send(());
    if let Err(e) = flush_handle.await {
        warn!(error = %e, "Token tracker flush task failed");
    }
    info!(report = %tracker.report(), "Session totals");

    outcome
        .context("optimization loop panicked")?
        .context("optimization loop stopped")
}
