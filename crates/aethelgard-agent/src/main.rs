use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use aethelgard_broker_trait::BrokerClient;
use aethelgard_core::ConnectorType;
use aethelgard_executor::Executor;
use aethelgard_notify::NotificationHub;
use aethelgard_position::{ClosureIngestor, CoherenceMonitor, ExpirationManager, PositionManager, Tuner};
use aethelgard_regime::MarketRegimeDetector;
use aethelgard_risk::RiskGovernor;
use aethelgard_scanner::{MarketDataProvider, ProviderManager, Scanner, SignalFactory, Strategy};
use aethelgard_storage::Storage;
use anyhow::Result;
use tokio::signal::unix::SignalKind;
use tokio::time;

mod config;
mod orchestrator;

use config::AgentConfig;
use orchestrator::Orchestrator;

/// Extension point: a production deployment links a crate implementing
/// `BrokerClient` for each connector it wants to trade through and registers
/// it here. None ship in this workspace (connector implementations are out
/// of scope — spec's explicit Non-goal).
fn register_connectors(_config: &AgentConfig) -> HashMap<ConnectorType, Arc<dyn BrokerClient>> {
    HashMap::new()
}

/// Extension point: a production deployment links a crate implementing
/// `MarketDataProvider` for each data source it wants to scan from and
/// registers it here. None ship in this workspace.
fn register_providers(_config: &AgentConfig) -> Vec<Arc<dyn MarketDataProvider>> {
    Vec::new()
}

/// Extension point: a production deployment links one or more strategy
/// crates and registers their `Strategy` implementations here. No concrete
/// strategy heuristics ship in this workspace (spec's explicit Non-goal).
fn register_strategies(_config: &AgentConfig) -> Vec<Arc<dyn Strategy>> {
    Vec::new()
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let json_logging = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    }

    std::panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
        tracing::error!("PANIC: {info}");
    }));

    tracing::info!("Starting Aethelgard autonomous trading agent");

    let config = AgentConfig::from_env()?;
    tracing::info!(
        symbols = config.symbols.len(),
        timeframes = config.timeframes.len(),
        scan_mode = ?config.scan_mode,
        "configuration loaded"
    );

    let storage = Storage::connect(&config.database_url).await?;
    tracing::info!("storage connected");

    let connectors = register_connectors(&config);
    let providers = register_providers(&config);
    let strategies = register_strategies(&config);
    if connectors.is_empty() {
        tracing::warn!("no broker connectors registered — the agent will scan and score but never execute");
    }
    if providers.is_empty() {
        tracing::warn!("no market data providers registered — scans will find no data");
    }
    if strategies.is_empty() {
        tracing::warn!("no strategies registered — the signal factory will never produce a signal");
    }

    let detector = MarketRegimeDetector::new();

    let pairs: Vec<_> = config
        .symbols
        .iter()
        .flat_map(|symbol| {
            config
                .timeframes
                .iter()
                .map(move |tf| (symbol.clone(), *tf))
        })
        .collect();

    let scanner = Scanner::new(
        pairs,
        config.scan_mode,
        ProviderManager::new(providers),
        MarketRegimeDetector::new(),
    )
    .with_candle_count(config.candle_count)
    .with_concurrency(config.scan_concurrency);

    let notify = Some(Arc::new(NotificationHub::from_env()));

    let connector_type = connectors
        .keys()
        .next()
        .copied()
        .unwrap_or(ConnectorType::MetaTrader5);
    let signal_factory = SignalFactory::new(
        storage.clone(),
        strategies,
        notify.clone(),
        connector_type,
        config.account_id.clone(),
        aethelgard_core::AccountType::Demo,
    );

    let risk_governor = Arc::new(RiskGovernor::new(storage.clone()));
    let executor = Arc::new(Executor::new(
        storage.clone(),
        Arc::clone(&risk_governor),
        connectors.clone(),
        notify.clone(),
    ));
    let position_manager = PositionManager::new(storage.clone(), connectors.clone());
    let expiration_manager = ExpirationManager::new(storage.clone());
    let coherence_monitor = CoherenceMonitor::new(storage.clone())
        .with_windows(config.pending_timeout_minutes, config.coherence_lookback_minutes);
    let closure_ingestor = ClosureIngestor::new(storage.clone(), Arc::clone(&risk_governor), connectors.clone());
    let tuner = Tuner::new(storage.clone());

    let orchestrator = Orchestrator::new(
        storage.clone(),
        scanner,
        signal_factory,
        Arc::clone(&risk_governor),
        Arc::clone(&executor),
        position_manager,
        expiration_manager,
        coherence_monitor,
        closure_ingestor,
        tuner,
        detector,
        connectors,
    );

    match orchestrator.reconcile_on_startup().await {
        Ok(reconciled) if reconciled > 0 => {
            tracing::info!(reconciled, "reconciled stale PENDING signals from a prior run");
        }
        Ok(_) => {}
        Err(e) => tracing::warn!("startup reconciliation failed: {e}"),
    }

    tracing::info!("agent is now running; press Ctrl+C to stop");

    let mut sigterm = tokio::signal::unix::signal(SignalKind::terminate())?;
    let shutdown = async {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("received SIGINT");
            }
            _ = sigterm.recv() => {
                tracing::info!("received SIGTERM");
            }
        }
    };
    tokio::pin!(shutdown);

    let mut consecutive_hard_errors = 0u32;
    let mut sleep_secs = config.min_sleep_interval_secs.max(1);

    loop {
        tokio::select! {
            _ = time::sleep(Duration::from_secs(sleep_secs)) => {
                let outcome = orchestrator.run_cycle().await;

                if outcome.hard_error {
                    consecutive_hard_errors += 1;
                    if consecutive_hard_errors >= 2 {
                        tracing::error!("two consecutive cycles failed hard; shutting down for safety");
                        break;
                    }
                } else {
                    consecutive_hard_errors = 0;
                }

                let base = outcome.dominant_regime.base_loop_interval_secs();
                sleep_secs = if outcome.active_signals > 0 {
                    base.min(config.min_sleep_interval_secs).max(1)
                } else {
                    base.max(1)
                };
            }
            _ = &mut shutdown => {
                tracing::info!(
                    grace_period_secs = config.shutdown_grace_period_secs,
                    "shutdown signal received, exiting gracefully"
                );
                break;
            }
        }
    }

    tracing::info!("aethelgard-agent shut down");
    Ok(())
}
