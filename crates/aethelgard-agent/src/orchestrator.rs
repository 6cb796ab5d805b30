use std::collections::HashMap;
use std::sync::Arc;

use aethelgard_broker_trait::BrokerClient;
use aethelgard_core::{AethelgardError, ConnectorType, MarketRegime};
use aethelgard_executor::Executor;
use aethelgard_position::{ClosureIngestor, CoherenceMonitor, ExpirationManager, PositionManager, Tuner};
use aethelgard_regime::{MarketRegimeDetector, RegimeDetectionResult};
use aethelgard_risk::RiskGovernor;
use aethelgard_scanner::{ScanResult, Scanner, SignalFactory};
use aethelgard_storage::Storage;
use chrono::Utc;

/// One orchestrator pass (spec §4.2): expire stale signals, scan the
/// configured universe, turn the scan into signals, filter each through the
/// risk governor and hand approved ones to the executor, sweep open
/// positions, ingest closures, and periodically run the feedback loop
/// (coherence monitor + tuner). Everything needed to run the cycle lives
/// here; `main.rs` only owns the sleep/shutdown loop around it.
pub struct Orchestrator {
    storage: Storage,
    scanner: Scanner,
    signal_factory: SignalFactory,
    risk_governor: Arc<RiskGovernor>,
    executor: Arc<Executor>,
    position_manager: PositionManager,
    expiration_manager: ExpirationManager,
    coherence_monitor: CoherenceMonitor,
    closure_ingestor: ClosureIngestor,
    tuner: Tuner,
    detector: MarketRegimeDetector,
    connectors: HashMap<ConnectorType, Arc<dyn BrokerClient>>,
}

/// Outcome of a single cycle, used by `main.rs` to compute the next sleep
/// interval and keep its own error-streak counter.
#[derive(Debug, Clone, Copy)]
pub struct CycleOutcome {
    pub active_signals: usize,
    pub dominant_regime: MarketRegime,
    pub hard_error: bool,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        storage: Storage,
        scanner: Scanner,
        signal_factory: SignalFactory,
        risk_governor: Arc<RiskGovernor>,
        executor: Arc<Executor>,
        position_manager: PositionManager,
        expiration_manager: ExpirationManager,
        coherence_monitor: CoherenceMonitor,
        closure_ingestor: ClosureIngestor,
        tuner: Tuner,
        detector: MarketRegimeDetector,
        connectors: HashMap<ConnectorType, Arc<dyn BrokerClient>>,
    ) -> Self {
        Self {
            storage,
            scanner,
            signal_factory,
            risk_governor,
            executor,
            position_manager,
            expiration_manager,
            coherence_monitor,
            closure_ingestor,
            tuner,
            detector,
            connectors,
        }
    }

    pub async fn run_cycle(&self) -> CycleOutcome {
        let mut hard_error = false;

        match self.expiration_manager.expire_old_signals().await {
            Ok(stats) if stats.total_expired > 0 => {
                tracing::info!(expired = stats.total_expired, "signals expired this cycle");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("expiration sweep failed: {e}");
                hard_error = true;
            }
        }

        let scan = self.scanner.scan().await;

        let signals = match self.signal_factory.process(&scan).await {
            Ok(signals) => signals,
            Err(e) => {
                tracing::error!("signal factory failed: {e}");
                self.persist_cycle_stats(0, 0, true).await;
                return CycleOutcome {
                    active_signals: 0,
                    dominant_regime: dominant_regime(&scan),
                    hard_error: true,
                };
            }
        };

        // `attempted_signals` feeds the adaptive heartbeat's "something is
        // in flight, poll sooner" clamp; `executed_signals` feeds
        // `session_stats.signals_executed` and must only count signals that
        // actually reached `SignalStatus::Executed` (spec §8's invariant) —
        // `execute_signal` can still terminate a signal as REJECTED after
        // this risk check passes, so the two counts are not interchangeable.
        let mut attempted_signals = 0;
        let mut executed_signals = 0;
        for mut signal in signals {
            let Some(connector) = self.connectors.get(&signal.connector_type).cloned() else {
                tracing::warn!(symbol = %signal.symbol, "no connector registered for signal, skipping");
                continue;
            };

            match self.risk_governor.is_locked(connector.as_ref()).await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!("lockdown check failed: {e}");
                    hard_error = true;
                    continue;
                }
            }

            match self
                .risk_governor
                .can_take_new_trade(&signal, connector.as_ref())
                .await
            {
                Ok((true, _)) => {
                    attempted_signals += 1;
                    if let Err(e) = self.executor.execute_signal(&mut signal).await {
                        tracing::error!(symbol = %signal.symbol, "execution failed: {e}");
                    }
                    if signal.status == aethelgard_core::SignalStatus::Executed {
                        executed_signals += 1;
                    }
                }
                Ok((false, reason)) => {
                    tracing::debug!(symbol = %signal.symbol, reason, "trade vetoed");
                }
                Err(e) => {
                    tracing::warn!("risk governor evaluation failed: {e}");
                    hard_error = true;
                }
            }
        }

        let regimes = regimes_per_symbol(&scan, &self.detector);
        if let Err(e) = self.position_manager.check_positions(&regimes).await {
            tracing::warn!("position sweep failed: {e}");
            hard_error = true;
        }

        if let Err(e) = self.closure_ingestor.ingest_closures().await {
            tracing::warn!("closure ingestion failed: {e}");
        }

        if let Err(e) = self.coherence_monitor.run_once().await {
            tracing::warn!("coherence monitor failed: {e}");
        }

        match self.tuner.maybe_tune().await {
            Ok(Some(adjustment)) => {
                tracing::info!(
                    direction = ?adjustment.direction,
                    win_rate = adjustment.win_rate,
                    "dynamic parameters tuned"
                );
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("tuner failed: {e}"),
        }

        self.persist_cycle_stats(signals_processed(&scan), executed_signals, hard_error)
            .await;

        CycleOutcome {
            active_signals: attempted_signals,
            dominant_regime: dominant_regime(&scan),
            hard_error,
        }
    }

    /// Reconciles signals left `PENDING` from a prior process lifetime
    /// (spec §4.5 restart recovery). Call once at startup, before the first
    /// cycle.
    pub async fn reconcile_on_startup(&self) -> Result<usize, AethelgardError> {
        self.executor.reconcile_stale_pending().await
    }

    async fn persist_cycle_stats(&self, processed: usize, executed: usize, errored: bool) {
        let state = match self.storage.get_system_state().await {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!("could not load system state to persist cycle stats: {e}");
                return;
            }
        };

        let today = Utc::now().date_naive();
        let stats = if state.session_stats.date == today {
            state.session_stats.clone()
        } else {
            Default::default()
        };

        let patch = serde_json::json!({
            "session_stats": {
                "date": today,
                "signals_processed": stats.signals_processed + processed as u64,
                "signals_executed": stats.signals_executed + executed as u64,
                "cycles_completed": stats.cycles_completed + 1,
                "errors_count": stats.errors_count + if errored { 1 } else { 0 },
            }
        });

        if let Err(e) = self.storage.update_system_state(patch).await {
            tracing::warn!("failed to persist cycle stats: {e}");
        }
    }
}

fn signals_processed(scan: &ScanResult) -> usize {
    scan.len()
}

/// Picks, per symbol, the regime detected from whichever scanned timeframe
/// HashMap iteration happens to surface first. Regime detection is a pure
/// function of the bars it is given, so this is deterministic for a given
/// scan result even though the timeframe chosen is arbitrary across symbols.
fn regimes_per_symbol(
    scan: &ScanResult,
    detector: &MarketRegimeDetector,
) -> HashMap<String, RegimeDetectionResult> {
    let mut map = HashMap::new();
    for entry in scan.values() {
        if map.contains_key(&entry.symbol) {
            continue;
        }
        if let Ok(result) = detector.detect_regime(&entry.bars) {
            map.insert(entry.symbol.clone(), result);
        }
    }
    map
}

/// The most frequently observed regime across this cycle's scan, used only
/// to pick the adaptive heartbeat's base interval (spec §4.2). Falls back to
/// `Normal` when nothing was scanned.
fn dominant_regime(scan: &ScanResult) -> MarketRegime {
    const REGIMES: [MarketRegime; 8] = [
        MarketRegime::Trend,
        MarketRegime::Range,
        MarketRegime::Volatile,
        MarketRegime::Shock,
        MarketRegime::Bull,
        MarketRegime::Bear,
        MarketRegime::Crash,
        MarketRegime::Normal,
    ];

    let mut best = MarketRegime::Normal;
    let mut best_count = 0usize;
    for regime in REGIMES {
        let count = scan.values().filter(|e| e.regime == regime).count();
        if count > best_count {
            best_count = count;
            best = regime;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use aethelgard_position::PositionManagerConfig;
    use aethelgard_scanner::{ProviderManager, ScanMode};

    async fn idle_orchestrator() -> Orchestrator {
        let storage = Storage::connect("sqlite::memory:").await.unwrap();
        let detector = MarketRegimeDetector::new();
        let connectors: HashMap<ConnectorType, Arc<dyn BrokerClient>> = HashMap::new();

        let scanner = Scanner::new(
            vec![],
            ScanMode::Standard,
            ProviderManager::new(vec![]),
            MarketRegimeDetector::new(),
        );
        let signal_factory = SignalFactory::new(
            storage.clone(),
            vec![],
            None,
            ConnectorType::MetaTrader5,
            "test-account",
            aethelgard_core::AccountType::Demo,
        );
        let risk_governor = Arc::new(RiskGovernor::new(storage.clone()));
        let executor = Arc::new(Executor::new(
            storage.clone(),
            Arc::clone(&risk_governor),
            connectors.clone(),
            None,
        ));
        let position_manager =
            PositionManager::new(storage.clone(), connectors.clone()).with_config(PositionManagerConfig::default());
        let expiration_manager = ExpirationManager::new(storage.clone());
        let coherence_monitor = CoherenceMonitor::new(storage.clone());
        let closure_ingestor =
            ClosureIngestor::new(storage.clone(), Arc::clone(&risk_governor), connectors.clone());
        let tuner = Tuner::new(storage.clone());

        Orchestrator::new(
            storage,
            scanner,
            signal_factory,
            risk_governor,
            executor,
            position_manager,
            expiration_manager,
            coherence_monitor,
            closure_ingestor,
            tuner,
            detector,
            connectors,
        )
    }

    #[tokio::test]
    async fn idle_cycle_with_no_registries_completes_without_error() {
        let orchestrator = idle_orchestrator().await;

        let outcome = orchestrator.run_cycle().await;
        assert_eq!(outcome.active_signals, 0);
        assert!(!outcome.hard_error);
        assert_eq!(outcome.dominant_regime, MarketRegime::Normal);

        let state = orchestrator.storage.get_system_state().await.unwrap();
        assert_eq!(state.session_stats.cycles_completed, 1);
    }

    #[tokio::test]
    async fn reconcile_on_startup_is_a_noop_with_no_pending_signals() {
        let orchestrator = idle_orchestrator().await;
        let reconciled = orchestrator.reconcile_on_startup().await.unwrap();
        assert_eq!(reconciled, 0);
    }
}
