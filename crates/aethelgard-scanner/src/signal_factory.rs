use crate::scanner::{ScanEntry, ScanResult};
use crate::strategy::Strategy;
use aethelgard_core::{AccountType, AethelgardError, ConnectorType, MarketRegime, Signal, Timeframe};
use aethelgard_notify::{Notification, NotificationEvent, NotificationHub, NotificationTier};
use aethelgard_risk::confluence;
use aethelgard_storage::Storage;
use std::collections::HashMap;
use std::sync::Arc;

fn timeframe_rank(tf: Timeframe) -> u8 {
    match tf {
        Timeframe::M1 => 0,
        Timeframe::M5 => 1,
        Timeframe::M15 => 2,
        Timeframe::M30 => 3,
        Timeframe::H1 => 4,
        Timeframe::H4 => 5,
        Timeframe::D1 => 6,
    }
}

fn higher_timeframe_regimes(
    scan: &ScanResult,
    symbol: &str,
    timeframe: Timeframe,
) -> HashMap<Timeframe, MarketRegime> {
    let rank = timeframe_rank(timeframe);
    scan.values()
        .filter(|e| e.symbol == symbol && timeframe_rank(e.timeframe) > rank)
        .map(|e| (e.timeframe, e.regime))
        .collect()
}

fn tier_from_score(score: f64) -> NotificationTier {
    if score >= 80.0 {
        NotificationTier::Critical
    } else if score >= 60.0 {
        NotificationTier::Premium
    } else {
        NotificationTier::Standard
    }
}

/// Signal Factory (spec §4.3): dispatches every registered strategy against
/// each scanned frame, deduplicates survivors, applies the confluence
/// adjustment, persists as PENDING, and optionally notifies.
pub struct SignalFactory {
    storage: Storage,
    strategies: Vec<Arc<dyn Strategy>>,
    notify: Option<Arc<NotificationHub>>,
    connector_type: ConnectorType,
    account_id: String,
    account_type: AccountType,
}

impl SignalFactory {
    pub fn new(
        storage: Storage,
        strategies: Vec<Arc<dyn Strategy>>,
        notify: Option<Arc<NotificationHub>>,
        connector_type: ConnectorType,
        account_id: impl Into<String>,
        account_type: AccountType,
    ) -> Self {
        Self {
            storage,
            strategies,
            notify,
            connector_type,
            account_id: account_id.into(),
            account_type,
        }
    }

    /// Processes one scan cycle's results into persisted PENDING signals.
    pub async fn process(&self, scan: &ScanResult) -> Result<Vec<Signal>, AethelgardError> {
        let params = self.storage.get_dynamic_params().await?;
        let mut produced = Vec::new();

        for entry in scan.values() {
            for candidate in self.dispatch_strategies(entry).await {
                if self.storage.has_open_position(&entry.symbol).await? {
                    continue;
                }
                if self
                    .storage
                    .has_recent_signal(&entry.symbol, candidate.signal_type, entry.timeframe)
                    .await?
                {
                    continue;
                }

                let mut signal = Signal::new(
                    entry.symbol.clone(),
                    entry.timeframe,
                    candidate.signal_type,
                    candidate.entry_price,
                    candidate.stop_loss,
                    candidate.take_profit,
                    self.connector_type,
                );
                signal.confidence = candidate.confidence;
                signal.account_id = self.account_id.clone();
                signal.account_type = self.account_type;
                signal
                    .metadata
                    .insert("regime".to_string(), serde_json::json!(entry.regime.as_str()));

                let htf_regimes = higher_timeframe_regimes(scan, &entry.symbol, entry.timeframe);
                let (adjusted, mut breakdown) = confluence::apply_confluence(
                    candidate.confidence * 100.0,
                    &htf_regimes,
                    &params.confluence_weights,
                );
                if let Some(obj) = breakdown.as_object_mut() {
                    obj.insert("adjusted_score".to_string(), serde_json::json!(adjusted));
                }
                signal.metadata.insert("confluence_analysis".to_string(), breakdown);

                self.storage.save_signal(&signal).await?;

                if let Some(hub) = &self.notify {
                    let tier = tier_from_score(adjusted);
                    if tier >= NotificationTier::Premium {
                        hub.dispatch(&Notification::new(
                            NotificationEvent::SignalGenerated {
                                symbol: signal.symbol.clone(),
                                direction: signal.signal_type.as_str().to_string(),
                                confidence: adjusted,
                                tier,
                            },
                            format!("New signal: {}", signal.symbol),
                            format!(
                                "{} {} @ {} (score {adjusted:.1})",
                                signal.symbol,
                                signal.signal_type.as_str(),
                                signal.entry_price
                            ),
                        ))
                        .await;
                    }
                }

                produced.push(signal);
            }
        }

        Ok(produced)
    }

    /// Dispatches every registered strategy against one frame concurrently.
    /// Strategies are pure and CPU-bound, so each runs on a blocking worker
    /// thread rather than the async executor (spec §5: "CPU-bound work...
    /// must not block the tick").
    async fn dispatch_strategies(&self, entry: &ScanEntry) -> Vec<crate::strategy::StrategySignal> {
        let mut set = tokio::task::JoinSet::new();
        for strategy in &self.strategies {
            let strategy = strategy.clone();
            let symbol = entry.symbol.clone();
            let bars = entry.bars.clone();
            let regime = entry.regime;
            set.spawn_blocking(move || strategy.analyze(&symbol, &bars, regime));
        }

        let mut out = Vec::new();
        while let Some(joined) = set.join_next().await {
            if let Ok(Some(signal)) = joined {
                out.push(signal);
            }
        }
        out
    }
}
