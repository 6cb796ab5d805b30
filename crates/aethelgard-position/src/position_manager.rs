use aethelgard_broker_trait::{BrokerClient, OpenPosition};
use aethelgard_core::{AethelgardError, ConnectorType, MarketRegime, PositionMetadata};
use aethelgard_regime::RegimeDetectionResult;
use aethelgard_storage::Storage;
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;

fn connector_err(e: anyhow::Error) -> AethelgardError {
    AethelgardError::Connector(e.to_string())
}

#[derive(Debug, Clone, Copy)]
pub struct PositionManagerConfig {
    pub max_drawdown_multiplier: Decimal,
    pub cooldown_minutes: i64,
    pub daily_modification_cap: i32,
    pub freeze_margin_pct: Decimal,
}

impl Default for PositionManagerConfig {
    fn default() -> Self {
        Self {
            max_drawdown_multiplier: Decimal::new(2, 0),
            cooldown_minutes: 5,
            daily_modification_cap: 10,
            freeze_margin_pct: Decimal::new(10, 2), // 0.10
        }
    }
}

#[derive(Debug, Clone)]
pub enum PositionAction {
    EmergencyClosed { ticket: String, symbol: String },
    TimeExit { ticket: String, symbol: String },
    RegimeAdjusted { ticket: String, symbol: String, new_sl: Decimal, new_tp: Decimal },
    Skipped { ticket: String, symbol: String, reason: String },
}

/// Position Manager (spec §4.6): evaluated once per orchestrator cycle for
/// every broker-reported open position that has matching persisted metadata.
/// Positions with no metadata were opened outside this system and are left
/// alone (reconciliation, not management).
pub struct PositionManager {
    storage: Storage,
    connectors: HashMap<ConnectorType, Arc<dyn BrokerClient>>,
    config: PositionManagerConfig,
}

impl PositionManager {
    pub fn new(
        storage: Storage,
        connectors: HashMap<ConnectorType, Arc<dyn BrokerClient>>,
    ) -> Self {
        Self {
            storage,
            connectors,
            config: PositionManagerConfig::default(),
        }
    }

    pub fn with_config(mut self, config: PositionManagerConfig) -> Self {
        self.config = config;
        self
    }

    pub async fn check_positions(
        &self,
        regimes: &HashMap<String, RegimeDetectionResult>,
    ) -> Result<Vec<PositionAction>, AethelgardError> {
        let mut actions = Vec::new();

        for (connector_type, connector) in &self.connectors {
            let open = connector.get_open_positions().await.map_err(connector_err)?;
            for pos in open {
                let Some(meta) = self.storage.get_position_metadata(&pos.ticket).await? else {
                    continue;
                };

                if let Some(action) = self
                    .evaluate_position(*connector_type, connector.as_ref(), &pos, &meta, regimes)
                    .await?
                {
                    actions.push(action);
                }
            }
        }

        Ok(actions)
    }

    async fn evaluate_position(
        &self,
        connector_type: ConnectorType,
        connector: &dyn BrokerClient,
        pos: &OpenPosition,
        meta: &PositionMetadata,
        regimes: &HashMap<String, RegimeDetectionResult>,
    ) -> Result<Option<PositionAction>, AethelgardError> {
        let floating_loss = (-pos.profit).max(Decimal::ZERO);
        if floating_loss >= self.config.max_drawdown_multiplier * meta.initial_risk_usd {
            connector
                .close_position(&pos.ticket, Some("EMERGENCY_DRAWDOWN"))
                .await
                .map_err(connector_err)?;
            tracing::warn!(
                symbol = %pos.symbol,
                ticket = %pos.ticket,
                floating_loss = %floating_loss,
                "emergency close: drawdown exceeded initial risk multiplier"
            );
            return Ok(Some(PositionAction::EmergencyClosed {
                ticket: pos.ticket.clone(),
                symbol: pos.symbol.clone(),
            }));
        }

        let current_regime = regimes.get(&pos.symbol).map(|r| r.regime).unwrap_or(meta.entry_regime);
        let age_hours = (chrono::Utc::now() - meta.entry_time).num_minutes() as f64 / 60.0;
        if age_hours >= current_regime.stale_threshold_hours() as f64 {
            connector
                .close_position(&pos.ticket, Some("TIME_BASED_EXIT"))
                .await
                .map_err(connector_err)?;
            tracing::info!(symbol = %pos.symbol, ticket = %pos.ticket, age_hours, "time-based exit");
            return Ok(Some(PositionAction::TimeExit {
                ticket: pos.ticket.clone(),
                symbol: pos.symbol.clone(),
            }));
        }

        if current_regime == meta.entry_regime {
            return Ok(None);
        }

        if !self.modification_allowed(meta) {
            return Ok(Some(PositionAction::Skipped {
                ticket: pos.ticket.clone(),
                symbol: pos.symbol.clone(),
                reason: "cooldown_or_daily_cap".to_string(),
            }));
        }

        let atr_percent = regimes
            .get(&pos.symbol)
            .map(|r| r.metrics.atr_percent)
            .unwrap_or(0.0);
        if atr_percent <= 0.0 {
            return Ok(Some(PositionAction::Skipped {
                ticket: pos.ticket.clone(),
                symbol: pos.symbol.clone(),
                reason: "no_atr_data".to_string(),
            }));
        }

        let (sl_atr_mult, tp_r_mult) = regime_sl_tp_multipliers(current_regime);
        let atr_abs = pos.price_open * Decimal::from_f64(atr_percent / 100.0).unwrap_or(Decimal::ZERO);
        let risk_distance = atr_abs * sl_atr_mult;
        let is_long = pos.position_type == "BUY";

        let (mut new_sl, mut new_tp) = if is_long {
            (pos.price_open - risk_distance, pos.price_open + risk_distance * tp_r_mult)
        } else {
            (pos.price_open + risk_distance, pos.price_open - risk_distance * tp_r_mult)
        };

        if let Some(info) = connector.get_symbol_info(&pos.symbol).await.map_err(connector_err)? {
            let required_distance = info.freeze_level * (Decimal::ONE + self.config.freeze_margin_pct);
            let current_price = if is_long { info.bid } else { info.ask };

            if (current_price - new_sl).abs() < required_distance {
                new_sl = if is_long {
                    current_price - required_distance
                } else {
                    current_price + required_distance
                };
            }
            if (current_price - new_tp).abs() < required_distance {
                new_tp = if is_long {
                    current_price + required_distance
                } else {
                    current_price - required_distance
                };
            }
        }

        match connector.modify_position(&pos.ticket, new_sl, new_tp).await.map_err(connector_err)? {
            aethelgard_broker_trait::ModifyOutcome::Applied => {
                let mut updated = meta.clone();
                updated.sl = new_sl;
                updated.tp = new_tp;
                updated.modification_count += 1;
                updated.last_modification_time = Some(chrono::Utc::now());
                self.storage.update_position_metadata(&updated).await?;

                tracing::info!(
                    symbol = %pos.symbol,
                    ticket = %pos.ticket,
                    regime = current_regime.as_str(),
                    "SL/TP adjusted for regime change"
                );
                Ok(Some(PositionAction::RegimeAdjusted {
                    ticket: pos.ticket.clone(),
                    symbol: pos.symbol.clone(),
                    new_sl,
                    new_tp,
                }))
            }
            aethelgard_broker_trait::ModifyOutcome::NotSupported => Ok(Some(PositionAction::Skipped {
                ticket: pos.ticket.clone(),
                symbol: pos.symbol.clone(),
                reason: "connector_does_not_support_modify".to_string(),
            })),
            aethelgard_broker_trait::ModifyOutcome::Rejected => {
                self.storage.rollback_position_modification(&pos.ticket).await?;
                tracing::warn!(symbol = %pos.symbol, ticket = %pos.ticket, "modification rejected by broker, rolled back");
                Ok(Some(PositionAction::Skipped {
                    ticket: pos.ticket.clone(),
                    symbol: pos.symbol.clone(),
                    reason: "broker_rejected_modification".to_string(),
                }))
            }
        }
    }

    fn modification_allowed(&self, meta: &PositionMetadata) -> bool {
        if meta.modification_count >= self.config.daily_modification_cap {
            return false;
        }
        match meta.last_modification_time {
            Some(last) => {
                let elapsed = chrono::Utc::now() - last;
                elapsed.num_minutes() >= self.config.cooldown_minutes
            }
            None => true,
        }
    }
}

/// Regime SL/TP multiplier table (spec §4.6). Regimes not named explicitly
/// keep the conservative default rather than widening or tightening.
fn regime_sl_tp_multipliers(regime: MarketRegime) -> (Decimal, Decimal) {
    match regime {
        MarketRegime::Trend => (Decimal::new(3, 0), Decimal::new(3, 0)),
        MarketRegime::Range => (Decimal::new(15, 1), Decimal::new(15, 1)),
        _ => (Decimal::new(2, 0), Decimal::new(2, 0)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aethelgard_broker_trait::{ClosedPosition, ExecutionResult, SymbolInfo};
    use aethelgard_core::{Bar, Signal, Timeframe};
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::Mutex;

    struct FakeConnector {
        positions: Vec<OpenPosition>,
        closed: Mutex<Vec<String>>,
        modified: Mutex<Vec<(String, Decimal, Decimal)>>,
        symbol_info: Option<SymbolInfo>,
        modify_outcome: aethelgard_broker_trait::ModifyOutcome,
    }

    #[async_trait]
    impl BrokerClient for FakeConnector {
        async fn connect(&self) -> anyhow::Result<bool> {
            Ok(true)
        }
        async fn disconnect(&self) -> anyhow::Result<()> {
            Ok(())
        }
        fn is_connected(&self) -> bool {
            true
        }
        async fn get_account_balance(&self) -> anyhow::Result<Decimal> {
            Ok(dec!(10000))
        }
        async fn get_symbol_info(&self, _symbol: &str) -> anyhow::Result<Option<SymbolInfo>> {
            Ok(self.symbol_info.clone())
        }
        async fn fetch_ohlc(&self, _s: &str, _t: Timeframe, _c: usize) -> anyhow::Result<Option<Vec<Bar>>> {
            Ok(None)
        }
        async fn execute_signal(&self, _signal: &Signal) -> anyhow::Result<ExecutionResult> {
            unimplemented!()
        }
        async fn get_open_positions(&self) -> anyhow::Result<Vec<OpenPosition>> {
            Ok(self.positions.clone())
        }
        async fn get_closed_positions(&self, _hours: i64) -> anyhow::Result<Vec<ClosedPosition>> {
            Ok(vec![])
        }
        async fn close_position(&self, ticket: &str, _reason: Option<&str>) -> anyhow::Result<bool> {
            self.closed.lock().unwrap().push(ticket.to_string());
            Ok(true)
        }
        async fn modify_position(&self, ticket: &str, sl: Decimal, tp: Decimal) -> anyhow::Result<aethelgard_broker_trait::ModifyOutcome> {
            self.modified.lock().unwrap().push((ticket.to_string(), sl, tp));
            Ok(self.modify_outcome)
        }
        fn connector_name(&self) -> &str {
            "fake"
        }
    }

    fn sample_position(ticket: &str, profit: Decimal) -> OpenPosition {
        OpenPosition {
            ticket: ticket.to_string(),
            symbol: "EURUSD".to_string(),
            position_type: "BUY".to_string(),
            volume: dec!(0.1),
            price_open: dec!(1.1000),
            sl: dec!(1.0950),
            tp: dec!(1.1100),
            profit,
            comment: "SIG-aaaa1111".to_string(),
        }
    }

    fn sample_metadata(entry_regime: MarketRegime, entry_time: chrono::DateTime<chrono::Utc>) -> PositionMetadata {
        PositionMetadata {
            ticket: "T1".to_string(),
            symbol: "EURUSD".to_string(),
            entry_price: dec!(1.1000),
            entry_time,
            sl: dec!(1.0950),
            tp: dec!(1.1100),
            volume: dec!(0.1),
            initial_risk_usd: dec!(50),
            entry_regime,
            timeframe: Timeframe::H1,
            modification_count: 0,
            last_modification_time: None,
        }
    }

    fn connectors_with(connector: FakeConnector) -> HashMap<ConnectorType, Arc<dyn BrokerClient>> {
        let mut map: HashMap<ConnectorType, Arc<dyn BrokerClient>> = HashMap::new();
        map.insert(ConnectorType::MetaTrader5, Arc::new(connector));
        map
    }

    #[tokio::test]
    async fn emergency_closes_when_drawdown_exceeds_multiplier() {
        let storage = Storage::connect("sqlite::memory:").await.unwrap();
        let meta = sample_metadata(MarketRegime::Trend, chrono::Utc::now());
        storage.update_position_metadata(&meta).await.unwrap();

        let connector = FakeConnector {
            positions: vec![sample_position("T1", dec!(-150))],
            closed: Mutex::new(vec![]),
            modified: Mutex::new(vec![]),
            symbol_info: None,
            modify_outcome: aethelgard_broker_trait::ModifyOutcome::Applied,
        };
        let manager = PositionManager::new(storage, connectors_with(connector));

        let actions = manager.check_positions(&HashMap::new()).await.unwrap();
        assert!(matches!(actions[0], PositionAction::EmergencyClosed { .. }));
    }

    #[tokio::test]
    async fn time_exit_fires_past_stale_threshold() {
        let storage = Storage::connect("sqlite::memory:").await.unwrap();
        let old_entry = chrono::Utc::now() - chrono::Duration::hours(5);
        let meta = sample_metadata(MarketRegime::Volatile, old_entry);
        storage.update_position_metadata(&meta).await.unwrap();

        let connector = FakeConnector {
            positions: vec![sample_position("T1", dec!(10))],
            closed: Mutex::new(vec![]),
            modified: Mutex::new(vec![]),
            symbol_info: None,
            modify_outcome: aethelgard_broker_trait::ModifyOutcome::Applied,
        };
        let manager = PositionManager::new(storage, connectors_with(connector));

        let actions = manager.check_positions(&HashMap::new()).await.unwrap();
        assert!(matches!(actions[0], PositionAction::TimeExit { .. }));
    }

    #[tokio::test]
    async fn unreconciled_position_without_metadata_is_skipped() {
        let storage = Storage::connect("sqlite::memory:").await.unwrap();
        let connector = FakeConnector {
            positions: vec![sample_position("UNKNOWN", dec!(0))],
            closed: Mutex::new(vec![]),
            modified: Mutex::new(vec![]),
            symbol_info: None,
            modify_outcome: aethelgard_broker_trait::ModifyOutcome::Applied,
        };
        let manager = PositionManager::new(storage, connectors_with(connector));

        let actions = manager.check_positions(&HashMap::new()).await.unwrap();
        assert!(actions.is_empty());
    }
}
