use std::collections::HashMap;
use std::sync::Arc;

use aethelgard_broker_trait::BrokerClient;
use aethelgard_core::{AethelgardError, ConnectorType, ExitReason, SignalStatus, TradeResult};
use aethelgard_risk::RiskGovernor;
use aethelgard_storage::{SignalFilter, Storage};
use rust_decimal::Decimal;
use uuid::Uuid;

fn connector_err(e: anyhow::Error) -> AethelgardError {
    AethelgardError::Connector(e.to_string())
}

fn parse_exit_reason(raw: &str) -> ExitReason {
    match raw.to_ascii_uppercase().as_str() {
        "TAKE_PROFIT" | "TP" => ExitReason::TakeProfit,
        "STOP_LOSS" | "SL" => ExitReason::StopLoss,
        "EXPIRED" => ExitReason::Expired,
        "BROKER_CLOSED" => ExitReason::BrokerClosed,
        _ => ExitReason::Manual,
    }
}

/// Closure ingestion, the last leg of the feedback loop (spec §4.6): polls
/// each connector for positions closed since `lookback_hours`, matches them
/// back to an `EXECUTED` signal by ticket, writes the `TradeResult`, flips
/// the signal to `CLOSED`, and feeds the outcome to the risk governor's
/// consecutive-loss tracking. Re-running over the same window is harmless —
/// once a signal is `CLOSED` it no longer matches and is skipped.
pub struct ClosureIngestor {
    storage: Storage,
    risk_governor: Arc<RiskGovernor>,
    connectors: HashMap<ConnectorType, Arc<dyn BrokerClient>>,
    lookback_hours: i64,
}

impl ClosureIngestor {
    pub fn new(
        storage: Storage,
        risk_governor: Arc<RiskGovernor>,
        connectors: HashMap<ConnectorType, Arc<dyn BrokerClient>>,
    ) -> Self {
        Self {
            storage,
            risk_governor,
            connectors,
            lookback_hours: 24,
        }
    }

    pub fn with_lookback_hours(mut self, hours: i64) -> Self {
        self.lookback_hours = hours;
        self
    }

    pub async fn ingest_closures(&self) -> Result<usize, AethelgardError> {
        let executed = self
            .storage
            .get_signals(&SignalFilter {
                status: Some(SignalStatus::Executed),
                ..Default::default()
            })
            .await?;
        if executed.is_empty() {
            return Ok(0);
        }

        let mut ingested = 0;
        for (connector_type, connector) in &self.connectors {
            let closed = connector
                .get_closed_positions(self.lookback_hours)
                .await
                .map_err(connector_err)?;

            for cp in closed {
                let Some(signal) = executed.iter().find(|s| {
                    s.connector_type == *connector_type && s.order_id.as_deref() == Some(cp.ticket.as_str())
                }) else {
                    continue;
                };

                let is_win = cp.profit > Decimal::ZERO;
                let duration_minutes = (cp.close_time - signal.timestamp).num_minutes().max(0);

                let pip_size = self
                    .storage
                    .get_asset_profile(&signal.symbol, &signal.trace_id)
                    .await?
                    .map(|p| p.pip_size)
                    .unwrap_or(Decimal::ZERO);
                let pips = if pip_size > Decimal::ZERO {
                    let delta = if matches!(signal.signal_type, aethelgard_core::SignalType::Buy) {
                        cp.exit_price - cp.entry_price
                    } else {
                        cp.entry_price - cp.exit_price
                    };
                    delta / pip_size
                } else {
                    Decimal::ZERO
                };

                let trade = TradeResult {
                    id: Uuid::new_v4(),
                    signal_id: signal.id,
                    symbol: signal.symbol.clone(),
                    entry_price: cp.entry_price,
                    exit_price: cp.exit_price,
                    profit_loss: cp.profit,
                    pips,
                    is_win,
                    exit_reason: parse_exit_reason(&cp.exit_reason),
                    duration_minutes,
                    market_regime: signal
                        .metadata
                        .get("regime")
                        .and_then(|v| v.as_str())
                        .and_then(aethelgard_core::MarketRegime::from_str_opt)
                        .unwrap_or(aethelgard_core::MarketRegime::Normal),
                    parameters_used: serde_json::Value::Object(Default::default()),
                };
                self.storage.save_trade_result(&trade).await?;
                self.storage
                    .update_signal_status(signal.id, SignalStatus::Closed, None, None)
                    .await?;

                let balance = connector.get_account_balance().await.map_err(connector_err)?;
                self.risk_governor.record_trade_result(is_win, balance).await?;

                ingested += 1;
            }
        }
        Ok(ingested)
    }
}
