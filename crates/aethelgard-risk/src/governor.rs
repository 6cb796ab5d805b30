use crate::models::{RejectionAudit, SizingResult};
use crate::{limiter, lockdown, safety_governor, sizing};
use aethelgard_broker_trait::BrokerClient;
use aethelgard_core::{AethelgardError, AssetProfile, CoherenceEvent, MarketRegime, Signal};
use aethelgard_storage::Storage;
use rust_decimal::Decimal;

fn connector_err(e: anyhow::Error) -> AethelgardError {
    AethelgardError::Connector(e.to_string())
}

/// Single gate every candidate order passes through before execution (spec
/// §4.4). Combines the policy enforcer, the Safety Governor R-unit veto,
/// sizing, and the lockdown state machine. Holds only a `Storage` handle —
/// every other input (balance, symbol info, open positions) comes from the
/// connector passed in per call, so the same governor instance serves every
/// connector the system is configured with.
pub struct RiskGovernor {
    storage: Storage,
}

impl RiskGovernor {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    pub async fn is_locked(&self, connector: &dyn BrokerClient) -> Result<bool, AethelgardError> {
        let balance = connector.get_account_balance().await.map_err(connector_err)?;
        lockdown::is_locked(&self.storage, balance).await
    }

    /// `can_take_new_trade(signal, connector) -> (bool, reason)` (spec
    /// §4.4): liquidity, confluence, sentiment, R-unit, account-risk, and
    /// instrument-enabled checks, in that order — the first failing check
    /// short-circuits the rest.
    pub async fn can_take_new_trade(
        &self,
        signal: &Signal,
        connector: &dyn BrokerClient,
    ) -> Result<(bool, String), AethelgardError> {
        let balance = connector.get_account_balance().await.map_err(connector_err)?;

        if lockdown::is_locked(&self.storage, balance).await? {
            return Ok((false, "REJECTED_LOCKDOWN".to_string()));
        }

        let asset = self
            .storage
            .get_asset_profile(&signal.symbol, &signal.trace_id)
            .await?
            .ok_or_else(|| AethelgardError::AssetNotNormalized(signal.symbol.clone()))?;

        if !asset.enabled {
            return Ok((false, format!("instrument {} disabled", signal.symbol)));
        }

        let symbol_info = connector
            .get_symbol_info(&signal.symbol)
            .await
            .map_err(connector_err)?;
        match symbol_info {
            None => return Ok((false, "liquidity check failed: no symbol info".to_string())),
            Some(info) if info.ask.is_zero() || info.bid.is_zero() => {
                return Ok((false, "liquidity check failed: no quote".to_string()))
            }
            Some(_) => {}
        }

        if let Some(score) = signal
            .metadata
            .get("confluence_analysis")
            .and_then(|v| v.get("adjusted_score"))
            .and_then(|v| v.as_f64())
        {
            if score < asset.min_score {
                return Ok((
                    false,
                    format!("confluence check failed: score {score} below min_score {}", asset.min_score),
                ));
            }
        }

        if signal
            .metadata
            .get("sentiment_veto")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
        {
            return Ok((false, "sentiment veto".to_string()));
        }

        let params = self.storage.get_dynamic_params().await?;
        if let Some(audit) = safety_governor::check_r_unit(
            &signal.symbol,
            signal.entry_price,
            signal.stop_loss,
            asset.contract_size,
            balance,
            params.max_r_per_trade,
        ) {
            self.audit_rejection(signal, &audit).await?;
            return Ok((false, audit.reason));
        }

        let regime = signal
            .metadata
            .get("regime")
            .and_then(|v| v.as_str())
            .and_then(MarketRegime::from_str_opt)
            .unwrap_or(MarketRegime::Normal);
        let estimated_risk_usd = balance * params.risk_per_trade * regime.sizing_volatility_multiplier();

        let open_positions = connector.get_open_positions().await.map_err(connector_err)?;
        if let Some(reason) = limiter::check_account_risk_caps(
            &self.storage,
            &open_positions,
            estimated_risk_usd,
            balance,
            params.max_account_risk_pct,
        )
        .await?
        {
            return Ok((false, reason));
        }

        if limiter::detect_hedge(&open_positions, &signal.symbol, signal.signal_type) {
            self.storage
                .log_coherence_event(
                    &CoherenceEvent {
                        signal_id: Some(signal.id),
                        symbol: signal.symbol.clone(),
                        stage: "risk_governor".to_string(),
                        status: "HEDGE_ALERT".to_string(),
                        reason: "opposite-direction position already open".to_string(),
                        incoherence_type: Some("HEDGE".to_string()),
                        details: None,
                        connector_type: Some(signal.connector_type),
                        timestamp: chrono::Utc::now(),
                    },
                    false,
                )
                .await?;
        }

        Ok((true, "APPROVED".to_string()))
    }

    pub fn calculate_position_size(
        &self,
        asset: &AssetProfile,
        risk_amount_usd: Decimal,
        sl_distance: Decimal,
    ) -> Result<Decimal, AethelgardError> {
        sizing::calculate_position_size(asset, risk_amount_usd, sl_distance)
    }

    pub async fn calculate_position_size_master(
        &self,
        signal: &Signal,
        connector: &dyn BrokerClient,
        regime: MarketRegime,
    ) -> Result<SizingResult, AethelgardError> {
        sizing::calculate_position_size_master(&self.storage, signal, connector, regime).await
    }

    pub async fn record_trade_result(
        &self,
        is_win: bool,
        current_balance: Decimal,
    ) -> Result<(), AethelgardError> {
        let params = self.storage.get_dynamic_params().await?;
        lockdown::apply_trade_result(&self.storage, is_win, current_balance, params.max_consecutive_losses)
            .await?;
        Ok(())
    }

    async fn audit_rejection(&self, signal: &Signal, audit: &RejectionAudit) -> Result<(), AethelgardError> {
        self.storage
            .log_coherence_event(
                &CoherenceEvent {
                    signal_id: Some(signal.id),
                    symbol: signal.symbol.clone(),
                    stage: "risk_governor".to_string(),
                    status: "REJECTED".to_string(),
                    reason: audit.reason.clone(),
                    incoherence_type: Some("SAFETY_GOV_VETO".to_string()),
                    details: Some(audit.trace_id.clone()),
                    connector_type: Some(signal.connector_type),
                    timestamp: audit.timestamp,
                },
                true,
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aethelgard_broker_trait::{ClosedPosition, ExecutionResult, ModifyOutcome, OpenPosition, SymbolInfo};
    use aethelgard_core::{AccountType, Bar, ConnectorType, SignalStatus, SignalType, Timeframe};
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::Mutex;

    struct FakeConnector {
        balance: Decimal,
        symbol_info: Option<SymbolInfo>,
        open_positions: Mutex<Vec<OpenPosition>>,
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
            Ok(self.balance)
        }
        async fn get_symbol_info(&self, _symbol: &str) -> anyhow::Result<Option<SymbolInfo>> {
            Ok(self.symbol_info.clone())
        }
        async fn fetch_ohlc(
            &self,
            _symbol: &str,
            _timeframe: Timeframe,
            _count: usize,
        ) -> anyhow::Result<Option<Vec<Bar>>> {
            Ok(None)
        }
        async fn execute_signal(&self, _signal: &Signal) -> anyhow::Result<ExecutionResult> {
            Ok(ExecutionResult { success: true, ticket: Some("1".to_string()), price: None, error: None })
        }
        async fn get_open_positions(&self) -> anyhow::Result<Vec<OpenPosition>> {
            Ok(self.open_positions.lock().unwrap().clone())
        }
        async fn get_closed_positions(&self, _hours: i64) -> anyhow::Result<Vec<ClosedPosition>> {
            Ok(vec![])
        }
        async fn close_position(&self, _ticket: &str, _reason: Option<&str>) -> anyhow::Result<bool> {
            Ok(true)
        }
        async fn modify_position(&self, _ticket: &str, _sl: Decimal, _tp: Decimal) -> anyhow::Result<ModifyOutcome> {
            Ok(ModifyOutcome::Applied)
        }
        fn connector_name(&self) -> &str {
            "fake"
        }
    }

    fn symbol_info() -> SymbolInfo {
        SymbolInfo {
            digits: 5,
            point: dec!(0.00001),
            contract_size: dec!(100000),
            volume_min: dec!(0.01),
            volume_max: dec!(50),
            volume_step: dec!(0.01),
            freeze_level: dec!(0.0002),
            ask: dec!(1.1001),
            bid: dec!(1.1000),
        }
    }

    fn sample_signal() -> Signal {
        let mut s = Signal::new(
            "EURUSD",
            Timeframe::H1,
            SignalType::Buy,
            dec!(1.1000),
            dec!(1.0950),
            dec!(1.1100),
            ConnectorType::MetaTrader5,
        );
        s.account_type = AccountType::Demo;
        s.status = SignalStatus::Pending;
        s
    }

    #[tokio::test]
    async fn approves_a_clean_signal() {
        let storage = Storage::connect("sqlite::memory:").await.unwrap();
        let governor = RiskGovernor::new(storage);
        let connector = FakeConnector {
            balance: dec!(10000),
            symbol_info: Some(symbol_info()),
            open_positions: Mutex::new(vec![]),
        };

        let (approved, reason) = governor.can_take_new_trade(&sample_signal(), &connector).await.unwrap();
        assert!(approved, "expected approval, got: {reason}");
    }

    #[tokio::test]
    async fn vetoes_on_excessive_r_unit() {
        let storage = Storage::connect("sqlite::memory:").await.unwrap();
        let governor = RiskGovernor::new(storage);
        let connector = FakeConnector {
            balance: dec!(10000),
            symbol_info: Some(symbol_info()),
            open_positions: Mutex::new(vec![]),
        };

        let mut signal = sample_signal();
        signal.stop_loss = dec!(1.0750); // 100-pip SL, R = 10 > default max_r_per_trade=2.0

        let (approved, reason) = governor.can_take_new_trade(&signal, &connector).await.unwrap();
        assert!(!approved);
        assert!(reason.contains("SAFETY_GOV"));
    }

    #[tokio::test]
    async fn rejects_locked_account() {
        let storage = Storage::connect("sqlite::memory:").await.unwrap();
        for _ in 0..3 {
            governor_record_loss(&storage).await;
        }
        let governor = RiskGovernor::new(storage);
        let connector = FakeConnector {
            balance: dec!(9000),
            symbol_info: Some(symbol_info()),
            open_positions: Mutex::new(vec![]),
        };

        let (approved, reason) = governor.can_take_new_trade(&sample_signal(), &connector).await.unwrap();
        assert!(!approved);
        assert_eq!(reason, "REJECTED_LOCKDOWN");
    }

    async fn governor_record_loss(storage: &Storage) {
        lockdown::apply_trade_result(storage, false, dec!(9000), 3).await.unwrap();
    }

    #[tokio::test]
    async fn unknown_symbol_is_asset_not_normalized() {
        let storage = Storage::connect("sqlite::memory:").await.unwrap();
        let governor = RiskGovernor::new(storage);
        let connector = FakeConnector {
            balance: dec!(10000),
            symbol_info: Some(symbol_info()),
            open_positions: Mutex::new(vec![]),
        };

        let mut signal = sample_signal();
        signal.symbol = "ZZZFAKE".to_string();

        let err = governor.can_take_new_trade(&signal, &connector).await.unwrap_err();
        assert!(matches!(err, AethelgardError::AssetNotNormalized(_)));
    }
}
