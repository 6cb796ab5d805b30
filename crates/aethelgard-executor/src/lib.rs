use aethelgard_broker_trait::BrokerClient;
use aethelgard_core::{
    AethelgardError, ConnectorType, MarketRegime, PositionMetadata, Signal, SignalStatus,
    SignalType,
};
use aethelgard_notify::{Notification, NotificationEvent, NotificationHub};
use aethelgard_risk::RiskGovernor;
use aethelgard_storage::{SignalFilter, Storage};
use std::collections::HashMap;
use std::sync::Arc;

fn connector_err(e: anyhow::Error) -> AethelgardError {
    AethelgardError::Connector(e.to_string())
}

/// Delay schedule (seconds) for retrying a transient connector failure, in
/// the shape of the teacher's `wait_for_fill` backoff — our connector
/// contract's `execute_signal` is atomic (fills synchronously or fails), so
/// the schedule retries the submission itself rather than polling an order
/// status.
const RETRY_DELAYS_SECS: [u64; 3] = [1, 2, 4];

/// Executor (spec §4.5): submits an approved signal to the right connector
/// exactly once, writes position metadata on success, and never names a
/// specific broker — every broker detail lives behind `BrokerClient`.
pub struct Executor {
    storage: Storage,
    risk_governor: Arc<RiskGovernor>,
    connectors: HashMap<ConnectorType, Arc<dyn BrokerClient>>,
    notify: Option<Arc<NotificationHub>>,
}

impl Executor {
    pub fn new(
        storage: Storage,
        risk_governor: Arc<RiskGovernor>,
        connectors: HashMap<ConnectorType, Arc<dyn BrokerClient>>,
        notify: Option<Arc<NotificationHub>>,
    ) -> Self {
        Self {
            storage,
            risk_governor,
            connectors,
            notify,
        }
    }

    /// `execute_signal` (spec §4.5, 7 steps). Mutates `signal.status` to
    /// reflect the terminal outcome; callers read it back off the struct
    /// rather than from a separate return value, mirroring how the
    /// orchestrator tracks signals across a cycle.
    pub async fn execute_signal(&self, signal: &mut Signal) -> Result<(), AethelgardError> {
        if !self.is_shape_valid(signal) {
            return self.reject(signal, "INVALID_DATA", "malformed signal shape").await;
        }

        let Some(connector) = self.connectors.get(&signal.connector_type).cloned() else {
            return self
                .reject(signal, "REJECTED_CONNECTION", "no connector registered for connector_type")
                .await;
        };

        if self.risk_governor.is_locked(connector.as_ref()).await? {
            return self.reject(signal, "REJECTED_LOCKDOWN", "account is locked down").await;
        }

        if self.storage.get_signal_by_id(signal.id).await?.is_none() {
            self.storage.save_signal(signal).await?;
        }

        let result = self.submit_with_retry(connector.as_ref(), signal).await;

        match result {
            Ok(exec) if self.is_execution_success(signal, &exec) => {
                self.finalize_execution(signal, connector.as_ref(), &exec).await
            }
            Ok(exec) => {
                let reason = exec.error.unwrap_or_else(|| "execution not successful".to_string());
                self.reject(signal, "REJECTED_CONNECTION", &reason).await
            }
            Err(e) => self.reject(signal, "REJECTED_CONNECTION", &e.to_string()).await,
        }
    }

    fn is_shape_valid(&self, signal: &Signal) -> bool {
        (0.0..=1.0).contains(&signal.confidence)
            && !signal.symbol.is_empty()
            && matches!(
                signal.signal_type,
                SignalType::Buy | SignalType::Sell | SignalType::Hold
            )
    }

    fn is_execution_success(
        &self,
        signal: &Signal,
        exec: &aethelgard_broker_trait::ExecutionResult,
    ) -> bool {
        if !exec.success {
            return false;
        }
        if signal.connector_type == ConnectorType::MetaTrader5 {
            return exec.ticket.as_deref().is_some_and(|t| !t.is_empty());
        }
        true
    }

    async fn submit_with_retry(
        &self,
        connector: &dyn BrokerClient,
        signal: &Signal,
    ) -> Result<aethelgard_broker_trait::ExecutionResult, AethelgardError> {
        let mut last_err = None;
        for (attempt, delay) in RETRY_DELAYS_SECS.iter().enumerate() {
            match connector.execute_signal(signal).await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    tracing::warn!(
                        symbol = %signal.symbol,
                        attempt,
                        "execute_signal attempt failed: {e}"
                    );
                    last_err = Some(e);
                    tokio::time::sleep(std::time::Duration::from_secs(*delay)).await;
                }
            }
        }
        Err(connector_err(last_err.unwrap_or_else(|| anyhow::anyhow!("unknown connector error"))))
    }

    async fn finalize_execution(
        &self,
        signal: &mut Signal,
        connector: &dyn BrokerClient,
        exec: &aethelgard_broker_trait::ExecutionResult,
    ) -> Result<(), AethelgardError> {
        let ticket = exec.ticket.clone().unwrap_or_default();
        let execution_price = exec.price.unwrap_or(signal.entry_price);
        let now = chrono::Utc::now();

        let mut extra = HashMap::new();
        extra.insert("ticket".to_string(), serde_json::json!(ticket));
        extra.insert("execution_price".to_string(), serde_json::json!(execution_price));
        extra.insert("execution_time".to_string(), serde_json::json!(now));
        extra.insert(
            "connector".to_string(),
            serde_json::json!(signal.connector_type.as_str()),
        );

        self.storage
            .update_signal_status(signal.id, SignalStatus::Executed, None, Some(extra))
            .await?;
        signal.status = SignalStatus::Executed;
        signal.order_id = Some(ticket.clone());

        let asset = self.storage.get_asset_profile(&signal.symbol, &signal.trace_id).await?;
        let initial_risk_usd = match &asset {
            Some(asset) => (signal.entry_price - signal.stop_loss).abs() * signal.volume * asset.contract_size,
            None => {
                tracing::error!(symbol = %signal.symbol, "AssetNotNormalized: no asset profile at execution time");
                self.notify_critical(
                    &format!("No asset profile for {}", signal.symbol),
                    "position metadata will carry zero initial_risk_usd",
                )
                .await;
                rust_decimal::Decimal::ZERO
            }
        };

        let entry_regime = signal
            .metadata
            .get("regime")
            .and_then(|v| v.as_str())
            .and_then(MarketRegime::from_str_opt)
            .unwrap_or(MarketRegime::Normal);

        let metadata = PositionMetadata {
            ticket,
            symbol: signal.symbol.clone(),
            entry_price: execution_price,
            entry_time: now,
            sl: signal.stop_loss,
            tp: signal.take_profit,
            volume: signal.volume,
            initial_risk_usd,
            entry_regime,
            timeframe: signal.timeframe,
            modification_count: 0,
            last_modification_time: None,
        };
        self.storage.update_position_metadata(&metadata).await?;

        tracing::info!(
            symbol = %signal.symbol,
            connector = connector.connector_name(),
            "signal executed"
        );

        Ok(())
    }

    async fn reject(
        &self,
        signal: &mut Signal,
        reason_tag: &str,
        detail: &str,
    ) -> Result<(), AethelgardError> {
        self.storage
            .update_signal_status(signal.id, SignalStatus::Rejected, Some(reason_tag), None)
            .await?;
        signal.status = SignalStatus::Rejected;
        signal.rejection_reason = Some(reason_tag.to_string());

        tracing::warn!(symbol = %signal.symbol, reason_tag, detail, "signal rejected");

        if let Some(hub) = &self.notify {
            if reason_tag == "REJECTED_CONNECTION" {
                hub.dispatch(&Notification::new(
                    NotificationEvent::TradeRejected {
                        symbol: signal.symbol.clone(),
                        reason: detail.to_string(),
                    },
                    format!("Execution failed: {}", signal.symbol),
                    detail.to_string(),
                ))
                .await;
            }
        }

        Ok(())
    }

    async fn notify_critical(&self, title: &str, detail: &str) {
        if let Some(hub) = &self.notify {
            hub.dispatch(&Notification::new(
                NotificationEvent::TradeRejected {
                    symbol: String::new(),
                    reason: detail.to_string(),
                },
                title.to_string(),
                detail.to_string(),
            ))
            .await;
        }
    }

    /// Restart recovery (spec §5): a crash between submitting an order and
    /// persisting EXECUTED leaves a signal stuck PENDING even though the
    /// broker may have filled it. Matches by `trace_id` embedded in the
    /// connector's position comment field and upgrades the signal in place.
    pub async fn reconcile_stale_pending(&self) -> Result<usize, AethelgardError> {
        let pending = self
            .storage
            .get_signals(&SignalFilter {
                status: Some(SignalStatus::Pending),
                ..Default::default()
            })
            .await?;

        let mut reconciled = 0;
        for mut signal in pending {
            let Some(connector) = self.connectors.get(&signal.connector_type) else {
                continue;
            };
            let positions = connector.get_open_positions().await.map_err(connector_err)?;
            let Some(matched) = positions.iter().find(|p| p.comment.contains(&signal.trace_id)) else {
                continue;
            };

            let exec = aethelgard_broker_trait::ExecutionResult {
                success: true,
                ticket: Some(matched.ticket.clone()),
                price: Some(matched.price_open),
                error: None,
            };
            self.finalize_execution(&mut signal, connector.as_ref(), &exec).await?;
            reconciled += 1;
        }

        if reconciled > 0 {
            tracing::info!(reconciled, "reconciled stale PENDING signals on restart");
        }
        Ok(reconciled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aethelgard_broker_trait::{
        ClosedPosition, ExecutionResult, ModifyOutcome, OpenPosition, SymbolInfo,
    };
    use aethelgard_core::{AccountType, Bar, Timeframe};
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::Mutex;

    struct FakeConnector {
        balance: Decimal,
        execute_result: Mutex<Option<anyhow::Result<ExecutionResult>>>,
        open_positions: Vec<OpenPosition>,
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
            Ok(None)
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
            self.execute_result
                .lock()
                .unwrap()
                .take()
                .unwrap_or(Ok(ExecutionResult { success: true, ticket: Some("T1".to_string()), price: Some(dec!(1.1000)), error: None }))
        }
        async fn get_open_positions(&self) -> anyhow::Result<Vec<OpenPosition>> {
            Ok(self.open_positions.clone())
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
        s.confidence = 0.7;
        s.volume = dec!(0.1);
        s.account_type = AccountType::Demo;
        s
    }

    fn connectors_with(connector: FakeConnector) -> HashMap<ConnectorType, Arc<dyn BrokerClient>> {
        let mut map: HashMap<ConnectorType, Arc<dyn BrokerClient>> = HashMap::new();
        map.insert(ConnectorType::MetaTrader5, Arc::new(connector));
        map
    }

    #[tokio::test]
    async fn successful_execution_writes_executed_and_position_metadata() {
        let storage = Storage::connect("sqlite::memory:").await.unwrap();
        let governor = Arc::new(RiskGovernor::new(storage.clone()));
        let connector = FakeConnector { balance: dec!(10000), execute_result: Mutex::new(None), open_positions: vec![] };
        let executor = Executor::new(storage.clone(), governor, connectors_with(connector), None);

        let mut signal = sample_signal();
        executor.execute_signal(&mut signal).await.unwrap();

        assert_eq!(signal.status, SignalStatus::Executed);
        let metadata = storage.get_position_metadata("T1").await.unwrap();
        assert!(metadata.is_some());
    }

    #[tokio::test]
    async fn invalid_shape_is_rejected_without_touching_connector() {
        let storage = Storage::connect("sqlite::memory:").await.unwrap();
        let governor = Arc::new(RiskGovernor::new(storage.clone()));
        let connector = FakeConnector { balance: dec!(10000), execute_result: Mutex::new(None), open_positions: vec![] };
        let executor = Executor::new(storage.clone(), governor, connectors_with(connector), None);

        let mut signal = sample_signal();
        signal.confidence = 1.5;
        executor.execute_signal(&mut signal).await.unwrap();

        assert_eq!(signal.status, SignalStatus::Rejected);
        assert_eq!(signal.rejection_reason.as_deref(), Some("INVALID_DATA"));
    }

    #[tokio::test]
    async fn metatrader_without_ticket_is_rejected_connection() {
        let storage = Storage::connect("sqlite::memory:").await.unwrap();
        let governor = Arc::new(RiskGovernor::new(storage.clone()));
        let connector = FakeConnector {
            balance: dec!(10000),
            execute_result: Mutex::new(Some(Ok(ExecutionResult { success: true, ticket: None, price: None, error: None }))),
            open_positions: vec![],
        };
        let executor = Executor::new(storage.clone(), governor, connectors_with(connector), None);

        let mut signal = sample_signal();
        executor.execute_signal(&mut signal).await.unwrap();

        assert_eq!(signal.rejection_reason.as_deref(), Some("REJECTED_CONNECTION"));
    }

    #[tokio::test]
    async fn missing_connector_is_rejected_connection() {
        let storage = Storage::connect("sqlite::memory:").await.unwrap();
        let governor = Arc::new(RiskGovernor::new(storage.clone()));
        let executor = Executor::new(storage.clone(), governor, HashMap::new(), None);

        let mut signal = sample_signal();
        executor.execute_signal(&mut signal).await.unwrap();

        assert_eq!(signal.rejection_reason.as_deref(), Some("REJECTED_CONNECTION"));
    }
}
