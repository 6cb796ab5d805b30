use aethelgard_core::{Bar, Signal, Timeframe};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Symbol metadata as reported live by a connector (spec §6). `None` means
/// the symbol is unknown to this connector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub digits: u32,
    pub point: Decimal,
    pub contract_size: Decimal,
    pub volume_min: Decimal,
    pub volume_max: Decimal,
    pub volume_step: Decimal,
    pub freeze_level: Decimal,
    pub ask: Decimal,
    pub bid: Decimal,
}

/// Outcome of `execute_signal` (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub ticket: Option<String>,
    pub price: Option<Decimal>,
    pub error: Option<String>,
}

/// An open position as reported by a connector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenPosition {
    pub ticket: String,
    pub symbol: String,
    pub position_type: String, // "BUY" | "SELL"
    pub volume: Decimal,
    pub price_open: Decimal,
    pub sl: Decimal,
    pub tp: Decimal,
    pub profit: Decimal,
    pub comment: String,
}

/// A closed position as reported by a connector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosedPosition {
    pub ticket: String,
    pub symbol: String,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub profit: Decimal,
    pub volume: Decimal,
    pub close_time: DateTime<Utc>,
    pub exit_reason: String,
    pub signal_id: Option<String>,
}

/// Outcome of `modify_position`. Connectors that cannot modify an order
/// in place (spec §9 Open Question) must return `NotSupported` rather than
/// silently accepting or erroring; callers treat it as "skip, don't alarm".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModifyOutcome {
    Applied,
    NotSupported,
    Rejected,
}

/// Broker connector contract (spec §6). Every connector implementation
/// (MT5, CCXT, paper, webhook-fed) must implement this trait. Nothing above
/// this layer may name a specific broker (spec §4.5 agnosticism rule).
#[async_trait]
pub trait BrokerClient: Send + Sync {
    async fn connect(&self) -> Result<bool>;
    async fn disconnect(&self) -> Result<()>;
    fn is_connected(&self) -> bool;

    async fn get_account_balance(&self) -> Result<Decimal>;
    async fn get_symbol_info(&self, symbol: &str) -> Result<Option<SymbolInfo>>;

    /// Optional: market-data providers implement this, many broker
    /// connectors do not and may return `Ok(None)` unconditionally.
    async fn fetch_ohlc(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        count: usize,
    ) -> Result<Option<Vec<Bar>>>;

    async fn execute_signal(&self, signal: &Signal) -> Result<ExecutionResult>;

    async fn get_open_positions(&self) -> Result<Vec<OpenPosition>>;
    async fn get_closed_positions(&self, hours: i64) -> Result<Vec<ClosedPosition>>;

    async fn close_position(&self, ticket: &str, reason: Option<&str>) -> Result<bool>;
    async fn modify_position(
        &self,
        ticket: &str,
        sl: Decimal,
        tp: Decimal,
    ) -> Result<ModifyOutcome>;

    /// Connector family, used only for logging/metadata — never for branching
    /// logic outside the connector itself.
    fn connector_name(&self) -> &str;
}
