use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Canonical internal timeframe set. Provider adapters translate their own
/// strings to/from this set; no provider adapter ships in this workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    M1,
    M5,
    M15,
    M30,
    H1,
    H4,
    D1,
}

impl Timeframe {
    /// Window (minutes) after which a PENDING signal on this timeframe expires.
    pub fn expiration_minutes(&self) -> i64 {
        match self {
            Timeframe::M1 => 1,
            Timeframe::M5 => 5,
            Timeframe::M15 => 15,
            Timeframe::M30 => 30,
            Timeframe::H1 => 60,
            Timeframe::H4 => 240,
            Timeframe::D1 => 1440,
        }
    }

    /// Dedup window (minutes) used by the Signal Factory to reject recent
    /// duplicate signals on the same (symbol, signal_type, timeframe).
    pub fn dedup_window_minutes(&self) -> i64 {
        match self {
            Timeframe::M1 => 5,
            Timeframe::M5 => 20,
            Timeframe::M15 => 60,
            Timeframe::M30 => 60,
            Timeframe::H1 => 240,
            Timeframe::H4 => 480,
            Timeframe::D1 => 1440,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M1 => "M1",
            Timeframe::M5 => "M5",
            Timeframe::M15 => "M15",
            Timeframe::M30 => "M30",
            Timeframe::H1 => "H1",
            Timeframe::H4 => "H4",
            Timeframe::D1 => "D1",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "M1" => Some(Timeframe::M1),
            "M5" => Some(Timeframe::M5),
            "M15" => Some(Timeframe::M15),
            "M30" => Some(Timeframe::M30),
            "H1" => Some(Timeframe::H1),
            "H4" => Some(Timeframe::H4),
            "D1" => Some(Timeframe::D1),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalType {
    Buy,
    Sell,
    Hold,
    Close,
    Modify,
}

impl SignalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalType::Buy => "BUY",
            SignalType::Sell => "SELL",
            SignalType::Hold => "HOLD",
            SignalType::Close => "CLOSE",
            SignalType::Modify => "MODIFY",
        }
    }
}

/// Connector family. The core and everything above it must never branch on a
/// *specific* broker, only on this type (spec §4.5 agnosticism rule).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectorType {
    MetaTrader5,
    Ccxt,
    Paper,
    Webhook,
}

impl ConnectorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectorType::MetaTrader5 => "METATRADER5",
            ConnectorType::Ccxt => "CCXT",
            ConnectorType::Paper => "PAPER",
            ConnectorType::Webhook => "WEBHOOK",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "METATRADER5" => Some(ConnectorType::MetaTrader5),
            "CCXT" => Some(ConnectorType::Ccxt),
            "PAPER" => Some(ConnectorType::Paper),
            "WEBHOOK" => Some(ConnectorType::Webhook),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountType {
    Demo,
    Real,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalStatus {
    Pending,
    Executed,
    Rejected,
    Expired,
    Closed,
}

impl SignalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalStatus::Pending => "PENDING",
            SignalStatus::Executed => "EXECUTED",
            SignalStatus::Rejected => "REJECTED",
            SignalStatus::Expired => "EXPIRED",
            SignalStatus::Closed => "CLOSED",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(SignalStatus::Pending),
            "EXECUTED" => Some(SignalStatus::Executed),
            "REJECTED" => Some(SignalStatus::Rejected),
            "EXPIRED" => Some(SignalStatus::Expired),
            "CLOSED" => Some(SignalStatus::Closed),
            _ => None,
        }
    }

    /// Legal PENDING->{EXECUTED,REJECTED,EXPIRED}, EXECUTED->CLOSED.
    pub fn can_transition_to(&self, next: SignalStatus) -> bool {
        use SignalStatus::*;
        matches!(
            (self, next),
            (Pending, Executed) | (Pending, Rejected) | (Pending, Expired) | (Executed, Closed)
        )
    }
}

/// Market regime classification for a (symbol, timeframe) pair, per the
/// glossary. `Normal` is the default/fallback when no other regime scores
/// highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketRegime {
    Trend,
    Range,
    Volatile,
    Shock,
    Bull,
    Bear,
    Crash,
    Normal,
}

impl MarketRegime {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketRegime::Trend => "TREND",
            MarketRegime::Range => "RANGE",
            MarketRegime::Volatile => "VOLATILE",
            MarketRegime::Shock => "SHOCK",
            MarketRegime::Bull => "BULL",
            MarketRegime::Bear => "BEAR",
            MarketRegime::Crash => "CRASH",
            MarketRegime::Normal => "NORMAL",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "TREND" => Some(MarketRegime::Trend),
            "RANGE" => Some(MarketRegime::Range),
            "VOLATILE" => Some(MarketRegime::Volatile),
            "SHOCK" => Some(MarketRegime::Shock),
            "BULL" => Some(MarketRegime::Bull),
            "BEAR" => Some(MarketRegime::Bear),
            "CRASH" => Some(MarketRegime::Crash),
            "NORMAL" => Some(MarketRegime::Normal),
            _ => None,
        }
    }

    /// Volatility multiplier applied to position sizing (spec §4.4).
    pub fn sizing_volatility_multiplier(&self) -> Decimal {
        match self {
            MarketRegime::Range | MarketRegime::Crash => Decimal::new(5, 1), // 0.5
            _ => Decimal::ONE,
        }
    }

    /// Stale-position threshold in hours used by the Position Manager (§4.6).
    pub fn stale_threshold_hours(&self) -> i64 {
        match self {
            MarketRegime::Trend => 72,
            MarketRegime::Range => 4,
            MarketRegime::Volatile => 2,
            MarketRegime::Crash => 1,
            _ => 24,
        }
    }

    /// Base orchestrator loop interval in seconds for this regime (§4.2).
    pub fn base_loop_interval_secs(&self) -> u64 {
        match self {
            MarketRegime::Trend => 5,
            MarketRegime::Volatile => 15,
            MarketRegime::Range => 30,
            MarketRegime::Shock => 60,
            _ => 30,
        }
    }
}

/// OHLCV bar. Float is fine here: §9 reserves Decimal for money/risk math,
/// indicator math stays float.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// A trading signal (spec §3). `trace_id` is a correlation token propagated
/// to logs/audits; `rejection_reason` carries the more specific outcome tags
/// (`INVALID_DATA`, `REJECTED_LOCKDOWN`, `REJECTED_CONNECTION`, ...) that sit
/// underneath the fixed `SignalStatus::Rejected` value (see DESIGN.md open
/// question #5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub id: Uuid,
    pub trace_id: String,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub signal_type: SignalType,
    pub confidence: f64,
    pub entry_price: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub volume: Decimal,
    pub connector_type: ConnectorType,
    pub market_type: String,
    pub account_id: String,
    pub account_type: AccountType,
    pub status: SignalStatus,
    pub rejection_reason: Option<String>,
    pub order_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Signal {
    pub fn new(
        symbol: impl Into<String>,
        timeframe: Timeframe,
        signal_type: SignalType,
        entry_price: Decimal,
        stop_loss: Decimal,
        take_profit: Decimal,
        connector_type: ConnectorType,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            trace_id: format!("SIG-{}", short_hex()),
            symbol: symbol.into(),
            timeframe,
            signal_type,
            confidence: 0.0,
            entry_price,
            stop_loss,
            take_profit,
            volume: Decimal::ZERO,
            connector_type,
            market_type: String::new(),
            account_id: String::new(),
            account_type: AccountType::Demo,
            status: SignalStatus::Pending,
            rejection_reason: None,
            order_id: None,
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }
}

/// Generate an 8-hex-char suffix for correlation tokens, e.g. `GOV-a1b2c3d4`.
pub fn short_hex() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
    Manual,
    Expired,
    BrokerClosed,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::TakeProfit => "TAKE_PROFIT",
            ExitReason::StopLoss => "STOP_LOSS",
            ExitReason::Manual => "MANUAL",
            ExitReason::Expired => "EXPIRED",
            ExitReason::BrokerClosed => "BROKER_CLOSED",
        }
    }
}

/// Trade result (spec §3), owned by the feedback loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeResult {
    pub id: Uuid,
    pub signal_id: Uuid,
    pub symbol: String,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub profit_loss: Decimal,
    pub pips: Decimal,
    pub is_win: bool,
    pub exit_reason: ExitReason,
    pub duration_minutes: i64,
    pub market_regime: MarketRegime,
    pub parameters_used: serde_json::Value,
}

/// Position metadata, keyed by broker ticket (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionMetadata {
    pub ticket: String,
    pub symbol: String,
    pub entry_price: Decimal,
    pub entry_time: DateTime<Utc>,
    pub sl: Decimal,
    pub tp: Decimal,
    pub volume: Decimal,
    pub initial_risk_usd: Decimal,
    pub entry_regime: MarketRegime,
    pub timeframe: Timeframe,
    pub modification_count: i32,
    pub last_modification_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssetCategory {
    Forex,
    Crypto,
    Index,
    Metal,
    Commodity,
}

/// Asset profile (spec §3). Absence for a symbol is a hard abort for sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetProfile {
    pub symbol: String,
    pub contract_size: Decimal,
    pub lot_step: Decimal,
    pub lot_min: Decimal,
    pub lot_max: Decimal,
    pub digits: u32,
    pub pip_size: Decimal,
    pub category: AssetCategory,
    pub subcategory: String,
    pub enabled: bool,
    pub min_score: f64,
    pub risk_multiplier: Decimal,
}

/// Dynamic parameters (spec §3), the tuner's output and the risk/strategy
/// layers' input — all routed through Storage, never held as cross-references
/// (spec §9's "no cyclic graphs" note).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DynamicParameters {
    pub risk_per_trade: Decimal,
    pub max_consecutive_losses: u32,
    pub max_account_risk_pct: Decimal,
    pub max_r_per_trade: Decimal,
    pub confluence_weights: HashMap<String, f64>,
    pub tuning_enabled: bool,
    pub min_trades_for_tuning: u32,
    pub target_win_rate: f64,
    pub extra: serde_json::Value,
}

impl Default for DynamicParameters {
    fn default() -> Self {
        let mut confluence_weights = HashMap::new();
        confluence_weights.insert("M15".to_string(), 15.0);
        confluence_weights.insert("H1".to_string(), 20.0);
        confluence_weights.insert("H4".to_string(), 15.0);
        confluence_weights.insert("D1".to_string(), 10.0);

        Self {
            risk_per_trade: Decimal::new(1, 2),       // 0.01
            max_consecutive_losses: 3,
            max_account_risk_pct: Decimal::new(6, 2),  // 0.06
            max_r_per_trade: Decimal::new(2, 0),        // 2.0
            confluence_weights,
            tuning_enabled: true,
            min_trades_for_tuning: 20,
            target_win_rate: 0.5,
            extra: serde_json::json!({}),
        }
    }
}

/// System state key-value entries (spec §3), owned jointly by Orchestrator
/// and Risk Governor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemState {
    pub lockdown_mode: bool,
    pub lockdown_date: Option<DateTime<Utc>>,
    pub lockdown_balance: Option<Decimal>,
    pub consecutive_losses: u32,
    pub session_stats: SessionStats,
    pub modules_enabled: HashMap<String, bool>,
}

impl Default for SystemState {
    fn default() -> Self {
        Self {
            lockdown_mode: false,
            lockdown_date: None,
            lockdown_balance: None,
            consecutive_losses: 0,
            session_stats: SessionStats::default(),
            modules_enabled: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    pub date: chrono::NaiveDate,
    pub signals_processed: u64,
    pub signals_executed: u64,
    pub cycles_completed: u64,
    pub errors_count: u64,
}

impl Default for SessionStats {
    fn default() -> Self {
        Self {
            date: Utc::now().date_naive(),
            signals_processed: 0,
            signals_executed: 0,
            cycles_completed: 0,
            errors_count: 0,
        }
    }
}

/// Coherence event (spec §3), owned by the coherence monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoherenceEvent {
    pub signal_id: Option<Uuid>,
    pub symbol: String,
    pub stage: String,
    pub status: String,
    pub reason: String,
    pub incoherence_type: Option<String>,
    pub details: Option<String>,
    pub connector_type: Option<ConnectorType>,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legal_transitions_only() {
        assert!(SignalStatus::Pending.can_transition_to(SignalStatus::Executed));
        assert!(SignalStatus::Pending.can_transition_to(SignalStatus::Rejected));
        assert!(SignalStatus::Pending.can_transition_to(SignalStatus::Expired));
        assert!(SignalStatus::Executed.can_transition_to(SignalStatus::Closed));

        assert!(!SignalStatus::Executed.can_transition_to(SignalStatus::Pending));
        assert!(!SignalStatus::Rejected.can_transition_to(SignalStatus::Executed));
        assert!(!SignalStatus::Closed.can_transition_to(SignalStatus::Executed));
    }

    #[test]
    fn dedup_windows_match_spec_table() {
        assert_eq!(Timeframe::M5.dedup_window_minutes(), 20);
        assert_eq!(Timeframe::M15.dedup_window_minutes(), 60);
        assert_eq!(Timeframe::H1.dedup_window_minutes(), 240);
        assert_eq!(Timeframe::H4.dedup_window_minutes(), 480);
        assert_eq!(Timeframe::D1.dedup_window_minutes(), 1440);
    }

    #[test]
    fn expiration_windows_match_spec_table() {
        assert_eq!(Timeframe::M5.expiration_minutes(), 5);
        assert_eq!(Timeframe::M15.expiration_minutes(), 15);
        assert_eq!(Timeframe::M30.expiration_minutes(), 30);
        assert_eq!(Timeframe::H1.expiration_minutes(), 60);
        assert_eq!(Timeframe::H4.expiration_minutes(), 240);
        assert_eq!(Timeframe::D1.expiration_minutes(), 1440);
    }

    #[test]
    fn short_hex_is_eight_chars() {
        let h = short_hex();
        assert_eq!(h.len(), 8);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn timeframe_roundtrips_through_str() {
        for tf in [
            Timeframe::M1,
            Timeframe::M5,
            Timeframe::M15,
            Timeframe::M30,
            Timeframe::H1,
            Timeframe::H4,
            Timeframe::D1,
        ] {
            assert_eq!(Timeframe::from_str_opt(tf.as_str()), Some(tf));
        }
    }
}
