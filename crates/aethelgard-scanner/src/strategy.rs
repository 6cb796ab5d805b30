use aethelgard_core::{Bar, MarketRegime, SignalType};
use rust_decimal::Decimal;

/// A candidate trade produced by a `Strategy`. The Signal Factory turns this
/// into a full `aethelgard_core::Signal` after dedup and confluence.
#[derive(Debug, Clone)]
pub struct StrategySignal {
    pub signal_type: SignalType,
    pub entry_price: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    /// Raw confidence in `[0, 1]`.
    pub confidence: f64,
}

/// Plugin-style strategy interface (spec §4.3/§9): pure with respect to the
/// frame it is given — no I/O, no storage access, no randomness. Registered
/// at composition time, dispatched to in parallel by the Signal Factory.
pub trait Strategy: Send + Sync {
    fn id(&self) -> &str;
    fn analyze(&self, symbol: &str, bars: &[Bar], regime: MarketRegime) -> Option<StrategySignal>;
}
