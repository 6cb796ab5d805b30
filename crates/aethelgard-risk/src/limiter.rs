use aethelgard_broker_trait::OpenPosition;
use aethelgard_core::{AethelgardError, SignalType};
use aethelgard_storage::Storage;
use rust_decimal::Decimal;

/// Account-risk cap check (spec §4.4 "account-risk caps"), grounded in the
/// teacher's multi-timeframe position limiter: sums `initial_risk_usd`
/// across every open position (via its persisted metadata) and vetoes a new
/// trade if adding it would push aggregate open risk past
/// `max_account_risk_pct` of the account balance.
pub async fn check_account_risk_caps(
    storage: &Storage,
    open_positions: &[OpenPosition],
    new_risk_usd: Decimal,
    balance: Decimal,
    max_account_risk_pct: Decimal,
) -> Result<Option<String>, AethelgardError> {
    let mut aggregate = new_risk_usd;
    for position in open_positions {
        if let Some(metadata) = storage.get_position_metadata(&position.ticket).await? {
            aggregate += metadata.initial_risk_usd;
        }
    }

    let cap = balance * max_account_risk_pct;
    if aggregate > cap {
        Ok(Some(format!(
            "account-risk cap exceeded: aggregate open risk {aggregate} > cap {cap}"
        )))
    } else {
        Ok(None)
    }
}

/// Hedge alert (spec §4.4, teacher's multi-timeframe limiter): a new signal
/// opposite in direction to an already-open position on the same symbol is
/// not vetoed but flagged, so the coherence monitor and dashboard can
/// surface unintentional hedging.
pub fn detect_hedge(open_positions: &[OpenPosition], symbol: &str, direction: SignalType) -> bool {
    let wanted = match direction {
        SignalType::Buy => "SELL",
        SignalType::Sell => "BUY",
        _ => return false,
    };
    open_positions
        .iter()
        .any(|p| p.symbol == symbol && p.position_type == wanted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn position(symbol: &str, position_type: &str) -> OpenPosition {
        OpenPosition {
            ticket: "1".to_string(),
            symbol: symbol.to_string(),
            position_type: position_type.to_string(),
            volume: dec!(0.1),
            price_open: dec!(1.1),
            sl: dec!(1.09),
            tp: dec!(1.12),
            profit: dec!(0),
            comment: String::new(),
        }
    }

    #[test]
    fn opposite_direction_same_symbol_is_a_hedge() {
        let positions = vec![position("EURUSD", "BUY")];
        assert!(detect_hedge(&positions, "EURUSD", SignalType::Sell));
        assert!(!detect_hedge(&positions, "EURUSD", SignalType::Buy));
        assert!(!detect_hedge(&positions, "GBPUSD", SignalType::Sell));
    }
}
