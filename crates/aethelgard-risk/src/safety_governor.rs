use crate::models::RejectionAudit;
use rust_decimal::Decimal;

/// Safety Governor R-unit veto (spec §4.4): `R = |entry - stop_loss| *
/// contract_size / account_balance * 100`, Decimal throughout. A zero/missing
/// stop_loss is skipped gracefully rather than blocking the trade. Returns
/// `None` when the trade passes, `Some(audit)` when it's vetoed.
pub fn check_r_unit(
    symbol: &str,
    entry: Decimal,
    stop_loss: Decimal,
    contract_size: Decimal,
    account_balance: Decimal,
    max_r_per_trade: Decimal,
) -> Option<RejectionAudit> {
    if stop_loss.is_zero() || account_balance.is_zero() {
        return None;
    }

    let r = (entry - stop_loss).abs() * contract_size / account_balance * Decimal::from(100);

    if r > max_r_per_trade {
        Some(RejectionAudit::new(
            symbol,
            r,
            max_r_per_trade,
            format!("SAFETY_GOV: R={r} exceeds max_r_per_trade={max_r_per_trade}"),
        ))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn passes_within_limit() {
        let audit = check_r_unit("EURUSD", dec!(1.1000), dec!(1.0950), dec!(100000), dec!(10000), dec!(2.0));
        assert!(audit.is_none());
    }

    #[test]
    fn boundary_equal_passes() {
        // R = 0.0050 * 100000 / 10000 * 100 = 5.0
        let audit = check_r_unit("EURUSD", dec!(1.1000), dec!(1.0950), dec!(100000), dec!(10000), dec!(5.0));
        assert!(audit.is_none());
    }

    #[test]
    fn vetoes_when_r_exceeds_limit() {
        // R = 0.0250 * 100000 / 10000 * 100 = 25.0 > 2.0
        let audit = check_r_unit("EURUSD", dec!(1.1000), dec!(1.0750), dec!(100000), dec!(10000), dec!(2.0));
        let audit = audit.expect("should veto");
        assert!(audit.trace_id.starts_with("GOV-"));
        assert!(audit.reason.contains("SAFETY_GOV"));
    }

    #[test]
    fn missing_stop_loss_skips_gracefully() {
        let audit = check_r_unit("EURUSD", dec!(1.1000), Decimal::ZERO, dec!(100000), dec!(10000), dec!(2.0));
        assert!(audit.is_none());
    }
}
