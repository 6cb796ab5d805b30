use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Record of a Safety Governor R-unit veto (spec §4.4). Persisted to the
/// audit trail via a coherence event so the reason survives past the
/// rejected signal's own metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectionAudit {
    pub trace_id: String,
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub r_calculated: Decimal,
    pub r_limit: Decimal,
    pub reason: String,
}

impl RejectionAudit {
    pub fn new(symbol: impl Into<String>, r_calculated: Decimal, r_limit: Decimal, reason: impl Into<String>) -> Self {
        Self {
            trace_id: format!("GOV-{}", aethelgard_core::short_hex()),
            timestamp: Utc::now(),
            symbol: symbol.into(),
            r_calculated,
            r_limit,
            reason: reason.into(),
        }
    }
}

/// Outcome of the position-size master algorithm's final sanity check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizingResult {
    pub lots: Decimal,
    pub risk_usd_target: Decimal,
    pub risk_usd_realized: Decimal,
    pub sl_pips: Decimal,
    pub point_value: Decimal,
}
