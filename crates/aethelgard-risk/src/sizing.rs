use crate::models::SizingResult;
use aethelgard_broker_trait::BrokerClient;
use aethelgard_core::{AethelgardError, AssetProfile, MarketRegime, Signal};
use aethelgard_storage::Storage;
use rust_decimal::prelude::*;
use rust_decimal::Decimal;

fn db_err(e: anyhow::Error) -> AethelgardError {
    AethelgardError::Connector(e.to_string())
}

fn floor_to_step(value: Decimal, step: Decimal) -> Decimal {
    if step.is_zero() {
        return value;
    }
    (value / step).floor() * step
}

fn clamp(value: Decimal, min: Decimal, max: Decimal) -> Decimal {
    value.max(min).min(max)
}

/// `calculate_position_size` (spec §4.4): Decimal arithmetic, ROUND_DOWN to
/// `lot_step`, clamp to `[lot_min, lot_max]`. The asset profile is the only
/// input — callers that already know `risk_amount_usd` and `sl_distance`
/// (e.g. a strategy backtest harness) use this directly instead of the full
/// master algorithm.
pub fn calculate_position_size(
    asset: &AssetProfile,
    risk_amount_usd: Decimal,
    sl_distance: Decimal,
) -> Result<Decimal, AethelgardError> {
    if sl_distance <= Decimal::ZERO {
        return Err(AethelgardError::Validation(
            "sl_distance must be positive".to_string(),
        ));
    }

    let raw_lots = risk_amount_usd / (sl_distance * asset.contract_size);
    let normalized = floor_to_step(raw_lots, asset.lot_step);
    Ok(clamp(normalized, asset.lot_min, asset.lot_max))
}

/// Converts one pip of movement, for one lot of `symbol`, into USD. Pairs
/// quoted directly in USD need no conversion; cross pairs triangulate
/// through a USD pair on the quote currency (spec example: GBPJPY uses
/// USDJPY), falling back to the unconverted pip value if no quote is
/// available from the connector.
async fn pip_value_usd(
    symbol: &str,
    asset: &AssetProfile,
    connector: &dyn BrokerClient,
) -> Decimal {
    let unconverted = asset.pip_size * asset.contract_size;

    let quote_ccy = if symbol.len() >= 6 { &symbol[3..6] } else { "" };
    if quote_ccy.is_empty() || quote_ccy == "USD" {
        return unconverted;
    }

    if let Ok(Some(info)) = connector.get_symbol_info(&format!("{quote_ccy}USD")).await {
        if !info.bid.is_zero() {
            return unconverted * info.bid;
        }
    }
    if let Ok(Some(info)) = connector.get_symbol_info(&format!("USD{quote_ccy}")).await {
        if !info.bid.is_zero() {
            return unconverted / info.bid;
        }
    }

    unconverted
}

/// `calculate_position_size_master` (spec §4.4): single source of truth for
/// sizing. Reads balance, symbol info, triangulated pip value, applies the
/// regime volatility multiplier, computes target risk, derives raw lots,
/// normalizes against both the asset profile and the connector's live
/// volume limits, and runs the final sanity check (realized risk within
/// `[0.7, 1.1] * target`, and `<= 3%` of account in absolute terms).
pub async fn calculate_position_size_master(
    storage: &Storage,
    signal: &Signal,
    connector: &dyn BrokerClient,
    regime: MarketRegime,
) -> Result<SizingResult, AethelgardError> {
    let balance = connector.get_account_balance().await.map_err(db_err)?;

    let symbol_info = connector
        .get_symbol_info(&signal.symbol)
        .await
        .map_err(db_err)?
        .ok_or_else(|| AethelgardError::Connector(format!("no symbol info for {}", signal.symbol)))?;

    let asset = storage
        .get_asset_profile(&signal.symbol, &signal.trace_id)
        .await?
        .ok_or_else(|| AethelgardError::AssetNotNormalized(signal.symbol.clone()))?;

    let params = storage.get_dynamic_params().await?;
    let multiplier = regime.sizing_volatility_multiplier();
    let risk_usd_target = balance * params.risk_per_trade * multiplier;

    let sl_pips = (signal.entry_price - signal.stop_loss).abs() / asset.pip_size;
    if sl_pips.is_zero() {
        return Err(AethelgardError::Validation(
            "stop_loss distance is zero".to_string(),
        ));
    }

    let point_value = pip_value_usd(&signal.symbol, &asset, connector).await;

    let raw_lots = risk_usd_target / (sl_pips * point_value);

    let lot_step = asset.lot_step.max(symbol_info.volume_step);
    let lot_min = asset.lot_min.max(symbol_info.volume_min);
    let lot_max = asset.lot_max.min(symbol_info.volume_max);
    let lots = clamp(floor_to_step(raw_lots, lot_step), lot_min, lot_max);

    let risk_usd_realized = lots * sl_pips * point_value;

    let upper_bound = risk_usd_target * Decimal::new(11, 1); // 1.1x
    let lower_bound = risk_usd_target * Decimal::new(7, 1); // 0.7x
    let absolute_cap = balance * Decimal::new(3, 2); // 3%

    if risk_usd_realized > upper_bound || risk_usd_realized < lower_bound {
        return Err(AethelgardError::PolicyRejection {
            reason: format!(
                "sizing sanity check failed: realized risk {risk_usd_realized} outside [{lower_bound}, {upper_bound}]"
            ),
            trace_id: format!("GOV-{}", aethelgard_core::short_hex()),
        });
    }
    if risk_usd_realized > absolute_cap {
        return Err(AethelgardError::PolicyRejection {
            reason: format!(
                "sizing sanity check failed: realized risk {risk_usd_realized} exceeds 3% of balance ({absolute_cap})"
            ),
            trace_id: format!("GOV-{}", aethelgard_core::short_hex()),
        });
    }

    Ok(SizingResult {
        lots,
        risk_usd_target,
        risk_usd_realized,
        sl_pips,
        point_value,
    })
}
