use aethelgard_core::AethelgardError;
use aethelgard_storage::Storage;

const WIN_RATE_MARGIN: f64 = 0.05;
const WIN_RATE_LOOKBACK_DAYS: i64 = 30;
const CONFLUENCE_STEP: f64 = 0.9;
const ADX_STEP: f64 = 2.0;
const ATR_MULT_STEP: f64 = 0.1;
const PROXIMITY_STEP: f64 = 0.9;
const MIN_SCORE_STEP: f64 = 2.0;

const DEFAULT_ADX_THRESHOLD: f64 = 20.0;
const DEFAULT_ATR_MULTIPLIER: f64 = 1.5;
const DEFAULT_PROXIMITY_PCT: f64 = 0.5;
const DEFAULT_MIN_SCORE: f64 = 60.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TuningDirection {
    Conservative,
    Relaxed,
}

#[derive(Debug, Clone)]
pub struct TuningAdjustment {
    pub direction: TuningDirection,
    pub win_rate: f64,
    pub target_win_rate: f64,
    pub trigger_reason: String,
    pub patch: serde_json::Value,
}

/// Tuner (spec §4.6): win-rate-driven adjustment of strategy strictness.
/// Knobs not modeled as first-class `DynamicParameters` fields (ADX
/// threshold, ATR multiplier, proximity tolerance, minimum score) live in
/// `DynamicParameters.extra` — the struct's designated escape hatch.
pub struct Tuner {
    storage: Storage,
}

impl Tuner {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    /// Runs the tuning pass if enabled and enough trades have accumulated.
    /// Returns `None` when tuning is off, there isn't enough data yet, or
    /// the current win rate is already within the target margin.
    pub async fn maybe_tune(&self) -> Result<Option<TuningAdjustment>, AethelgardError> {
        let params = self.storage.get_dynamic_params().await?;
        if !params.tuning_enabled {
            return Ok(None);
        }

        let recent_trades = self
            .storage
            .get_recent_trades(params.min_trades_for_tuning as i64)
            .await?;
        if (recent_trades.len() as u32) < params.min_trades_for_tuning {
            return Ok(None);
        }

        let win_rate = self.storage.get_win_rate(WIN_RATE_LOOKBACK_DAYS).await?;
        let target = params.target_win_rate;

        let direction = if win_rate < target - WIN_RATE_MARGIN {
            TuningDirection::Conservative
        } else if win_rate > target + WIN_RATE_MARGIN {
            TuningDirection::Relaxed
        } else {
            return Ok(None);
        };

        let mut extra = params.extra.clone();
        let obj = extra
            .as_object_mut()
            .expect("DynamicParameters.extra is always a JSON object");

        let adx = obj.get("adx_threshold").and_then(|v| v.as_f64()).unwrap_or(DEFAULT_ADX_THRESHOLD);
        let atr_mult = obj.get("atr_multiplier").and_then(|v| v.as_f64()).unwrap_or(DEFAULT_ATR_MULTIPLIER);
        let proximity = obj.get("proximity_pct").and_then(|v| v.as_f64()).unwrap_or(DEFAULT_PROXIMITY_PCT);
        let min_score = obj.get("min_score").and_then(|v| v.as_f64()).unwrap_or(DEFAULT_MIN_SCORE);

        let (new_adx, new_atr_mult, new_proximity, new_min_score, confluence_factor) = match direction {
            TuningDirection::Conservative => (
                adx + ADX_STEP,
                atr_mult + ATR_MULT_STEP,
                (proximity * PROXIMITY_STEP).max(0.05),
                (min_score + MIN_SCORE_STEP).min(100.0),
                CONFLUENCE_STEP,
            ),
            TuningDirection::Relaxed => (
                (adx - ADX_STEP).max(5.0),
                (atr_mult - ATR_MULT_STEP).max(0.5),
                proximity / PROXIMITY_STEP,
                (min_score - MIN_SCORE_STEP).max(0.0),
                1.0 / CONFLUENCE_STEP,
            ),
        };

        obj.insert("adx_threshold".to_string(), serde_json::json!(new_adx));
        obj.insert("atr_multiplier".to_string(), serde_json::json!(new_atr_mult));
        obj.insert("proximity_pct".to_string(), serde_json::json!(new_proximity));
        obj.insert("min_score".to_string(), serde_json::json!(new_min_score));

        let mut confluence_weights = params.confluence_weights.clone();
        for weight in confluence_weights.values_mut() {
            *weight *= confluence_factor;
        }

        let trigger_reason = format!(
            "win_rate={win_rate:.3} vs target={target:.3}±{WIN_RATE_MARGIN:.2} over {} trades",
            recent_trades.len()
        );

        let patch = serde_json::json!({
            "extra": extra,
            "confluence_weights": confluence_weights,
        });

        self.storage.update_dynamic_params(patch.clone()).await?;

        tracing::info!(
            direction = ?direction,
            win_rate,
            target,
            "{trigger_reason}"
        );

        Ok(Some(TuningAdjustment {
            direction,
            win_rate,
            target_win_rate: target,
            trigger_reason,
            patch,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aethelgard_core::{ExitReason, MarketRegime, TradeResult};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    async fn seed_trades(storage: &Storage, count: usize, is_win: bool) {
        for _ in 0..count {
            let trade = TradeResult {
                id: Uuid::new_v4(),
                signal_id: Uuid::new_v4(),
                symbol: "EURUSD".to_string(),
                entry_price: dec!(1.1000),
                exit_price: if is_win { dec!(1.1050) } else { dec!(1.0950) },
                profit_loss: if is_win { dec!(50) } else { dec!(-50) },
                pips: dec!(50),
                is_win,
                exit_reason: ExitReason::TakeProfit,
                duration_minutes: 60,
                market_regime: MarketRegime::Trend,
                parameters_used: serde_json::json!({}),
            };
            storage.save_trade_result(&trade).await.unwrap();
        }
    }

    #[tokio::test]
    async fn low_win_rate_tightens_parameters() {
        let storage = Storage::connect("sqlite::memory:").await.unwrap();
        storage
            .update_dynamic_params(serde_json::json!({ "min_trades_for_tuning": 5 }))
            .await
            .unwrap();
        seed_trades(&storage, 2, true).await;
        seed_trades(&storage, 8, false).await;

        let tuner = Tuner::new(storage.clone());
        let adjustment = tuner.maybe_tune().await.unwrap();

        let adjustment = adjustment.expect("low win rate should trigger tuning");
        assert_eq!(adjustment.direction, TuningDirection::Conservative);

        let params = storage.get_dynamic_params().await.unwrap();
        let extra = params.extra.as_object().unwrap();
        assert!(extra["adx_threshold"].as_f64().unwrap() > DEFAULT_ADX_THRESHOLD);
    }

    #[tokio::test]
    async fn disabled_tuning_is_a_noop() {
        let storage = Storage::connect("sqlite::memory:").await.unwrap();
        storage
            .update_dynamic_params(serde_json::json!({ "tuning_enabled": false, "min_trades_for_tuning": 1 }))
            .await
            .unwrap();
        seed_trades(&storage, 5, false).await;

        let tuner = Tuner::new(storage);
        assert!(tuner.maybe_tune().await.unwrap().is_none());
    }
}
