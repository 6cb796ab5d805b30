use aethelgard_core::{MarketRegime, Timeframe};
use std::collections::HashMap;

/// Additive confluence bonus (spec §4.3/§4.4; DESIGN.md Open Question #1):
/// `adjusted = clamp(base_score + bonus, 0, 100)`, never multiplicative.
///
/// For each higher-timeframe regime, a trending regime (Trend/Bull/Bear)
/// contributes its full configured weight, a choppy one (Range/Volatile)
/// contributes a penalty of half that weight, and Shock/Crash/Normal are
/// neutral. Disabled mode (empty weights map) is a pass-through.
pub fn apply_confluence(
    base_score: f64,
    htf_regimes: &HashMap<Timeframe, MarketRegime>,
    weights: &HashMap<String, f64>,
) -> (f64, serde_json::Value) {
    if weights.is_empty() || htf_regimes.is_empty() {
        return (
            base_score,
            serde_json::json!({ "mode": "disabled", "bonus": 0.0, "breakdown": {} }),
        );
    }

    let mut bonus = 0.0;
    let mut breakdown = serde_json::Map::new();

    for (tf, regime) in htf_regimes {
        let weight = match weights.get(tf.as_str()) {
            Some(w) => *w,
            None => continue,
        };
        let contribution = match regime {
            MarketRegime::Trend | MarketRegime::Bull | MarketRegime::Bear => weight,
            MarketRegime::Range | MarketRegime::Volatile => -weight / 2.0,
            MarketRegime::Shock | MarketRegime::Crash | MarketRegime::Normal => 0.0,
        };
        bonus += contribution;
        breakdown.insert(
            tf.as_str().to_string(),
            serde_json::json!({ "regime": regime.as_str(), "weight": weight, "contribution": contribution }),
        );
    }

    let adjusted = (base_score + bonus).clamp(0.0, 100.0);
    (
        adjusted,
        serde_json::json!({ "mode": "additive", "base_score": base_score, "bonus": bonus, "breakdown": breakdown }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trending_higher_timeframes_add_bonus() {
        let mut weights = HashMap::new();
        weights.insert("H1".to_string(), 20.0);
        weights.insert("H4".to_string(), 15.0);

        let mut regimes = HashMap::new();
        regimes.insert(Timeframe::H1, MarketRegime::Trend);
        regimes.insert(Timeframe::H4, MarketRegime::Bull);

        let (adjusted, breakdown) = apply_confluence(50.0, &regimes, &weights);
        assert_eq!(adjusted, 85.0);
        assert_eq!(breakdown["mode"], "additive");
    }

    #[test]
    fn choppy_higher_timeframes_penalize() {
        let mut weights = HashMap::new();
        weights.insert("H1".to_string(), 20.0);

        let mut regimes = HashMap::new();
        regimes.insert(Timeframe::H1, MarketRegime::Range);

        let (adjusted, _) = apply_confluence(50.0, &regimes, &weights);
        assert_eq!(adjusted, 40.0);
    }

    #[test]
    fn score_never_exceeds_bounds() {
        let mut weights = HashMap::new();
        weights.insert("H1".to_string(), 80.0);
        let mut regimes = HashMap::new();
        regimes.insert(Timeframe::H1, MarketRegime::Trend);

        let (adjusted, _) = apply_confluence(90.0, &regimes, &weights);
        assert_eq!(adjusted, 100.0);
    }

    #[test]
    fn disabled_mode_is_pass_through() {
        let (adjusted, breakdown) = apply_confluence(62.0, &HashMap::new(), &HashMap::new());
        assert_eq!(adjusted, 62.0);
        assert_eq!(breakdown["mode"], "disabled");
    }
}
