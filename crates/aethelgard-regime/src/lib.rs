use aethelgard_core::{Bar, MarketRegime};
use anyhow::Result;
use chrono::Utc;
use log::debug;
use serde::{Deserialize, Serialize};

/// Regime detection result with confidence, used by the Scanner (spec §4.3).
/// Classification is deterministic given the same frame: no network calls,
/// no randomness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeDetectionResult {
    pub regime: MarketRegime,
    pub confidence: f64,
    pub metrics: RegimeMetrics,
    pub detected_at: chrono::DateTime<Utc>,
    pub reasoning: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeMetrics {
    /// Average True Range as a percentage of price.
    pub atr_percent: f64,
    /// Trend strength (-1.0..1.0), via linear-regression slope normalized by
    /// average price; stands in for spec's "ADX-based" directional measure.
    pub trend_strength: f64,
    /// Standard deviation of bar-to-bar returns.
    pub volatility: f64,
    /// Net movement / total movement; how efficiently price travels.
    pub range_efficiency: f64,
    pub sample_size: usize,
}

/// Boundary values for regime classification. Defaults mirror the teacher's
/// hand-tuned constants; production deployments override via dynamic
/// parameters (spec §6 `scanner.*` keys) rather than recompiling.
#[derive(Debug, Clone, Copy)]
pub struct RegimeThresholds {
    pub shock_atr_percent: f64,
    pub volatile_atr_percent: f64,
    pub calm_atr_percent: f64,
    pub shock_volatility: f64,
    pub volatile_volatility: f64,
    pub calm_volatility: f64,
    pub trend_strength_threshold: f64,
    pub range_efficiency_threshold: f64,
}

impl Default for RegimeThresholds {
    fn default() -> Self {
        Self {
            shock_atr_percent: 6.0,
            volatile_atr_percent: 3.0,
            calm_atr_percent: 1.0,
            shock_volatility: 0.06,
            volatile_volatility: 0.03,
            calm_volatility: 0.01,
            trend_strength_threshold: 0.01,
            range_efficiency_threshold: 0.5,
        }
    }
}

/// Rule-based market regime classifier (spec §4.3). For a given (symbol,
/// timeframe) frame, scores every candidate regime and returns the highest.
pub struct MarketRegimeDetector {
    min_bars: usize,
    thresholds: RegimeThresholds,
}

impl MarketRegimeDetector {
    pub fn new() -> Self {
        Self {
            min_bars: 50,
            thresholds: RegimeThresholds::default(),
        }
    }

    pub fn with_thresholds(thresholds: RegimeThresholds) -> Self {
        Self {
            min_bars: 50,
            thresholds,
        }
    }

    /// Detect market regime for a frame. Missing/insufficient data never
    /// errors — it classifies as `Normal` with zero confidence, letting the
    /// caller decide whether to omit the pair for this cycle (spec §4.3:
    /// "Missing data -> pair is omitted from the cycle, not an error").
    pub fn detect_regime(&self, bars: &[Bar]) -> Result<RegimeDetectionResult> {
        if bars.len() < self.min_bars {
            return Ok(RegimeDetectionResult {
                regime: MarketRegime::Normal,
                confidence: 0.0,
                metrics: RegimeMetrics {
                    atr_percent: 0.0,
                    trend_strength: 0.0,
                    volatility: 0.0,
                    range_efficiency: 0.0,
                    sample_size: bars.len(),
                },
                detected_at: Utc::now(),
                reasoning: format!(
                    "insufficient data: {} bars (need {})",
                    bars.len(),
                    self.min_bars
                ),
            });
        }

        let metrics = self.calculate_metrics(bars);
        let (regime, confidence, reasoning) = self.classify_regime(&metrics);

        debug!(
            "regime classified: {} (confidence {:.2})",
            regime.as_str(),
            confidence
        );

        Ok(RegimeDetectionResult {
            regime,
            confidence,
            metrics,
            detected_at: Utc::now(),
            reasoning,
        })
    }

    fn calculate_metrics(&self, bars: &[Bar]) -> RegimeMetrics {
        RegimeMetrics {
            atr_percent: self.calculate_atr_percent(bars),
            trend_strength: self.calculate_trend_strength(bars),
            volatility: self.calculate_volatility(bars),
            range_efficiency: self.calculate_range_efficiency(bars),
            sample_size: bars.len(),
        }
    }

    fn calculate_atr_percent(&self, bars: &[Bar]) -> f64 {
        if bars.len() < 14 {
            return 0.0;
        }

        let mut true_ranges = Vec::new();
        for i in 1..bars.len() {
            let high = bars[i].high;
            let low = bars[i].low;
            let prev_close = bars[i - 1].close;
            let tr = (high - low)
                .max((high - prev_close).abs())
                .max((low - prev_close).abs());
            true_ranges.push(tr);
        }

        let recent_trs = &true_ranges[true_ranges.len().saturating_sub(14)..];
        let atr: f64 = recent_trs.iter().sum::<f64>() / recent_trs.len() as f64;
        let current_price = bars.last().unwrap().close;

        (atr / current_price) * 100.0
    }

    fn calculate_trend_strength(&self, bars: &[Bar]) -> f64 {
        if bars.len() < 20 {
            return 0.0;
        }

        let recent_bars = &bars[bars.len() - 20..];
        let sum_x: f64 = (0..20).sum::<usize>() as f64;
        let sum_y: f64 = recent_bars.iter().map(|b| b.close).sum();
        let sum_xy: f64 = recent_bars
            .iter()
            .enumerate()
            .map(|(i, b)| i as f64 * b.close)
            .sum();
        let sum_x2: f64 = (0..20).map(|i| (i * i) as f64).sum();

        let slope = (20.0 * sum_xy - sum_x * sum_y) / (20.0 * sum_x2 - sum_x * sum_x);
        let avg_price: f64 = sum_y / 20.0;

        slope / avg_price
    }

    fn calculate_volatility(&self, bars: &[Bar]) -> f64 {
        if bars.len() < 2 {
            return 0.0;
        }

        let returns: Vec<f64> = bars
            .windows(2)
            .map(|w| (w[1].close - w[0].close) / w[0].close)
            .collect();

        let mean = returns.iter().sum::<f64>() / returns.len() as f64;
        let variance =
            returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / returns.len() as f64;

        variance.sqrt()
    }

    fn calculate_range_efficiency(&self, bars: &[Bar]) -> f64 {
        if bars.len() < 2 {
            return 0.0;
        }

        let first_price = bars.first().unwrap().close;
        let last_price = bars.last().unwrap().close;
        let net_movement = (last_price - first_price).abs();

        let total_movement: f64 = bars
            .windows(2)
            .map(|w| (w[1].close - w[0].close).abs())
            .sum();

        if total_movement == 0.0 {
            return 0.0;
        }

        net_movement / total_movement
    }

    /// Score every candidate regime and pick the highest. Shock/Crash take
    /// priority over Trend/Range since extreme moves should never be
    /// misread as an orderly trend.
    fn classify_regime(&self, metrics: &RegimeMetrics) -> (MarketRegime, f64, String) {
        let t = &self.thresholds;
        let mut scores = vec![
            (MarketRegime::Shock, 0.0),
            (MarketRegime::Crash, 0.0),
            (MarketRegime::Bull, 0.0),
            (MarketRegime::Bear, 0.0),
            (MarketRegime::Trend, 0.0),
            (MarketRegime::Range, 0.0),
            (MarketRegime::Volatile, 0.0),
            (MarketRegime::Normal, 0.0),
        ];

        if metrics.atr_percent > t.shock_atr_percent || metrics.volatility > t.shock_volatility {
            scores[0].1 += 50.0; // Shock
            if metrics.trend_strength < -t.trend_strength_threshold {
                scores[1].1 += 40.0; // Crash: shock + sharp down move
            }
        }

        if metrics.volatility > t.volatile_volatility || metrics.atr_percent > t.volatile_atr_percent
        {
            scores[6].1 += 40.0; // Volatile
        }

        if metrics.trend_strength > t.trend_strength_threshold
            && metrics.range_efficiency > t.range_efficiency_threshold
        {
            scores[2].1 += 30.0; // Bull
            scores[4].1 += 50.0; // Trend
        }

        if metrics.trend_strength < -t.trend_strength_threshold
            && metrics.range_efficiency > t.range_efficiency_threshold
        {
            scores[3].1 += 30.0; // Bear
            scores[4].1 += 50.0; // Trend
        }

        if metrics.range_efficiency < 0.3 && metrics.volatility < t.volatile_volatility {
            scores[5].1 += 40.0; // Range
        }

        if metrics.atr_percent < t.calm_atr_percent && metrics.volatility < t.calm_volatility {
            scores[7].1 += 25.0; // Normal
        }

        scores.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());
        let (regime, score) = scores[0];
        let confidence = if score > 0.0 { f64::min(score / 100.0, 1.0) } else { 0.3 };
        let regime = if score > 0.0 { regime } else { MarketRegime::Normal };

        let reasoning = format!(
            "{} (trend: {:.3}, volatility: {:.2}%, efficiency: {:.2}, ATR: {:.2}%)",
            regime.as_str(),
            metrics.trend_strength,
            metrics.volatility * 100.0,
            metrics.range_efficiency,
            metrics.atr_percent
        );

        (regime, confidence, reasoning)
    }
}

impl Default for MarketRegimeDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn create_test_bars(count: usize, trend: f64) -> Vec<Bar> {
        (0..count)
            .map(|i| {
                let base_price = 100.0 + (i as f64 * trend);
                Bar {
                    timestamp: Utc::now(),
                    open: base_price,
                    high: base_price + 1.0,
                    low: base_price - 1.0,
                    close: base_price,
                    volume: 1000.0,
                }
            })
            .collect()
    }

    #[test]
    fn uptrend_classifies_as_bull_or_trend() {
        let detector = MarketRegimeDetector::new();
        let bars = create_test_bars(100, 0.5);

        let result = detector.detect_regime(&bars).unwrap();

        assert!(matches!(
            result.regime,
            MarketRegime::Bull | MarketRegime::Trend
        ));
        assert!(result.metrics.trend_strength > 0.0);
    }

    #[test]
    fn downtrend_classifies_as_bear_or_trend() {
        let detector = MarketRegimeDetector::new();
        let bars = create_test_bars(100, -0.5);

        let result = detector.detect_regime(&bars).unwrap();

        assert!(matches!(
            result.regime,
            MarketRegime::Bear | MarketRegime::Trend
        ));
        assert!(result.metrics.trend_strength < 0.0);
    }

    #[test]
    fn insufficient_data_is_normal_not_an_error() {
        let detector = MarketRegimeDetector::new();
        let bars = create_test_bars(10, 0.0);

        let result = detector.detect_regime(&bars).unwrap();

        assert_eq!(result.regime, MarketRegime::Normal);
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn classification_is_deterministic() {
        let detector = MarketRegimeDetector::new();
        let bars = create_test_bars(80, 0.2);

        let first = detector.detect_regime(&bars).unwrap();
        let second = detector.detect_regime(&bars).unwrap();

        assert_eq!(first.regime, second.regime);
        assert!((first.confidence - second.confidence).abs() < f64::EPSILON);
    }
}
