use crate::provider::ProviderManager;
use aethelgard_core::{Bar, MarketRegime, Timeframe};
use aethelgard_regime::MarketRegimeDetector;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Controls how many configured symbols are polled per cycle (spec §4.3).
/// Timeframes polled per symbol are unaffected; only the symbol count is
/// scaled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    Eco,
    Standard,
    Aggressive,
}

impl ScanMode {
    fn symbol_cap(&self) -> usize {
        match self {
            ScanMode::Eco => 5,
            ScanMode::Standard => 15,
            ScanMode::Aggressive => usize::MAX,
        }
    }
}

/// One scanned (symbol, timeframe) pair, regime-stamped.
#[derive(Debug, Clone)]
pub struct ScanEntry {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub regime: MarketRegime,
    pub confidence: f64,
    pub bars: Vec<Bar>,
}

pub type ScanResult = HashMap<(String, Timeframe), ScanEntry>;

/// Scanner (spec §4.3): fetches OHLC for every configured (symbol,
/// timeframe) pair and stamps a regime on each. Pairs with no data available
/// from any provider are silently omitted — never an error (spec: "Missing
/// data -> pair is omitted from the cycle").
pub struct Scanner {
    pairs: Vec<(String, Timeframe)>,
    mode: ScanMode,
    candle_count: usize,
    provider: Arc<ProviderManager>,
    detector: MarketRegimeDetector,
    concurrency: usize,
}

impl Scanner {
    pub fn new(
        pairs: Vec<(String, Timeframe)>,
        mode: ScanMode,
        provider: ProviderManager,
        detector: MarketRegimeDetector,
    ) -> Self {
        Self {
            pairs,
            mode,
            candle_count: 250,
            provider: Arc::new(provider),
            detector,
            concurrency: 12,
        }
    }

    pub fn with_candle_count(mut self, count: usize) -> Self {
        self.candle_count = count;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Runs one scan cycle: fetches the mode-limited subset of configured
    /// pairs concurrently (bounded by a semaphore, spec §5 "typical 8-16"),
    /// classifies each frame's regime, and returns only the pairs that had
    /// data.
    pub async fn scan(&self) -> ScanResult {
        let symbol_cap = self.mode.symbol_cap();
        let mut symbols_seen = Vec::new();
        let mut pairs = Vec::new();
        for (symbol, timeframe) in &self.pairs {
            if !symbols_seen.contains(symbol) {
                if symbols_seen.len() >= symbol_cap {
                    continue;
                }
                symbols_seen.push(symbol.clone());
            }
            pairs.push((symbol.clone(), *timeframe));
        }

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut set = tokio::task::JoinSet::new();

        for (symbol, timeframe) in pairs {
            let semaphore = semaphore.clone();
            let provider = self.provider.clone();
            let candle_count = self.candle_count;
            set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
                let bars = provider.fetch_ohlc(&symbol, timeframe, candle_count).await;
                (symbol, timeframe, bars)
            });
        }

        let mut result = ScanResult::new();
        while let Some(joined) = set.join_next().await {
            let Ok((symbol, timeframe, bars)) = joined else { continue };
            let Some(bars) = bars else { continue };

            let detection = match self.detector.detect_regime(&bars) {
                Ok(d) => d,
                Err(e) => {
                    tracing::warn!(symbol, "regime detection failed: {e}");
                    continue;
                }
            };

            result.insert(
                (symbol.clone(), timeframe),
                ScanEntry {
                    symbol,
                    timeframe,
                    regime: detection.regime,
                    confidence: detection.confidence,
                    bars,
                },
            );
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MarketDataProvider;
    use async_trait::async_trait;

    struct FixedBars;
    #[async_trait]
    impl MarketDataProvider for FixedBars {
        async fn fetch_ohlc(
            &self,
            symbol: &str,
            _timeframe: Timeframe,
            _count: usize,
        ) -> anyhow::Result<Option<Vec<Bar>>> {
            if symbol == "NODATA" {
                return Ok(None);
            }
            let bars = (0..60)
                .map(|i| Bar {
                    timestamp: chrono::Utc::now(),
                    open: 1.1 + i as f64 * 0.0001,
                    high: 1.1 + i as f64 * 0.0001 + 0.0005,
                    low: 1.1 + i as f64 * 0.0001 - 0.0005,
                    close: 1.1 + i as f64 * 0.0001,
                    volume: 100.0,
                })
                .collect();
            Ok(Some(bars))
        }
        fn name(&self) -> &str {
            "fixed"
        }
    }

    #[tokio::test]
    async fn missing_data_pairs_are_omitted_not_errored() {
        let pairs = vec![
            ("EURUSD".to_string(), Timeframe::H1),
            ("NODATA".to_string(), Timeframe::H1),
        ];
        let scanner = Scanner::new(
            pairs,
            ScanMode::Aggressive,
            ProviderManager::new(vec![Arc::new(FixedBars)]),
            MarketRegimeDetector::new(),
        );

        let result = scanner.scan().await;
        assert!(result.contains_key(&("EURUSD".to_string(), Timeframe::H1)));
        assert!(!result.contains_key(&("NODATA".to_string(), Timeframe::H1)));
    }

    #[tokio::test]
    async fn eco_mode_caps_symbol_count() {
        let pairs: Vec<_> = (0..10)
            .map(|i| (format!("SYM{i}"), Timeframe::H1))
            .collect();
        let scanner = Scanner::new(
            pairs,
            ScanMode::Eco,
            ProviderManager::new(vec![Arc::new(FixedBars)]),
            MarketRegimeDetector::new(),
        );

        let result = scanner.scan().await;
        assert_eq!(result.len(), 5);
    }
}
