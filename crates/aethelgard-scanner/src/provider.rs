use aethelgard_core::{Bar, Timeframe};
use async_trait::async_trait;

/// Market-data provider contract (spec §6), distinct from `BrokerClient`: a
/// provider supplies OHLC only, with no notion of balances or order
/// execution. Broker connectors that also serve market data can implement
/// both traits.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn fetch_ohlc(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        count: usize,
    ) -> anyhow::Result<Option<Vec<Bar>>>;

    fn name(&self) -> &str;
}

/// Tries registered providers in priority order and returns the first
/// non-empty frame (spec §6). A provider erroring (not just returning
/// `None`) is logged and treated the same as a miss — data-source flakiness
/// must never surface as a scan failure.
pub struct ProviderManager {
    providers: Vec<std::sync::Arc<dyn MarketDataProvider>>,
}

impl ProviderManager {
    pub fn new(providers: Vec<std::sync::Arc<dyn MarketDataProvider>>) -> Self {
        Self { providers }
    }

    pub async fn fetch_ohlc(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        count: usize,
    ) -> Option<Vec<Bar>> {
        for provider in &self.providers {
            match provider.fetch_ohlc(symbol, timeframe, count).await {
                Ok(Some(bars)) if !bars.is_empty() => return Some(bars),
                Ok(_) => continue,
                Err(e) => {
                    tracing::warn!(
                        provider = provider.name(),
                        symbol,
                        "fetch_ohlc failed: {e}"
                    );
                    continue;
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysEmpty;
    #[async_trait]
    impl MarketDataProvider for AlwaysEmpty {
        async fn fetch_ohlc(
            &self,
            _symbol: &str,
            _timeframe: Timeframe,
            _count: usize,
        ) -> anyhow::Result<Option<Vec<Bar>>> {
            Ok(None)
        }
        fn name(&self) -> &str {
            "empty"
        }
    }

    struct AlwaysFails;
    #[async_trait]
    impl MarketDataProvider for AlwaysFails {
        async fn fetch_ohlc(
            &self,
            _symbol: &str,
            _timeframe: Timeframe,
            _count: usize,
        ) -> anyhow::Result<Option<Vec<Bar>>> {
            Err(anyhow::anyhow!("connection reset"))
        }
        fn name(&self) -> &str {
            "flaky"
        }
    }

    struct HasBars;
    #[async_trait]
    impl MarketDataProvider for HasBars {
        async fn fetch_ohlc(
            &self,
            _symbol: &str,
            _timeframe: Timeframe,
            _count: usize,
        ) -> anyhow::Result<Option<Vec<Bar>>> {
            Ok(Some(vec![Bar {
                timestamp: chrono::Utc::now(),
                open: 1.0,
                high: 1.0,
                low: 1.0,
                close: 1.0,
                volume: 1.0,
            }]))
        }
        fn name(&self) -> &str {
            "primary"
        }
    }

    #[tokio::test]
    async fn falls_back_through_priority_order() {
        let manager = ProviderManager::new(vec![
            std::sync::Arc::new(AlwaysFails),
            std::sync::Arc::new(AlwaysEmpty),
            std::sync::Arc::new(HasBars),
        ]);
        let bars = manager.fetch_ohlc("EURUSD", Timeframe::H1, 250).await;
        assert!(bars.is_some());
    }

    #[tokio::test]
    async fn all_misses_returns_none() {
        let manager = ProviderManager::new(vec![
            std::sync::Arc::new(AlwaysFails),
            std::sync::Arc::new(AlwaysEmpty),
        ]);
        assert!(manager.fetch_ohlc("EURUSD", Timeframe::H1, 250).await.is_none());
    }
}
