use aethelgard_core::{AethelgardError, CoherenceEvent, ConnectorType, SignalStatus};
use aethelgard_storage::Storage;

/// Coherence Monitor (spec §4.6): scans recent signals for inconsistencies
/// between what the Signal Factory/Executor recorded and what should be
/// true of a healthy pipeline.
pub struct CoherenceMonitor {
    storage: Storage,
    pending_timeout_minutes: i64,
    lookback_minutes: i64,
}

impl CoherenceMonitor {
    pub fn new(storage: Storage) -> Self {
        Self {
            storage,
            pending_timeout_minutes: 15,
            lookback_minutes: 120,
        }
    }

    pub fn with_windows(mut self, pending_timeout_minutes: i64, lookback_minutes: i64) -> Self {
        self.pending_timeout_minutes = pending_timeout_minutes;
        self.lookback_minutes = lookback_minutes;
        self
    }

    pub async fn run_once(&self) -> Result<Vec<CoherenceEvent>, AethelgardError> {
        let recent = self.storage.get_recent_signals(self.lookback_minutes).await?;
        let now = chrono::Utc::now();
        let mut events = Vec::new();

        for signal in &recent {
            if signal.connector_type == ConnectorType::MetaTrader5
                && signal.status == SignalStatus::Executed
                && signal.order_id.is_none()
            {
                events.push(self.emit(signal, "EXECUTED_WITHOUT_TICKET", None).await?);
            }

            if signal.connector_type == ConnectorType::MetaTrader5 && signal.symbol.contains("=X") {
                events.push(self.emit(signal, "UNNORMALIZED_SYMBOL", None).await?);
            }

            if signal.status == SignalStatus::Pending {
                let age_minutes = (now - signal.timestamp).num_seconds() as f64 / 60.0;
                if age_minutes >= self.pending_timeout_minutes as f64 {
                    events.push(self.emit(signal, "PENDING_TIMEOUT", None).await?);
                }
            }

            if signal.status == SignalStatus::Rejected {
                if let Some(reason) = &signal.rejection_reason {
                    let details = format!(
                        "Signal score: {:.2}, Volume: {}",
                        signal.confidence, signal.volume
                    );
                    events.push(
                        self.emit_learning_opportunity(signal, reason, &details).await?,
                    );
                }
            }
        }

        Ok(events)
    }

    async fn emit(
        &self,
        signal: &aethelgard_core::Signal,
        reason: &str,
        incoherence_type: Option<&str>,
    ) -> Result<CoherenceEvent, AethelgardError> {
        let event = CoherenceEvent {
            signal_id: Some(signal.id),
            symbol: signal.symbol.clone(),
            stage: "execution".to_string(),
            status: "INCONSISTENT".to_string(),
            reason: reason.to_string(),
            incoherence_type: incoherence_type.map(str::to_string),
            details: None,
            connector_type: Some(signal.connector_type),
            timestamp: chrono::Utc::now(),
        };
        self.storage.log_coherence_event(&event, false).await?;
        tracing::warn!(symbol = %signal.symbol, reason, "coherence incoherence detected");
        Ok(event)
    }

    async fn emit_learning_opportunity(
        &self,
        signal: &aethelgard_core::Signal,
        reason: &str,
        details: &str,
    ) -> Result<CoherenceEvent, AethelgardError> {
        let event = CoherenceEvent {
            signal_id: Some(signal.id),
            symbol: signal.symbol.clone(),
            stage: "execution".to_string(),
            status: "NO_EXECUTION".to_string(),
            reason: reason.to_string(),
            incoherence_type: Some("LEARNING_OPPORTUNITY".to_string()),
            details: Some(details.to_string()),
            connector_type: Some(signal.connector_type),
            timestamp: chrono::Utc::now(),
        };
        self.storage.log_coherence_event(&event, true).await?;
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aethelgard_core::{Signal, SignalType, Timeframe};
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn flags_executed_metatrader_signal_without_ticket() {
        let storage = Storage::connect("sqlite::memory:").await.unwrap();
        let mut signal = Signal::new(
            "EURUSD",
            Timeframe::H1,
            SignalType::Buy,
            dec!(1.1000),
            dec!(1.0950),
            dec!(1.1100),
            ConnectorType::MetaTrader5,
        );
        signal.status = SignalStatus::Executed;
        storage.save_signal(&signal).await.unwrap();

        let monitor = CoherenceMonitor::new(storage);
        let events = monitor.run_once().await.unwrap();

        assert!(events.iter().any(|e| e.reason == "EXECUTED_WITHOUT_TICKET"));
    }

    #[tokio::test]
    async fn flags_stale_pending_signal() {
        let storage = Storage::connect("sqlite::memory:").await.unwrap();
        let mut signal = Signal::new(
            "EURUSD",
            Timeframe::H1,
            SignalType::Buy,
            dec!(1.1000),
            dec!(1.0950),
            dec!(1.1100),
            ConnectorType::MetaTrader5,
        );
        signal.timestamp = chrono::Utc::now() - chrono::Duration::minutes(30);
        storage.save_signal(&signal).await.unwrap();

        let monitor = CoherenceMonitor::new(storage).with_windows(15, 120);
        let events = monitor.run_once().await.unwrap();

        assert!(events.iter().any(|e| e.reason == "PENDING_TIMEOUT"));
    }
}
