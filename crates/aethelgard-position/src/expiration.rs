use aethelgard_core::{AethelgardError, SignalStatus};
use aethelgard_storage::{SignalFilter, Storage};
use std::collections::HashMap;

/// Per-cycle expiration sweep (spec §4.6). Only PENDING signals age out;
/// EXECUTED/REJECTED/CLOSED are terminal and untouched.
pub struct ExpirationManager {
    storage: Storage,
}

#[derive(Debug, Clone, Default)]
pub struct ExpirationStats {
    pub total_checked: usize,
    pub total_expired: usize,
    pub by_timeframe: HashMap<String, usize>,
}

impl ExpirationManager {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    pub async fn expire_old_signals(&self) -> Result<ExpirationStats, AethelgardError> {
        let pending = self
            .storage
            .get_signals(&SignalFilter {
                status: Some(SignalStatus::Pending),
                ..Default::default()
            })
            .await?;

        let mut stats = ExpirationStats {
            total_checked: pending.len(),
            ..Default::default()
        };

        let now = chrono::Utc::now();
        for signal in pending {
            let window_minutes = signal.timeframe.expiration_minutes();
            let age_minutes = (now - signal.timestamp).num_seconds() as f64 / 60.0;

            if age_minutes <= window_minutes as f64 {
                continue;
            }

            let reason = format!(
                "Signal expired after {age_minutes:.1}min (window: {window_minutes}min)"
            );
            let mut extra = HashMap::new();
            extra.insert("expired_at".to_string(), serde_json::json!(now));
            extra.insert("reason".to_string(), serde_json::json!(reason));
            extra.insert("timeframe_window".to_string(), serde_json::json!(window_minutes));
            extra.insert("signal_age_minutes".to_string(), serde_json::json!(age_minutes));

            self.storage
                .update_signal_status(signal.id, SignalStatus::Expired, None, Some(extra))
                .await?;

            stats.total_expired += 1;
            *stats
                .by_timeframe
                .entry(signal.timeframe.as_str().to_string())
                .or_insert(0) += 1;

            tracing::info!(
                symbol = %signal.symbol,
                timeframe = signal.timeframe.as_str(),
                age_minutes,
                window_minutes,
                "signal expired"
            );
        }

        if stats.total_expired > 0 {
            tracing::info!(
                total_expired = stats.total_expired,
                "expiration cycle complete"
            );
        }

        Ok(stats)
    }
}
