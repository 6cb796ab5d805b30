use crate::db::Db;
use aethelgard_core::{AethelgardError, CoherenceEvent, ConnectorType, MarketRegime, Timeframe};
use chrono::{DateTime, Utc};
use sqlx::Row;

fn db_err(e: sqlx::Error) -> AethelgardError {
    AethelgardError::Storage(e.to_string())
}

/// Record a coherence-monitor finding (spec §4.6). `learning_opportunity`
/// tags broker-rejection findings the Tuner should weigh.
pub async fn log_coherence_event(
    db: &Db,
    event: &CoherenceEvent,
    learning_opportunity: bool,
) -> Result<(), AethelgardError> {
    sqlx::query(
        r#"
        INSERT INTO coherence_events (
            signal_id, stage, status, reason, connector_type,
            learning_opportunity, timestamp
        ) VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(event.signal_id.map(|id| id.to_string()))
    .bind(&event.stage)
    .bind(&event.status)
    .bind(&event.reason)
    .bind(event.connector_type.map(|c| c.as_str()))
    .bind(learning_opportunity as i64)
    .bind(event.timestamp.to_rfc3339())
    .execute(db.pool())
    .await
    .map_err(db_err)?;

    Ok(())
}

pub async fn log_market_state(
    db: &Db,
    symbol: &str,
    timeframe: Timeframe,
    regime: MarketRegime,
    confidence: f64,
) -> Result<(), AethelgardError> {
    sqlx::query(
        "INSERT INTO market_state_history (symbol, timeframe, regime, confidence, timestamp) \
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(symbol)
    .bind(timeframe.as_str())
    .bind(regime.as_str())
    .bind(confidence)
    .bind(Utc::now().to_rfc3339())
    .execute(db.pool())
    .await
    .map_err(db_err)?;

    Ok(())
}

pub struct MarketStateEntry {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub regime: MarketRegime,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
}

pub async fn get_market_state_history(
    db: &Db,
    symbol: &str,
    limit: i64,
) -> Result<Vec<MarketStateEntry>, AethelgardError> {
    let rows = sqlx::query(
        "SELECT * FROM market_state_history WHERE symbol = ? ORDER BY timestamp DESC LIMIT ?",
    )
    .bind(symbol)
    .bind(limit)
    .fetch_all(db.pool())
    .await
    .map_err(db_err)?;

    rows.iter()
        .map(|row| {
            let timeframe_str: String = row.try_get("timeframe").map_err(db_err)?;
            let regime_str: String = row.try_get("regime").map_err(db_err)?;
            let timestamp_str: String = row.try_get("timestamp").map_err(db_err)?;
            Ok(MarketStateEntry {
                symbol: row.try_get("symbol").map_err(db_err)?,
                timeframe: Timeframe::from_str_opt(&timeframe_str)
                    .ok_or_else(|| AethelgardError::Storage("unknown timeframe in row".into()))?,
                regime: MarketRegime::from_str_opt(&regime_str)
                    .ok_or_else(|| AethelgardError::Storage("unknown regime in row".into()))?,
                confidence: row.try_get("confidence").map_err(db_err)?,
                timestamp: timestamp_str
                    .parse::<DateTime<Utc>>()
                    .map_err(|e| AethelgardError::Storage(e.to_string()))?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn market_state_history_respects_limit() {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        for _ in 0..3 {
            log_market_state(&db, "EURUSD", Timeframe::H1, MarketRegime::Trend, 0.8)
                .await
                .unwrap();
        }

        let history = get_market_state_history(&db, "EURUSD", 2).await.unwrap();
        assert_eq!(history.len(), 2);
    }

    #[tokio::test]
    async fn coherence_event_logs_without_error() {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        let event = CoherenceEvent {
            signal_id: None,
            symbol: "EURUSD".to_string(),
            stage: "executor".to_string(),
            status: "EXECUTED".to_string(),
            reason: "no ticket returned".to_string(),
            incoherence_type: Some("MISSING_TICKET".to_string()),
            details: None,
            connector_type: Some(ConnectorType::MetaTrader5),
            timestamp: Utc::now(),
        };
        log_coherence_event(&db, &event, true).await.unwrap();
    }
}
