use crate::db::Db;
use aethelgard_core::{AethelgardError, MarketRegime, PositionMetadata, Timeframe};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::Row;
use std::str::FromStr;

fn db_err(e: sqlx::Error) -> AethelgardError {
    AethelgardError::Storage(e.to_string())
}

fn row_to_metadata(row: &sqlx::sqlite::SqliteRow) -> Result<PositionMetadata, AethelgardError> {
    let parse_decimal = |s: String| -> Result<Decimal, AethelgardError> {
        Decimal::from_str(&s).map_err(|e| AethelgardError::Storage(e.to_string()))
    };
    let col = |name: &'static str| -> Result<String, AethelgardError> {
        row.try_get(name).map_err(db_err)
    };

    let last_modification_time: Option<String> =
        row.try_get("last_modification_time").map_err(db_err)?;

    Ok(PositionMetadata {
        ticket: col("ticket")?,
        symbol: col("symbol")?,
        entry_price: parse_decimal(col("entry_price")?)?,
        entry_time: col("entry_time")?
            .parse::<DateTime<Utc>>()
            .map_err(|e| AethelgardError::Storage(e.to_string()))?,
        sl: parse_decimal(col("sl")?)?,
        tp: parse_decimal(col("tp")?)?,
        volume: parse_decimal(col("volume")?)?,
        initial_risk_usd: parse_decimal(col("initial_risk_usd")?)?,
        entry_regime: MarketRegime::from_str_opt(&col("entry_regime")?)
            .ok_or_else(|| AethelgardError::Storage("unknown entry_regime in row".into()))?,
        timeframe: Timeframe::from_str_opt(&col("timeframe")?)
            .ok_or_else(|| AethelgardError::Storage("unknown timeframe in row".into()))?,
        modification_count: row.try_get("modification_count").map_err(db_err)?,
        last_modification_time: last_modification_time
            .map(|s| {
                s.parse::<DateTime<Utc>>()
                    .map_err(|e| AethelgardError::Storage(e.to_string()))
            })
            .transpose()?,
    })
}

/// Write position metadata, keyed by ticket. Used by the Executor on a
/// successful fill (initial write) and by the Position Manager whenever it
/// adjusts SL/TP (spec §4.6). When `sl`/`tp` change on an existing row, the
/// prior values are stashed so `rollback_position_modification` can restore
/// them if the broker rejects the modification.
pub async fn update_position_metadata(
    db: &Db,
    metadata: &PositionMetadata,
) -> Result<(), AethelgardError> {
    let existing = get_position_metadata(db, &metadata.ticket).await?;

    let (previous_sl, previous_tp) = match &existing {
        Some(e) if e.sl != metadata.sl || e.tp != metadata.tp => {
            (Some(e.sl.to_string()), Some(e.tp.to_string()))
        }
        Some(_) => (None, None),
        None => (None, None),
    };

    sqlx::query(
        r#"
        INSERT INTO position_metadata (
            ticket, symbol, entry_price, entry_time, sl, tp, volume,
            initial_risk_usd, entry_regime, timeframe, modification_count,
            last_modification_time, previous_sl, previous_tp
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(ticket) DO UPDATE SET
            sl = excluded.sl,
            tp = excluded.tp,
            volume = excluded.volume,
            modification_count = excluded.modification_count,
            last_modification_time = excluded.last_modification_time,
            previous_sl = COALESCE(excluded.previous_sl, position_metadata.previous_sl),
            previous_tp = COALESCE(excluded.previous_tp, position_metadata.previous_tp),
            updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
        "#,
    )
    .bind(&metadata.ticket)
    .bind(&metadata.symbol)
    .bind(metadata.entry_price.to_string())
    .bind(metadata.entry_time.to_rfc3339())
    .bind(metadata.sl.to_string())
    .bind(metadata.tp.to_string())
    .bind(metadata.volume.to_string())
    .bind(metadata.initial_risk_usd.to_string())
    .bind(metadata.entry_regime.as_str())
    .bind(metadata.timeframe.as_str())
    .bind(metadata.modification_count)
    .bind(metadata.last_modification_time.map(|t| t.to_rfc3339()))
    .bind(previous_sl)
    .bind(previous_tp)
    .execute(db.pool())
    .await
    .map_err(db_err)?;

    Ok(())
}

pub async fn get_position_metadata(
    db: &Db,
    ticket: &str,
) -> Result<Option<PositionMetadata>, AethelgardError> {
    let row = sqlx::query("SELECT * FROM position_metadata WHERE ticket = ?")
        .bind(ticket)
        .fetch_optional(db.pool())
        .await
        .map_err(db_err)?;

    row.as_ref().map(row_to_metadata).transpose()
}

/// Undo the last SL/TP modification on a connector rejection (spec §4.6
/// safety rail). No-op if there is no stashed previous value.
pub async fn rollback_position_modification(
    db: &Db,
    ticket: &str,
) -> Result<(), AethelgardError> {
    let row = sqlx::query(
        "SELECT previous_sl, previous_tp FROM position_metadata WHERE ticket = ?",
    )
    .bind(ticket)
    .fetch_optional(db.pool())
    .await
    .map_err(db_err)?;

    let Some(row) = row else {
        return Ok(());
    };
    let previous_sl: Option<String> = row.try_get("previous_sl").map_err(db_err)?;
    let previous_tp: Option<String> = row.try_get("previous_tp").map_err(db_err)?;

    let (Some(previous_sl), Some(previous_tp)) = (previous_sl, previous_tp) else {
        return Ok(());
    };

    sqlx::query(
        r#"
        UPDATE position_metadata
        SET sl = ?, tp = ?, modification_count = MAX(modification_count - 1, 0),
            previous_sl = NULL, previous_tp = NULL
        WHERE ticket = ?
        "#,
    )
    .bind(previous_sl)
    .bind(previous_tp)
    .bind(ticket)
    .execute(db.pool())
    .await
    .map_err(db_err)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_metadata(ticket: &str, sl: Decimal, tp: Decimal) -> PositionMetadata {
        PositionMetadata {
            ticket: ticket.to_string(),
            symbol: "EURUSD".to_string(),
            entry_price: dec!(1.1000),
            entry_time: Utc::now(),
            sl,
            tp,
            volume: dec!(0.1),
            initial_risk_usd: dec!(50),
            entry_regime: MarketRegime::Trend,
            timeframe: Timeframe::H1,
            modification_count: 0,
            last_modification_time: None,
        }
    }

    #[tokio::test]
    async fn rollback_restores_previous_sl_tp() {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        let initial = sample_metadata("T1", dec!(1.0950), dec!(1.1100));
        update_position_metadata(&db, &initial).await.unwrap();

        let mut modified = initial.clone();
        modified.sl = dec!(1.0980);
        modified.tp = dec!(1.1150);
        modified.modification_count = 1;
        update_position_metadata(&db, &modified).await.unwrap();

        rollback_position_modification(&db, "T1").await.unwrap();

        let restored = get_position_metadata(&db, "T1").await.unwrap().unwrap();
        assert_eq!(restored.sl, dec!(1.0950));
        assert_eq!(restored.tp, dec!(1.1100));
        assert_eq!(restored.modification_count, 0);
    }

    #[tokio::test]
    async fn rollback_without_prior_modification_is_noop() {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        let initial = sample_metadata("T2", dec!(1.0950), dec!(1.1100));
        update_position_metadata(&db, &initial).await.unwrap();

        rollback_position_modification(&db, "T2").await.unwrap();

        let unchanged = get_position_metadata(&db, "T2").await.unwrap().unwrap();
        assert_eq!(unchanged.sl, dec!(1.0950));
    }
}
