use crate::db::Db;
use aethelgard_core::{AethelgardError, Signal, SignalStatus, SignalType, Timeframe};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use sqlx::Row;
use std::collections::HashMap;
use std::str::FromStr;
use uuid::Uuid;

fn db_err(e: sqlx::Error) -> AethelgardError {
    AethelgardError::Storage(e.to_string())
}

fn row_to_signal(row: &sqlx::sqlite::SqliteRow) -> Result<Signal, AethelgardError> {
    let parse_decimal = |s: String| -> Result<Decimal, AethelgardError> {
        Decimal::from_str(&s).map_err(|e| AethelgardError::Storage(e.to_string()))
    };
    let col = |name: &'static str| -> Result<String, AethelgardError> {
        row.try_get(name).map_err(db_err)
    };

    Ok(Signal {
        id: Uuid::parse_str(&col("id")?).map_err(|e| AethelgardError::Storage(e.to_string()))?,
        trace_id: col("trace_id")?,
        symbol: col("symbol")?,
        timeframe: Timeframe::from_str_opt(&col("timeframe")?)
            .ok_or_else(|| AethelgardError::Storage("unknown timeframe in row".into()))?,
        signal_type: parse_signal_type(&col("signal_type")?)?,
        confidence: col("confidence")?
            .parse()
            .map_err(|_| AethelgardError::Storage("bad confidence in row".into()))?,
        entry_price: parse_decimal(col("entry_price")?)?,
        stop_loss: parse_decimal(col("stop_loss")?)?,
        take_profit: parse_decimal(col("take_profit")?)?,
        volume: parse_decimal(col("volume")?)?,
        connector_type: aethelgard_core::ConnectorType::from_str_opt(&col("connector_type")?)
            .ok_or_else(|| AethelgardError::Storage("unknown connector_type in row".into()))?,
        market_type: col("market_type")?,
        account_id: col("account_id")?,
        account_type: parse_account_type(&col("account_type")?)?,
        status: SignalStatus::from_str_opt(&col("status")?)
            .ok_or_else(|| AethelgardError::Storage("unknown status in row".into()))?,
        rejection_reason: row.try_get("rejection_reason").map_err(db_err)?,
        order_id: row.try_get("order_id").map_err(db_err)?,
        timestamp: row
            .try_get::<String, _>("timestamp")
            .map_err(db_err)?
            .parse::<DateTime<Utc>>()
            .map_err(|e| AethelgardError::Storage(e.to_string()))?,
        metadata: serde_json::from_str(&col("metadata")?)
            .map_err(|e| AethelgardError::Storage(e.to_string()))?,
    })
}

fn parse_signal_type(s: &str) -> Result<SignalType, AethelgardError> {
    match s {
        "BUY" => Ok(SignalType::Buy),
        "SELL" => Ok(SignalType::Sell),
        "HOLD" => Ok(SignalType::Hold),
        "CLOSE" => Ok(SignalType::Close),
        "MODIFY" => Ok(SignalType::Modify),
        _ => Err(AethelgardError::Storage(format!("unknown signal_type {s}"))),
    }
}

fn parse_account_type(s: &str) -> Result<aethelgard_core::AccountType, AethelgardError> {
    match s {
        "DEMO" => Ok(aethelgard_core::AccountType::Demo),
        "REAL" => Ok(aethelgard_core::AccountType::Real),
        _ => Err(AethelgardError::Storage(format!("unknown account_type {s}"))),
    }
}

fn account_type_str(a: aethelgard_core::AccountType) -> &'static str {
    match a {
        aethelgard_core::AccountType::Demo => "DEMO",
        aethelgard_core::AccountType::Real => "REAL",
    }
}

/// Insert a new signal. Idempotent by `id`: if `signal.id` already exists,
/// this is a no-op and the existing id is returned (spec §4.5 step 3).
pub async fn save_signal(db: &Db, signal: &Signal) -> Result<Uuid, AethelgardError> {
    if get_signal_by_id(db, signal.id).await?.is_some() {
        return Ok(signal.id);
    }

    sqlx::query(
        r#"
        INSERT INTO signals (
            id, trace_id, symbol, timeframe, signal_type, confidence,
            entry_price, stop_loss, take_profit, volume, connector_type,
            market_type, account_id, account_type, status, rejection_reason,
            order_id, timestamp, metadata
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(signal.id.to_string())
    .bind(&signal.trace_id)
    .bind(&signal.symbol)
    .bind(signal.timeframe.as_str())
    .bind(signal.signal_type.as_str())
    .bind(signal.confidence.to_string())
    .bind(signal.entry_price.to_string())
    .bind(signal.stop_loss.to_string())
    .bind(signal.take_profit.to_string())
    .bind(signal.volume.to_string())
    .bind(signal.connector_type.as_str())
    .bind(&signal.market_type)
    .bind(&signal.account_id)
    .bind(account_type_str(signal.account_type))
    .bind(signal.status.as_str())
    .bind(&signal.rejection_reason)
    .bind(&signal.order_id)
    .bind(signal.timestamp.to_rfc3339())
    .bind(serde_json::to_string(&signal.metadata).map_err(|e| AethelgardError::Storage(e.to_string()))?)
    .execute(db.pool())
    .await
    .map_err(db_err)?;

    Ok(signal.id)
}

/// Transition a signal's status, enforcing the legal-transition table
/// (spec §4.1). Status and metadata patch are applied in one transaction.
pub async fn update_signal_status(
    db: &Db,
    id: Uuid,
    new_status: SignalStatus,
    rejection_reason: Option<&str>,
    extra_metadata: Option<HashMap<String, serde_json::Value>>,
) -> Result<(), AethelgardError> {
    let current = get_signal_by_id(db, id)
        .await?
        .ok_or_else(|| AethelgardError::Storage(format!("signal {id} not found")))?;

    if !current.status.can_transition_to(new_status) {
        return Err(AethelgardError::IllegalStateTransition {
            from: current.status.as_str().to_string(),
            to: new_status.as_str().to_string(),
        });
    }

    let mut metadata = current.metadata.clone();
    if let Some(patch) = extra_metadata {
        metadata.extend(patch);
    }

    let mut tx = db.pool().begin().await.map_err(db_err)?;

    sqlx::query("UPDATE signals SET status = ?, rejection_reason = ?, metadata = ? WHERE id = ?")
        .bind(new_status.as_str())
        .bind(rejection_reason)
        .bind(serde_json::to_string(&metadata).map_err(|e| AethelgardError::Storage(e.to_string()))?)
        .bind(id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

    tx.commit().await.map_err(db_err)?;

    Ok(())
}

pub async fn get_signal_by_id(db: &Db, id: Uuid) -> Result<Option<Signal>, AethelgardError> {
    let row = sqlx::query("SELECT * FROM signals WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(db.pool())
        .await
        .map_err(db_err)?;

    row.as_ref().map(row_to_signal).transpose()
}

/// Free-form filter for `get_signals`. Any `None` field is unconstrained.
#[derive(Debug, Clone, Default)]
pub struct SignalFilter {
    pub symbol: Option<String>,
    pub status: Option<SignalStatus>,
    pub timeframe: Option<Timeframe>,
}

pub async fn get_signals(db: &Db, filter: &SignalFilter) -> Result<Vec<Signal>, AethelgardError> {
    let mut sql = "SELECT * FROM signals WHERE 1=1".to_string();
    if filter.symbol.is_some() {
        sql.push_str(" AND symbol = ?");
    }
    if filter.status.is_some() {
        sql.push_str(" AND status = ?");
    }
    if filter.timeframe.is_some() {
        sql.push_str(" AND timeframe = ?");
    }
    sql.push_str(" ORDER BY timestamp DESC");

    let mut query = sqlx::query(&sql);
    if let Some(symbol) = &filter.symbol {
        query = query.bind(symbol);
    }
    if let Some(status) = &filter.status {
        query = query.bind(status.as_str());
    }
    if let Some(timeframe) = &filter.timeframe {
        query = query.bind(timeframe.as_str());
    }

    let rows = query.fetch_all(db.pool()).await.map_err(db_err)?;
    rows.iter().map(row_to_signal).collect()
}

pub async fn get_signals_today(db: &Db) -> Result<Vec<Signal>, AethelgardError> {
    let today = Utc::now().format("%Y-%m-%d").to_string();
    let rows = sqlx::query("SELECT * FROM signals WHERE timestamp LIKE ? ORDER BY timestamp DESC")
        .bind(format!("{today}%"))
        .fetch_all(db.pool())
        .await
        .map_err(db_err)?;
    rows.iter().map(row_to_signal).collect()
}

pub async fn get_recent_signals(db: &Db, minutes: i64) -> Result<Vec<Signal>, AethelgardError> {
    let cutoff = (Utc::now() - Duration::minutes(minutes)).to_rfc3339();
    let rows = sqlx::query("SELECT * FROM signals WHERE timestamp >= ? ORDER BY timestamp DESC")
        .bind(cutoff)
        .fetch_all(db.pool())
        .await
        .map_err(db_err)?;
    rows.iter().map(row_to_signal).collect()
}

pub async fn count_executed_signals(db: &Db, date: &str) -> Result<i64, AethelgardError> {
    let row: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM signals WHERE status = 'EXECUTED' AND timestamp LIKE ?",
    )
    .bind(format!("{date}%"))
    .fetch_one(db.pool())
    .await
    .map_err(db_err)?;
    Ok(row.0)
}

/// Spec §4.1: any symbol with an EXECUTED signal and no closing trade result
/// is treated as an open position.
pub async fn has_open_position(db: &Db, symbol: &str) -> Result<bool, AethelgardError> {
    let row: (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM signals WHERE symbol = ? AND status = 'EXECUTED'")
            .bind(symbol)
            .fetch_one(db.pool())
            .await
            .map_err(db_err)?;
    Ok(row.0 > 0)
}

/// Spec §4.3 dedup table: reject a new signal if a PENDING or EXECUTED
/// signal of the same (symbol, signal_type, timeframe) exists inside the
/// timeframe's dedup window.
pub async fn has_recent_signal(
    db: &Db,
    symbol: &str,
    signal_type: SignalType,
    timeframe: Timeframe,
) -> Result<bool, AethelgardError> {
    let window = timeframe.dedup_window_minutes();
    let cutoff = (Utc::now() - Duration::minutes(window)).to_rfc3339();

    let row: (i64,) = sqlx::query_as(
        r#"
        SELECT COUNT(*) FROM signals
        WHERE symbol = ? AND signal_type = ? AND timeframe = ?
          AND status IN ('PENDING', 'EXECUTED')
          AND timestamp >= ?
        "#,
    )
    .bind(symbol)
    .bind(signal_type.as_str())
    .bind(timeframe.as_str())
    .bind(cutoff)
    .fetch_one(db.pool())
    .await
    .map_err(db_err)?;

    Ok(row.0 > 0)
}
