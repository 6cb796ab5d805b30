use crate::db::Db;
use aethelgard_core::{AethelgardError, ExitReason, MarketRegime, TradeResult};
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use sqlx::Row;
use std::collections::HashMap;
use std::str::FromStr;
use uuid::Uuid;

fn db_err(e: sqlx::Error) -> AethelgardError {
    AethelgardError::Storage(e.to_string())
}

fn parse_exit_reason(s: &str) -> Result<ExitReason, AethelgardError> {
    match s {
        "TAKE_PROFIT" => Ok(ExitReason::TakeProfit),
        "STOP_LOSS" => Ok(ExitReason::StopLoss),
        "MANUAL" => Ok(ExitReason::Manual),
        "EXPIRED" => Ok(ExitReason::Expired),
        "BROKER_CLOSED" => Ok(ExitReason::BrokerClosed),
        _ => Err(AethelgardError::Storage(format!("unknown exit_reason {s}"))),
    }
}

fn row_to_trade(row: &sqlx::sqlite::SqliteRow) -> Result<TradeResult, AethelgardError> {
    let parse_decimal = |s: String| -> Result<Decimal, AethelgardError> {
        Decimal::from_str(&s).map_err(|e| AethelgardError::Storage(e.to_string()))
    };
    let col = |name: &'static str| -> Result<String, AethelgardError> {
        row.try_get(name).map_err(db_err)
    };

    Ok(TradeResult {
        id: Uuid::parse_str(&col("id")?).map_err(|e| AethelgardError::Storage(e.to_string()))?,
        signal_id: Uuid::parse_str(&col("signal_id")?)
            .map_err(|e| AethelgardError::Storage(e.to_string()))?,
        symbol: col("symbol")?,
        entry_price: parse_decimal(col("entry_price")?)?,
        exit_price: parse_decimal(col("exit_price")?)?,
        profit_loss: parse_decimal(col("profit_loss")?)?,
        pips: parse_decimal(col("pips")?)?,
        is_win: row.try_get::<i64, _>("is_win").map_err(db_err)? != 0,
        exit_reason: parse_exit_reason(&col("exit_reason")?)?,
        duration_minutes: row.try_get("duration_minutes").map_err(db_err)?,
        market_regime: MarketRegime::from_str_opt(&col("market_regime")?)
            .ok_or_else(|| AethelgardError::Storage("unknown market_regime in row".into()))?,
        parameters_used: serde_json::from_str(&col("parameters_used")?)
            .map_err(|e| AethelgardError::Storage(e.to_string()))?,
    })
}

pub async fn save_trade_result(db: &Db, trade: &TradeResult) -> Result<(), AethelgardError> {
    sqlx::query(
        r#"
        INSERT INTO trade_results (
            id, signal_id, symbol, entry_price, exit_price, profit_loss, pips,
            is_win, exit_reason, duration_minutes, market_regime, parameters_used
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(trade.id.to_string())
    .bind(trade.signal_id.to_string())
    .bind(&trade.symbol)
    .bind(trade.entry_price.to_string())
    .bind(trade.exit_price.to_string())
    .bind(trade.profit_loss.to_string())
    .bind(trade.pips.to_string())
    .bind(trade.is_win as i64)
    .bind(trade.exit_reason.as_str())
    .bind(trade.duration_minutes)
    .bind(trade.market_regime.as_str())
    .bind(
        serde_json::to_string(&trade.parameters_used)
            .map_err(|e| AethelgardError::Storage(e.to_string()))?,
    )
    .execute(db.pool())
    .await
    .map_err(db_err)?;

    Ok(())
}

pub async fn get_recent_trades(db: &Db, limit: i64) -> Result<Vec<TradeResult>, AethelgardError> {
    let rows = sqlx::query("SELECT * FROM trade_results ORDER BY created_at DESC LIMIT ?")
        .bind(limit)
        .fetch_all(db.pool())
        .await
        .map_err(db_err)?;
    rows.iter().map(row_to_trade).collect()
}

/// Win rate over the last `days` days, as a fraction in [0,1]. Empty window
/// returns 0.0 rather than an error — the Tuner treats "no data" as
/// "nothing to learn from yet", not a fault.
pub async fn get_win_rate(db: &Db, days: i64) -> Result<f64, AethelgardError> {
    let cutoff = (Utc::now() - Duration::days(days)).to_rfc3339();

    let row: (i64, i64) = sqlx::query_as(
        "SELECT COUNT(*), COALESCE(SUM(is_win), 0) FROM trade_results WHERE created_at >= ?",
    )
    .bind(cutoff)
    .fetch_one(db.pool())
    .await
    .map_err(db_err)?;

    let (total, wins) = row;
    if total == 0 {
        return Ok(0.0);
    }
    Ok(wins as f64 / total as f64)
}

/// Net realized profit/loss per symbol over the last `days` days.
pub async fn get_profit_by_symbol(
    db: &Db,
    days: i64,
) -> Result<HashMap<String, Decimal>, AethelgardError> {
    let cutoff = (Utc::now() - Duration::days(days)).to_rfc3339();

    let rows = sqlx::query("SELECT symbol, profit_loss FROM trade_results WHERE created_at >= ?")
        .bind(cutoff)
        .fetch_all(db.pool())
        .await
        .map_err(db_err)?;

    let mut totals: HashMap<String, Decimal> = HashMap::new();
    for row in rows {
        let symbol: String = row.try_get("symbol").map_err(db_err)?;
        let pnl: String = row.try_get("profit_loss").map_err(db_err)?;
        let pnl = Decimal::from_str(&pnl).map_err(|e| AethelgardError::Storage(e.to_string()))?;
        *totals.entry(symbol).or_insert(Decimal::ZERO) += pnl;
    }

    Ok(totals)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_trade(symbol: &str, pnl: Decimal, is_win: bool) -> TradeResult {
        TradeResult {
            id: Uuid::new_v4(),
            signal_id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            entry_price: dec!(1.1000),
            exit_price: dec!(1.1050),
            profit_loss: pnl,
            pips: dec!(50),
            is_win,
            exit_reason: ExitReason::TakeProfit,
            duration_minutes: 120,
            market_regime: MarketRegime::Trend,
            parameters_used: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn win_rate_reflects_recorded_trades() {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        save_trade_result(&db, &sample_trade("EURUSD", dec!(10), true))
            .await
            .unwrap();
        save_trade_result(&db, &sample_trade("EURUSD", dec!(-5), false))
            .await
            .unwrap();

        let win_rate = get_win_rate(&db, 30).await.unwrap();
        assert!((win_rate - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn profit_by_symbol_sums_correctly() {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        save_trade_result(&db, &sample_trade("EURUSD", dec!(10), true))
            .await
            .unwrap();
        save_trade_result(&db, &sample_trade("EURUSD", dec!(-3), false))
            .await
            .unwrap();
        save_trade_result(&db, &sample_trade("GBPUSD", dec!(7), true))
            .await
            .unwrap();

        let totals = get_profit_by_symbol(&db, 30).await.unwrap();
        assert_eq!(totals.get("EURUSD"), Some(&dec!(7)));
        assert_eq!(totals.get("GBPUSD"), Some(&dec!(7)));
    }
}
