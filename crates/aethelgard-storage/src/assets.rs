use crate::db::Db;
use aethelgard_core::{AethelgardError, AssetCategory, AssetProfile};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

fn db_err(e: sqlx::Error) -> AethelgardError {
    AethelgardError::Storage(e.to_string())
}

fn category_str(c: AssetCategory) -> &'static str {
    match c {
        AssetCategory::Forex => "FOREX",
        AssetCategory::Crypto => "CRYPTO",
        AssetCategory::Index => "INDEX",
        AssetCategory::Metal => "METAL",
        AssetCategory::Commodity => "COMMODITY",
    }
}

fn parse_category(s: &str) -> Result<AssetCategory, AethelgardError> {
    match s {
        "FOREX" => Ok(AssetCategory::Forex),
        "CRYPTO" => Ok(AssetCategory::Crypto),
        "INDEX" => Ok(AssetCategory::Index),
        "METAL" => Ok(AssetCategory::Metal),
        "COMMODITY" => Ok(AssetCategory::Commodity),
        _ => Err(AethelgardError::Storage(format!("unknown category {s}"))),
    }
}

/// Spec §4.1: `get_asset_profile` returns `None` for unseeded symbols;
/// callers must treat that as a hard abort before sizing a trade.
pub async fn get_asset_profile(
    db: &Db,
    symbol: &str,
    _trace_id: &str,
) -> Result<Option<AssetProfile>, AethelgardError> {
    let row = sqlx::query("SELECT * FROM asset_profiles WHERE symbol = ?")
        .bind(symbol)
        .fetch_optional(db.pool())
        .await
        .map_err(db_err)?;

    let Some(row) = row else { return Ok(None) };

    let parse_decimal = |s: String| -> Result<Decimal, AethelgardError> {
        Decimal::from_str(&s).map_err(|e| AethelgardError::Storage(e.to_string()))
    };
    let col = |name: &'static str| -> Result<String, AethelgardError> {
        row.try_get(name).map_err(db_err)
    };

    Ok(Some(AssetProfile {
        symbol: col("symbol")?,
        contract_size: parse_decimal(col("contract_size")?)?,
        lot_step: parse_decimal(col("lot_step")?)?,
        lot_min: parse_decimal(col("lot_min")?)?,
        lot_max: parse_decimal(col("lot_max")?)?,
        digits: row.try_get::<i64, _>("digits").map_err(db_err)? as u32,
        pip_size: parse_decimal(col("pip_size")?)?,
        category: parse_category(&col("category")?)?,
        subcategory: col("subcategory")?,
        enabled: row.try_get::<i64, _>("enabled").map_err(db_err)? != 0,
        min_score: col("min_score")?
            .parse()
            .map_err(|_| AethelgardError::Storage("bad min_score in row".into()))?,
        risk_multiplier: parse_decimal(col("risk_multiplier")?)?,
    }))
}

async fn insert_profile(pool: &SqlitePool, profile: &AssetProfile) -> Result<(), AethelgardError> {
    sqlx::query(
        r#"
        INSERT OR IGNORE INTO asset_profiles (
            symbol, contract_size, lot_step, lot_min, lot_max, digits,
            pip_size, category, subcategory, enabled, min_score, risk_multiplier
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&profile.symbol)
    .bind(profile.contract_size.to_string())
    .bind(profile.lot_step.to_string())
    .bind(profile.lot_min.to_string())
    .bind(profile.lot_max.to_string())
    .bind(profile.digits as i64)
    .bind(profile.pip_size.to_string())
    .bind(category_str(profile.category))
    .bind(&profile.subcategory)
    .bind(profile.enabled as i64)
    .bind(profile.min_score.to_string())
    .bind(profile.risk_multiplier.to_string())
    .execute(pool)
    .await
    .map_err(db_err)?;

    Ok(())
}

/// Bootstrap seed (spec §4.1): a conservative starter set of majors, one
/// metal, one crypto and one index so a fresh deployment has something to
/// size against before an operator curates the real instrument list.
pub async fn seed_default_profiles(pool: &SqlitePool) -> Result<(), AethelgardError> {
    let majors = [
        "EURUSD", "GBPUSD", "USDJPY", "AUDUSD", "USDCHF", "USDCAD", "NZDUSD",
    ];

    for symbol in majors {
        let digits = if symbol.ends_with("JPY") { 3 } else { 5 };
        let pip_size = if symbol.ends_with("JPY") {
            dec!(0.01)
        } else {
            dec!(0.0001)
        };
        insert_profile(
            pool,
            &AssetProfile {
                symbol: symbol.to_string(),
                contract_size: dec!(100000),
                lot_step: dec!(0.01),
                lot_min: dec!(0.01),
                lot_max: dec!(100),
                digits,
                pip_size,
                category: AssetCategory::Forex,
                subcategory: "majors".to_string(),
                enabled: true,
                min_score: 70.0,
                risk_multiplier: dec!(1.0),
            },
        )
        .await?;
    }

    insert_profile(
        pool,
        &AssetProfile {
            symbol: "XAUUSD".to_string(),
            contract_size: dec!(100),
            lot_step: dec!(0.01),
            lot_min: dec!(0.01),
            lot_max: dec!(50),
            digits: 2,
            pip_size: dec!(0.1),
            category: AssetCategory::Metal,
            subcategory: "precious".to_string(),
            enabled: true,
            min_score: 75.0,
            risk_multiplier: dec!(0.8),
        },
    )
    .await?;

    insert_profile(
        pool,
        &AssetProfile {
            symbol: "BTCUSD".to_string(),
            contract_size: dec!(1),
            lot_step: dec!(0.001),
            lot_min: dec!(0.001),
            lot_max: dec!(10),
            digits: 2,
            pip_size: dec!(1.0),
            category: AssetCategory::Crypto,
            subcategory: "altcoins".to_string(),
            enabled: true,
            min_score: 80.0,
            risk_multiplier: dec!(0.6),
        },
    )
    .await?;

    insert_profile(
        pool,
        &AssetProfile {
            symbol: "US500".to_string(),
            contract_size: dec!(1),
            lot_step: dec!(0.1),
            lot_min: dec!(0.1),
            lot_max: dec!(100),
            digits: 2,
            pip_size: dec!(0.1),
            category: AssetCategory::Index,
            subcategory: "tier1".to_string(),
            enabled: true,
            min_score: 70.0,
            risk_multiplier: dec!(1.0),
        },
    )
    .await?;

    Ok(())
}
