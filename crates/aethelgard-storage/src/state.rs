use crate::db::Db;
use aethelgard_core::{AethelgardError, DynamicParameters, SystemState};
use sqlx::{Row, SqlitePool};

const SYSTEM_STATE_KEY: &str = "system_state";
const DYNAMIC_PARAMS_KEY: &str = "dynamic_params";

fn db_err(e: sqlx::Error) -> AethelgardError {
    AethelgardError::Storage(e.to_string())
}

async fn read_kv(
    pool: &SqlitePool,
    table: &'static str,
    key: &str,
) -> Result<Option<serde_json::Value>, AethelgardError> {
    let sql = format!("SELECT value FROM {table} WHERE key = ?");
    let row = sqlx::query(&sql)
        .bind(key)
        .fetch_optional(pool)
        .await
        .map_err(db_err)?;

    match row {
        Some(row) => {
            let raw: String = row.try_get("value").map_err(db_err)?;
            Ok(Some(
                serde_json::from_str(&raw).map_err(|e| AethelgardError::Storage(e.to_string()))?,
            ))
        }
        None => Ok(None),
    }
}

async fn write_kv(
    pool: &SqlitePool,
    table: &'static str,
    key: &str,
    value: &serde_json::Value,
) -> Result<(), AethelgardError> {
    let sql = format!(
        "INSERT INTO {table} (key, value) VALUES (?, ?) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, \
         updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')"
    );
    sqlx::query(&sql)
        .bind(key)
        .bind(serde_json::to_string(value).map_err(|e| AethelgardError::Storage(e.to_string()))?)
        .execute(pool)
        .await
        .map_err(db_err)?;
    Ok(())
}

/// Shallow-merge `patch` onto `base` (object keys only; spec §4.1
/// "shallow-merged key-value updates").
fn shallow_merge(base: &mut serde_json::Value, patch: serde_json::Value) {
    if let (Some(base_obj), serde_json::Value::Object(patch_obj)) =
        (base.as_object_mut(), patch)
    {
        for (k, v) in patch_obj {
            base_obj.insert(k, v);
        }
    }
}

pub async fn seed_default_dynamic_params(pool: &SqlitePool) -> Result<(), AethelgardError> {
    if read_kv(pool, "dynamic_params", DYNAMIC_PARAMS_KEY).await?.is_some() {
        return Ok(());
    }
    let defaults = serde_json::to_value(DynamicParameters::default())
        .map_err(|e| AethelgardError::Storage(e.to_string()))?;
    write_kv(pool, "dynamic_params", DYNAMIC_PARAMS_KEY, &defaults).await?;

    let state_defaults = serde_json::to_value(SystemState::default())
        .map_err(|e| AethelgardError::Storage(e.to_string()))?;
    write_kv(pool, "system_state", SYSTEM_STATE_KEY, &state_defaults).await?;

    Ok(())
}

pub async fn get_dynamic_params(db: &Db) -> Result<DynamicParameters, AethelgardError> {
    let value = read_kv(db.pool(), "dynamic_params", DYNAMIC_PARAMS_KEY).await?;
    match value {
        Some(v) => serde_json::from_value(v).map_err(|e| AethelgardError::Storage(e.to_string())),
        None => Ok(DynamicParameters::default()),
    }
}

pub async fn update_dynamic_params(
    db: &Db,
    patch: serde_json::Value,
) -> Result<DynamicParameters, AethelgardError> {
    let mut current = serde_json::to_value(get_dynamic_params(db).await?)
        .map_err(|e| AethelgardError::Storage(e.to_string()))?;
    shallow_merge(&mut current, patch);

    let merged: DynamicParameters =
        serde_json::from_value(current.clone()).map_err(|e| AethelgardError::Storage(e.to_string()))?;
    write_kv(db.pool(), "dynamic_params", DYNAMIC_PARAMS_KEY, &current).await?;

    Ok(merged)
}

pub async fn get_system_state(db: &Db) -> Result<SystemState, AethelgardError> {
    let value = read_kv(db.pool(), "system_state", SYSTEM_STATE_KEY).await?;
    match value {
        Some(v) => serde_json::from_value(v).map_err(|e| AethelgardError::Storage(e.to_string())),
        None => Ok(SystemState::default()),
    }
}

pub async fn update_system_state(
    db: &Db,
    patch: serde_json::Value,
) -> Result<SystemState, AethelgardError> {
    let mut current = serde_json::to_value(get_system_state(db).await?)
        .map_err(|e| AethelgardError::Storage(e.to_string()))?;
    shallow_merge(&mut current, patch);

    let merged: SystemState =
        serde_json::from_value(current.clone()).map_err(|e| AethelgardError::Storage(e.to_string()))?;
    write_kv(db.pool(), "system_state", SYSTEM_STATE_KEY, &current).await?;

    Ok(merged)
}
