use aethelgard_core::{AethelgardError, SystemState};
use aethelgard_storage::Storage;
use chrono::{Duration, Utc};
use rust_decimal::Decimal;

/// Lockdown state machine (spec §4.4): OPEN -> LOCKED on `consecutive_losses
/// >= threshold`; LOCKED -> OPEN on a winning trade, 24h of rest since the
/// last trade, or balance recovered to >= 102% of `lockdown_balance`.
///
/// `SystemState` has no separate "last trade time" field; while locked, no
/// new trades execute (the governor blocks them), so the trade that tripped
/// the lockdown is necessarily the last trade — `lockdown_date` doubles as
/// that timestamp.
pub async fn is_locked(storage: &Storage, current_balance: Decimal) -> Result<bool, AethelgardError> {
    let state = maybe_unlock(storage, current_balance).await?;
    Ok(state.lockdown_mode)
}

/// Evaluate the two time/balance-based unlock conditions and persist the
/// transition if either fires. Always safe to call even when not locked.
pub async fn maybe_unlock(storage: &Storage, current_balance: Decimal) -> Result<SystemState, AethelgardError> {
    let state = storage.get_system_state().await?;
    if !state.lockdown_mode {
        return Ok(state);
    }

    let rested_24h = state
        .lockdown_date
        .map(|since| Utc::now() - since >= Duration::hours(24))
        .unwrap_or(false);

    let recovered = state
        .lockdown_balance
        .map(|balance| current_balance >= balance * Decimal::new(102, 2))
        .unwrap_or(false);

    if rested_24h || recovered {
        storage
            .update_system_state(serde_json::json!({
                "lockdown_mode": false,
                "lockdown_date": null,
                "lockdown_balance": null,
            }))
            .await
    } else {
        Ok(state)
    }
}

/// `record_trade_result` side of the state machine: updates
/// `consecutive_losses` and activates lockdown when the threshold is
/// reached. Winning trades always clear `consecutive_losses` and lift any
/// active lockdown immediately.
pub async fn apply_trade_result(
    storage: &Storage,
    is_win: bool,
    current_balance: Decimal,
    max_consecutive_losses: u32,
) -> Result<SystemState, AethelgardError> {
    let state = storage.get_system_state().await?;

    if is_win {
        return storage
            .update_system_state(serde_json::json!({
                "consecutive_losses": 0,
                "lockdown_mode": false,
                "lockdown_date": null,
                "lockdown_balance": null,
            }))
            .await;
    }

    let consecutive_losses = state.consecutive_losses + 1;
    if consecutive_losses >= max_consecutive_losses && !state.lockdown_mode {
        storage
            .update_system_state(serde_json::json!({
                "consecutive_losses": consecutive_losses,
                "lockdown_mode": true,
                "lockdown_date": Utc::now(),
                "lockdown_balance": current_balance.to_string(),
            }))
            .await
    } else {
        storage
            .update_system_state(serde_json::json!({ "consecutive_losses": consecutive_losses }))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn three_losses_trigger_lockdown() {
        let storage = Storage::connect("sqlite::memory:").await.unwrap();
        for _ in 0..3 {
            apply_trade_result(&storage, false, dec!(9000), 3).await.unwrap();
        }
        assert!(is_locked(&storage, dec!(9000)).await.unwrap());
    }

    #[tokio::test]
    async fn win_clears_lockdown() {
        let storage = Storage::connect("sqlite::memory:").await.unwrap();
        for _ in 0..3 {
            apply_trade_result(&storage, false, dec!(9000), 3).await.unwrap();
        }
        assert!(is_locked(&storage, dec!(9000)).await.unwrap());

        apply_trade_result(&storage, true, dec!(9100), 3).await.unwrap();
        assert!(!is_locked(&storage, dec!(9100)).await.unwrap());
    }

    #[tokio::test]
    async fn balance_recovery_unlocks() {
        let storage = Storage::connect("sqlite::memory:").await.unwrap();
        for _ in 0..3 {
            apply_trade_result(&storage, false, dec!(10000), 3).await.unwrap();
        }
        assert!(is_locked(&storage, dec!(10000)).await.unwrap());

        // 102% of 10000 = 10200
        assert!(!is_locked(&storage, dec!(10300)).await.unwrap());
    }
}
