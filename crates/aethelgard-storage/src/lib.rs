pub mod assets;
pub mod coherence;
pub mod db;
pub mod positions;
pub mod signals;
pub mod state;
pub mod trades;

pub use coherence::MarketStateEntry;
pub use signals::SignalFilter;

use aethelgard_core::{
    AethelgardError, AssetProfile, CoherenceEvent, DynamicParameters, MarketRegime,
    PositionMetadata, Signal, SignalStatus, SignalType, SystemState, Timeframe, TradeResult,
};
use rust_decimal::Decimal;
use std::collections::HashMap;
use uuid::Uuid;

/// Single source of truth for every durable entity in the system (spec
/// §4.1). Every other component reaches the database only through this
/// handle; no component peeks at another's internal state.
#[derive(Clone)]
pub struct Storage {
    db: db::Db,
}

impl Storage {
    pub async fn connect(database_url: &str) -> Result<Self, AethelgardError> {
        let db = db::Db::connect(database_url)
            .await
            .map_err(|e| AethelgardError::Storage(e.to_string()))?;
        Ok(Self { db })
    }

    pub async fn save_signal(&self, signal: &Signal) -> Result<Uuid, AethelgardError> {
        signals::save_signal(&self.db, signal).await
    }

    pub async fn update_signal_status(
        &self,
        id: Uuid,
        new_status: SignalStatus,
        rejection_reason: Option<&str>,
        extra_metadata: Option<HashMap<String, serde_json::Value>>,
    ) -> Result<(), AethelgardError> {
        signals::update_signal_status(&self.db, id, new_status, rejection_reason, extra_metadata)
            .await
    }

    pub async fn get_signals(
        &self,
        filter: &SignalFilter,
    ) -> Result<Vec<Signal>, AethelgardError> {
        signals::get_signals(&self.db, filter).await
    }

    pub async fn get_signals_today(&self) -> Result<Vec<Signal>, AethelgardError> {
        signals::get_signals_today(&self.db).await
    }

    pub async fn get_recent_signals(&self, minutes: i64) -> Result<Vec<Signal>, AethelgardError> {
        signals::get_recent_signals(&self.db, minutes).await
    }

    pub async fn get_signal_by_id(&self, id: Uuid) -> Result<Option<Signal>, AethelgardError> {
        signals::get_signal_by_id(&self.db, id).await
    }

    pub async fn count_executed_signals(&self, date: &str) -> Result<i64, AethelgardError> {
        signals::count_executed_signals(&self.db, date).await
    }

    pub async fn has_open_position(&self, symbol: &str) -> Result<bool, AethelgardError> {
        signals::has_open_position(&self.db, symbol).await
    }

    pub async fn has_recent_signal(
        &self,
        symbol: &str,
        signal_type: SignalType,
        timeframe: Timeframe,
    ) -> Result<bool, AethelgardError> {
        signals::has_recent_signal(&self.db, symbol, signal_type, timeframe).await
    }

    pub async fn save_trade_result(&self, trade: &TradeResult) -> Result<(), AethelgardError> {
        trades::save_trade_result(&self.db, trade).await
    }

    pub async fn get_recent_trades(&self, limit: i64) -> Result<Vec<TradeResult>, AethelgardError> {
        trades::get_recent_trades(&self.db, limit).await
    }

    pub async fn get_win_rate(&self, days: i64) -> Result<f64, AethelgardError> {
        trades::get_win_rate(&self.db, days).await
    }

    pub async fn get_profit_by_symbol(
        &self,
        days: i64,
    ) -> Result<HashMap<String, Decimal>, AethelgardError> {
        trades::get_profit_by_symbol(&self.db, days).await
    }

    pub async fn update_position_metadata(
        &self,
        metadata: &PositionMetadata,
    ) -> Result<(), AethelgardError> {
        positions::update_position_metadata(&self.db, metadata).await
    }

    pub async fn get_position_metadata(
        &self,
        ticket: &str,
    ) -> Result<Option<PositionMetadata>, AethelgardError> {
        positions::get_position_metadata(&self.db, ticket).await
    }

    pub async fn rollback_position_modification(
        &self,
        ticket: &str,
    ) -> Result<(), AethelgardError> {
        positions::rollback_position_modification(&self.db, ticket).await
    }

    pub async fn get_system_state(&self) -> Result<SystemState, AethelgardError> {
        state::get_system_state(&self.db).await
    }

    pub async fn update_system_state(
        &self,
        patch: serde_json::Value,
    ) -> Result<SystemState, AethelgardError> {
        state::update_system_state(&self.db, patch).await
    }

    pub async fn get_dynamic_params(&self) -> Result<DynamicParameters, AethelgardError> {
        state::get_dynamic_params(&self.db).await
    }

    pub async fn update_dynamic_params(
        &self,
        patch: serde_json::Value,
    ) -> Result<DynamicParameters, AethelgardError> {
        state::update_dynamic_params(&self.db, patch).await
    }

    pub async fn get_asset_profile(
        &self,
        symbol: &str,
        trace_id: &str,
    ) -> Result<Option<AssetProfile>, AethelgardError> {
        assets::get_asset_profile(&self.db, symbol, trace_id).await
    }

    pub async fn log_coherence_event(
        &self,
        event: &CoherenceEvent,
        learning_opportunity: bool,
    ) -> Result<(), AethelgardError> {
        coherence::log_coherence_event(&self.db, event, learning_opportunity).await
    }

    pub async fn log_market_state(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        regime: MarketRegime,
        confidence: f64,
    ) -> Result<(), AethelgardError> {
        coherence::log_market_state(&self.db, symbol, timeframe, regime, confidence).await
    }

    pub async fn get_market_state_history(
        &self,
        symbol: &str,
        limit: i64,
    ) -> Result<Vec<MarketStateEntry>, AethelgardError> {
        coherence::get_market_state_history(&self.db, symbol, limit).await
    }
}
