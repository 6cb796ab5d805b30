use aethelgard_core::Timeframe;
use aethelgard_scanner::ScanMode;
use anyhow::{Context, Result};
use std::env;

/// Bootstrap-only configuration (spec §6): everything the system reads at
/// *runtime* comes from `get_dynamic_params()`/`get_system_state()`; this
/// struct only seeds what those tables need to exist before the first read
/// (connection strings, which symbols to watch, process-level knobs).
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub database_url: String,
    pub discord_webhook_url: String,

    pub symbols: Vec<String>,
    pub timeframes: Vec<Timeframe>,
    pub scan_mode: ScanMode,
    pub scan_concurrency: usize,
    pub candle_count: usize,

    pub pending_timeout_minutes: i64,
    pub coherence_lookback_minutes: i64,
    pub shutdown_grace_period_secs: u64,
    pub min_sleep_interval_secs: u64,

    pub account_id: String,
}

fn parse_timeframes(raw: &str) -> Result<Vec<Timeframe>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| Timeframe::from_str_opt(s).with_context(|| format!("unknown timeframe {s}")))
        .collect()
}

fn parse_scan_mode(raw: &str) -> Result<ScanMode> {
    match raw.to_ascii_uppercase().as_str() {
        "ECO" => Ok(ScanMode::Eco),
        "STANDARD" => Ok(ScanMode::Standard),
        "AGGRESSIVE" => Ok(ScanMode::Aggressive),
        other => anyhow::bail!("unknown scanner.mode {other}"),
    }
}

impl AgentConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:aethelgard.db".to_string()),
            discord_webhook_url: env::var("DISCORD_WEBHOOK_URL").unwrap_or_default(),

            symbols: env::var("SYMBOLS")
                .unwrap_or_else(|_| "EURUSD,GBPUSD,USDJPY,XAUUSD".to_string())
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            timeframes: parse_timeframes(
                &env::var("TIMEFRAMES").unwrap_or_else(|_| "M15,H1,H4".to_string()),
            )?,
            scan_mode: parse_scan_mode(
                &env::var("SCANNER_MODE").unwrap_or_else(|_| "STANDARD".to_string()),
            )?,
            scan_concurrency: env::var("SCAN_CONCURRENCY")
                .unwrap_or_else(|_| "12".to_string())
                .parse()?,
            candle_count: env::var("CANDLE_COUNT")
                .unwrap_or_else(|_| "250".to_string())
                .parse()?,

            pending_timeout_minutes: env::var("PENDING_TIMEOUT_MINUTES")
                .unwrap_or_else(|_| "15".to_string())
                .parse()?,
            coherence_lookback_minutes: env::var("COHERENCE_LOOKBACK_MINUTES")
                .unwrap_or_else(|_| "120".to_string())
                .parse()?,
            shutdown_grace_period_secs: env::var("SHUTDOWN_GRACE_PERIOD_SECS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()?,
            min_sleep_interval_secs: env::var("MIN_SLEEP_INTERVAL_SECS")
                .unwrap_or_else(|_| "1".to_string())
                .parse()?,

            account_id: env::var("ACCOUNT_ID").unwrap_or_else(|_| "default".to_string()),
        })
    }
}
