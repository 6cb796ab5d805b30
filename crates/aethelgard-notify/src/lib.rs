use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Notification tiers a signal or system event carries (spec §4.3: only
/// tier >= Premium triggers a dispatch). Ordered low to high so callers can
/// compare with `>=`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NotificationTier {
    Standard,
    Premium,
    Critical,
}

/// Events the system emits to operators. Kept deliberately small — the
/// orchestrator, not this crate, decides what counts as noteworthy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum NotificationEvent {
    SignalGenerated {
        symbol: String,
        direction: String,
        confidence: f64,
        tier: NotificationTier,
    },
    TradeExecuted {
        symbol: String,
        direction: String,
        lots: String,
        ticket: String,
    },
    TradeRejected {
        symbol: String,
        reason: String,
    },
    LockdownTriggered {
        reason: String,
        consecutive_losses: i32,
    },
    LockdownCleared {
        reason: String,
    },
    PositionClosed {
        symbol: String,
        ticket: String,
        pnl_usd: String,
        reason: String,
    },
    DailyReport {
        date: String,
        pnl_usd: String,
        trades_count: i32,
        win_rate: f64,
    },
}

/// A notification ready to dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub event: NotificationEvent,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub title: String,
    pub message: String,
}

impl Notification {
    pub fn new(event: NotificationEvent, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            event,
            timestamp: chrono::Utc::now(),
            title: title.into(),
            message: message.into(),
        }
    }
}

/// Errors from dispatching a notification.
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("webhook error: {0}")]
    Webhook(String),
    #[error("configuration error: {0}")]
    Config(String),
}

/// A destination for notifications. Every connector-agnostic alerting
/// surface (Discord, Slack, a generic webhook) implements this trait
/// directly, with no notion of email or SMTP.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<(), NotificationError>;
    fn name(&self) -> &str;
}

fn embed_color(event: &NotificationEvent) -> u32 {
    match event {
        NotificationEvent::SignalGenerated { .. } => 0x0099ff,
        NotificationEvent::TradeExecuted { direction, .. } => {
            if direction == "BUY" {
                0x00ff00
            } else {
                0xff0000
            }
        }
        NotificationEvent::TradeRejected { .. } => 0xff6600,
        NotificationEvent::LockdownTriggered { .. } => 0xff0000,
        NotificationEvent::LockdownCleared { .. } => 0x00ff00,
        NotificationEvent::PositionClosed { pnl_usd, .. } => {
            if pnl_usd.starts_with('-') {
                0xff0000
            } else {
                0x00ff00
            }
        }
        NotificationEvent::DailyReport { pnl_usd, .. } => {
            if pnl_usd.starts_with('-') {
                0xff0000
            } else {
                0x00ff00
            }
        }
    }
}

/// Discord webhook notifier. The default and, for now, only concrete
/// implementation — a thin POST to a webhook URL, no bot token or gateway
/// connection involved.
pub struct DiscordNotifier {
    client: reqwest::Client,
    webhook_url: String,
}

impl DiscordNotifier {
    pub fn new(webhook_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            webhook_url: webhook_url.into(),
        }
    }

    /// Builds from `DISCORD_WEBHOOK_URL`. Returns `None` if unset or empty,
    /// which callers treat as "notifications disabled" rather than an error.
    pub fn from_env() -> Option<Self> {
        std::env::var("DISCORD_WEBHOOK_URL")
            .ok()
            .filter(|s| !s.is_empty())
            .map(Self::new)
    }
}

#[async_trait]
impl Notifier for DiscordNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotificationError> {
        if self.webhook_url.is_empty() {
            return Ok(());
        }

        let payload = serde_json::json!({
            "embeds": [{
                "title": notification.title,
                "description": notification.message,
                "color": embed_color(&notification.event),
                "timestamp": notification.timestamp.to_rfc3339(),
            }]
        });

        self.client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| NotificationError::Webhook(e.to_string()))?;

        Ok(())
    }

    fn name(&self) -> &str {
        "discord-webhook"
    }
}

/// Fans a notification out to every configured notifier, logging but not
/// propagating individual failures — a dropped alert must never interrupt
/// the trading loop.
pub struct NotificationHub {
    notifiers: Vec<Box<dyn Notifier>>,
}

impl NotificationHub {
    pub fn new(notifiers: Vec<Box<dyn Notifier>>) -> Self {
        Self { notifiers }
    }

    pub fn from_env() -> Self {
        let mut notifiers: Vec<Box<dyn Notifier>> = Vec::new();
        if let Some(discord) = DiscordNotifier::from_env() {
            tracing::info!("Discord webhook notifications enabled");
            notifiers.push(Box::new(discord));
        }
        if notifiers.is_empty() {
            tracing::info!("No notification channels configured (set DISCORD_WEBHOOK_URL)");
        }
        Self::new(notifiers)
    }

    pub async fn dispatch(&self, notification: &Notification) {
        for notifier in &self.notifiers {
            if let Err(e) = notifier.notify(notification).await {
                tracing::warn!("failed to send notification via {}: {}", notifier.name(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_ordering_allows_threshold_comparison() {
        assert!(NotificationTier::Premium >= NotificationTier::Premium);
        assert!(NotificationTier::Critical >= NotificationTier::Premium);
        assert!(NotificationTier::Standard < NotificationTier::Premium);
    }

    #[test]
    fn discord_notifier_from_env_none_when_unset() {
        std::env::remove_var("DISCORD_WEBHOOK_URL");
        assert!(DiscordNotifier::from_env().is_none());
    }

    #[tokio::test]
    async fn empty_webhook_url_is_a_silent_no_op() {
        let notifier = DiscordNotifier::new("");
        let notification = Notification::new(
            NotificationEvent::TradeRejected {
                symbol: "EURUSD".to_string(),
                reason: "test".to_string(),
            },
            "title",
            "message",
        );
        assert!(notifier.notify(&notification).await.is_ok());
    }
}
