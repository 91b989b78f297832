use crate::events::{Alert, AlertPriority, ChannelKind};
use anyhow::Result;
use async_trait::async_trait;

/// A destination for alerts (push, email, SMS).
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn kind(&self) -> ChannelKind;
    async fn send(&self, alert: &Alert) -> Result<()>;
}

/// Channel that writes alerts to the tracing log.
///
/// Useful as a stand-in for any medium that is not wired up yet.
pub struct LogChannel {
    kind: ChannelKind,
}

impl LogChannel {
    #[must_use]
    pub fn new(kind: ChannelKind) -> Self {
        Self { kind }
    }
}

#[async_trait]
impl NotificationChannel for LogChannel {
    fn kind(&self) -> ChannelKind {
        self.kind
    }

    async fn send(&self, alert: &Alert) -> Result<()> {
        match alert.priority {
            AlertPriority::Critical => tracing::error!(
                channel = ?self.kind,
                title = %alert.title,
                "{}",
                alert.message
            ),
            AlertPriority::Important => tracing::warn!(
                channel = ?self.kind,
                title = %alert.title,
                "{}",
                alert.message
            ),
            AlertPriority::Info => tracing::info!(
                channel = ?self.kind,
                title = %alert.title,
                "{}",
                alert.message
            ),
        }
        Ok(())
    }
}
