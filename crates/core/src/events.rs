use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Alert urgency. Determines which channels an alert escalates to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertPriority {
    Info,
    Important,
    Critical,
}

impl std::fmt::Display for AlertPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Important => write!(f, "IMPORTANT"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Delivery medium of a notification channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Push,
    Email,
    Sms,
}

impl ChannelKind {
    /// Channels an alert of `priority` escalates to.
    pub fn escalation(priority: AlertPriority) -> &'static [ChannelKind] {
        match priority {
            AlertPriority::Critical => &[ChannelKind::Sms, ChannelKind::Email, ChannelKind::Push],
            AlertPriority::Important => &[ChannelKind::Email, ChannelKind::Push],
            AlertPriority::Info => &[ChannelKind::Push],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub priority: AlertPriority,
    pub title: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl Alert {
    pub fn new(priority: AlertPriority, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            priority,
            title: title.into(),
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn critical(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(AlertPriority::Critical, title, message)
    }

    pub fn important(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(AlertPriority::Important, title, message)
    }

    pub fn info(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(AlertPriority::Info, title, message)
    }
}
