//! Shared configuration, error types and alert plumbing for the wheel engine.

pub mod config;
pub mod config_loader;
pub mod config_watcher;
pub mod error;
pub mod events;
pub mod sector;
pub mod traits;

pub use config::{
    AppConfig, BlackSwanConfig, CircuitBreakerConfig, DecisionConfig, ExecutionConfig,
    MarketConfig, RiskThresholds, ScannerConfig, ServiceConfig, TradingWindow, VixTier,
    WinStreakConfig,
};
pub use config_loader::ConfigLoader;
pub use config_watcher::ConfigWatcher;
pub use error::{BrokerError, DataUnavailable};
pub use events::{Alert, AlertPriority, ChannelKind};
pub use sector::Sector;
pub use traits::{LogChannel, NotificationChannel};
