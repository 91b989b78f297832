//! Arguments shared by every command that drives the engine.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use tracing::info;

use wheel_core::config_loader::DEFAULT_CONFIG_PATH;
use wheel_core::{ConfigLoader, ConfigWatcher};
use wheel_ib::{BrokerageGateway, MarketDataGateway, PaperGateway};
use wheel_options_manager::executor::exchange_date;
use wheel_options_manager::{JsonFileSink, WheelEngine};

#[derive(Args, Debug, Clone)]
pub struct EngineArgs {
    /// Config file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: String,

    /// Paper market fixture (JSON) backing the market data and brokerage gateways
    #[arg(long, env = "WHEEL_PAPER_FIXTURE")]
    pub paper: PathBuf,

    /// Write each dashboard snapshot to this JSON file
    #[arg(long)]
    pub dashboard: Option<PathBuf>,

    /// Evaluate as of this RFC 3339 timestamp instead of the current time
    #[arg(long)]
    pub at: Option<DateTime<Utc>>,
}

pub struct Session {
    pub engine: WheelEngine,
    pub watcher: ConfigWatcher,
    pub now: DateTime<Utc>,
}

impl EngineArgs {
    /// Loads config and fixture and builds an engine seeded with the
    /// current account value.
    pub async fn session(&self) -> Result<Session> {
        let config = ConfigLoader::load_from(&self.config)?;
        let gateway = Arc::new(PaperGateway::from_json_file(&self.paper)?);
        let starting_value = gateway
            .account_value()
            .await
            .context("reading starting account value")?;
        let now = self.at.unwrap_or_else(Utc::now);
        let today = exchange_date(now, &config.execution)?;

        info!(
            config = %self.config,
            paper = %self.paper.display(),
            %starting_value,
            %today,
            "Engine session"
        );

        let (watcher, rx) = ConfigWatcher::new(config);
        let market: Arc<dyn MarketDataGateway> = gateway.clone();
        let broker: Arc<dyn BrokerageGateway> = gateway;
        let mut engine = WheelEngine::new(market, broker, rx, starting_value, today);
        if let Some(path) = &self.dashboard {
            engine = engine.with_sink(Arc::new(JsonFileSink::new(path)));
        }
        Ok(Session { engine, watcher, now })
    }
}
