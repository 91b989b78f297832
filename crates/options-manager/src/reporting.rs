//! Dashboard snapshots and where they go.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use wheel_core::{Alert, Sector};
use wheel_ib::Position;

use crate::black_swan::{BlackSwanState, ProtectiveStop};
use crate::circuit_breaker::CircuitBreakerState;
use crate::decisions::DecisionSummary;
use crate::execution_quality::ExecutionQualitySummary;
use crate::performance::PerformanceMetrics;
use crate::regime::MarketRegime;
use crate::scanner::Opportunity;
use crate::win_streak::WinStreak;

/// Risk state as of one pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskSnapshot {
    pub circuit_breaker: CircuitBreakerState,
    pub black_swan: BlackSwanState,
    pub win_streak: WinStreak,
    pub regime: Option<MarketRegime>,
    pub vix: Option<f64>,
    pub avg_correlation: Option<f64>,
    pub sector_allocations: BTreeMap<Sector, Decimal>,
    pub protective_stops: Vec<ProtectiveStop>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardSnapshot {
    pub generated_at: DateTime<Utc>,
    pub account_value: Option<Decimal>,
    pub positions: Vec<Position>,
    pub metrics: PerformanceMetrics,
    pub alerts: Vec<Alert>,
    pub opportunities: Vec<Opportunity>,
    pub decisions: DecisionSummary,
    pub execution: ExecutionQualitySummary,
    pub risk: RiskSnapshot,
}

/// Receives a snapshot at the end of every pass.
#[async_trait]
pub trait ReportingSink: Send + Sync {
    async fn publish(&self, snapshot: &DashboardSnapshot) -> Result<()>;
}

/// Logs a one-line summary of each snapshot.
pub struct TracingSink;

#[async_trait]
impl ReportingSink for TracingSink {
    async fn publish(&self, snapshot: &DashboardSnapshot) -> Result<()> {
        info!(
            positions = snapshot.positions.len(),
            opportunities = snapshot.opportunities.len(),
            decisions_executed = snapshot.decisions.executed,
            decisions_remaining = snapshot.decisions.remaining,
            fill_rate = snapshot.execution.fill_rate,
            breaker_active = snapshot.risk.circuit_breaker.active,
            black_swan = ?snapshot.risk.black_swan.phase,
            win_streak = snapshot.risk.win_streak.consecutive_wins,
            warnings = snapshot.risk.warnings.len(),
            "Dashboard snapshot"
        );
        Ok(())
    }
}

/// Writes each snapshot as pretty JSON, replacing the previous one.
pub struct JsonFileSink {
    path: PathBuf,
}

impl JsonFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ReportingSink for JsonFileSink {
    async fn publish(&self, snapshot: &DashboardSnapshot) -> Result<()> {
        let body = serde_json::to_vec_pretty(snapshot).context("serializing dashboard snapshot")?;
        tokio::fs::write(&self.path, body)
            .await
            .with_context(|| format!("writing dashboard to {}", self.path.display()))
    }
}
