//! Morning routine and afternoon check-in commands.

use anyhow::Result;

use wheel_options_manager::service::{DecisionOutcome, RiskReport};
use wheel_options_manager::DecisionSummary;

use super::engine::EngineArgs;

fn rule(title: &str) {
    println!("\n{}", "=".repeat(70));
    println!("{title}");
    println!("{}", "=".repeat(70));
}

fn print_risk(risk: &RiskReport) {
    if let Some(account) = &risk.account {
        println!(
            "Account: ${:.2} net liq, ${:.2} cash",
            account.net_liquidation, account.total_cash
        );
    }
    let regime = risk
        .regime
        .map_or_else(|| "unknown".to_string(), |r| r.to_string());
    let vix = risk.vix.map_or_else(|| "n/a".to_string(), |v| format!("{v:.1}"));
    println!("Regime: {regime}  VIX: {vix}  Positions: {}", risk.positions.len());

    if !risk.sector_allocations.is_empty() {
        println!("\nSector allocation:");
        for (sector, pct) in &risk.sector_allocations {
            println!("  {:<24} {:>6.1}%", sector.to_string(), pct * rust_decimal::Decimal::from(100));
        }
    }

    if !risk.adjustments.is_empty() {
        println!("\nAdjustments:");
        println!("{:<8} {:<20} {:<10} Reason", "Symbol", "Action", "Priority");
        println!("{}", "-".repeat(70));
        for adj in &risk.adjustments {
            println!(
                "{:<8} {:<20} {:<10} {}",
                adj.symbol(),
                adj.action.to_string(),
                adj.priority.to_string(),
                adj.reason
            );
        }
    }

    for close in &risk.forced_closes {
        println!(
            "Forced close {}: {} ({})",
            close.position,
            close.result,
            close.note.as_deref().unwrap_or(&close.reason)
        );
    }
    for stop in &risk.protective_stops {
        println!(
            "Protective stop {} x{} at ${:.2} (last ${:.2})",
            stop.symbol, stop.shares, stop.stop_price, stop.current_price
        );
    }
    for warning in &risk.warnings {
        println!("WARNING: {warning}");
    }
}

fn print_summary(summary: &DecisionSummary) {
    println!(
        "\nDecisions {}: {} made, {} executed, {} pending, {}/{} remaining",
        summary.date, summary.total_made, summary.executed, summary.pending, summary.remaining, summary.max_daily
    );
}

pub async fn run_morning(args: EngineArgs) -> Result<()> {
    let session = args.session().await?;
    let report = session.engine.morning_routine(session.now).await?;

    rule("Morning routine");
    print_risk(&report.risk);
    println!("\nRecorded {} decision(s)", report.recorded.len());

    if !report.opportunities.is_empty() {
        println!("\nOpportunities:");
        println!(
            "{:<8} {:>8} {:<12} {:>5} {:>8} {:>8} {:>10} Verdict",
            "Symbol", "Strike", "Expiry", "DTE", "Premium", "Annual", "Liquidity"
        );
        println!("{}", "-".repeat(70));
        for opp in &report.opportunities {
            let verdict = match &opp.verdict {
                Some(v) if v.approved => "approved".to_string(),
                Some(v) => v.issues.join("; "),
                None => "unchecked".to_string(),
            };
            println!(
                "{:<8} {:>8.2} {:<12} {:>5} {:>8.2} {:>7.1}% {:>10.0} {}",
                opp.symbol,
                opp.strike,
                opp.expiry.to_string(),
                opp.dte,
                opp.premium,
                opp.annual_return * 100.0,
                opp.liquidity_score,
                verdict
            );
        }
    }

    print_summary(&session.engine.decision_summary().await);
    Ok(())
}

pub async fn run_afternoon(args: EngineArgs) -> Result<()> {
    let session = args.session().await?;
    // A fresh process has no decisions from the morning, so record them first.
    session.engine.morning_routine(session.now).await?;
    let report = session.engine.afternoon_checkin(session.now).await?;

    rule("Afternoon check-in");
    print_risk(&report.risk);

    if !report.executions.is_empty() {
        println!("\nExecutions:");
        for record in &report.executions {
            let outcome = match &record.outcome {
                DecisionOutcome::Executed { result, note } => match note {
                    Some(note) => format!("{result} ({note})"),
                    None => result.to_string(),
                },
                DecisionOutcome::Deferred { reason } => format!("deferred: {reason}"),
            };
            println!("  #{:<4} {:<8} {:<20} {}", record.decision_id, record.symbol, record.action.to_string(), outcome);
        }
    }
    for item in &report.over_budget {
        println!("Over budget: {item}");
    }

    print_summary(&session.engine.decision_summary().await);
    Ok(())
}
