//! Entry check CLI command.

use anyhow::Result;
use clap::Args;
use rust_decimal::Decimal;

use wheel_options_manager::EntryRequest;

use super::engine::EngineArgs;

/// Arguments for the check-entry command.
#[derive(Args, Debug, Clone)]
pub struct CheckEntryArgs {
    /// Underlying symbol (e.g., "AAPL")
    #[arg(long)]
    pub symbol: String,

    /// Put strike
    #[arg(long)]
    pub strike: Decimal,

    /// Contracts to sell
    #[arg(long, default_value_t = 1)]
    pub contracts: u32,

    #[command(flatten)]
    pub engine: EngineArgs,
}

pub async fn run_check_entry(args: CheckEntryArgs) -> Result<()> {
    let session = args.engine.session().await?;
    let request = EntryRequest::new(args.symbol.clone(), args.strike).with_contracts(args.contracts);
    let verdict = session.engine.check_entry(&request, session.now).await?;

    println!("\n{}", "=".repeat(60));
    println!(
        "Entry check: {} {}P x{} (notional ${:.0})",
        request.symbol,
        request.strike,
        request.contracts,
        request.notional()
    );
    println!("{}", "=".repeat(60));
    if verdict.approved {
        println!("APPROVED");
    } else {
        println!("REJECTED");
        for issue in &verdict.issues {
            println!("  - {issue}");
        }
    }
    Ok(())
}
