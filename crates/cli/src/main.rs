use clap::{Parser, Subcommand};

mod commands;

use commands::{CheckEntryArgs, EngineArgs, ShowConfigArgs};

#[derive(Parser)]
#[command(name = "wheel")]
#[command(about = "Risk and decision engine for the options wheel strategy", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Screen a cash-secured put against every entry criterion
    CheckEntry(CheckEntryArgs),
    /// Risk pass, decisions for open positions, and the opportunity scan
    Morning(EngineArgs),
    /// Risk pass, then execute pending decisions within the daily budget
    Afternoon(EngineArgs),
    /// Run the monitoring loop, reloading the config file on change
    Monitor(EngineArgs),
    /// Print the effective configuration after file and env overrides
    ShowConfig(ShowConfigArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match cli.command {
        Commands::CheckEntry(args) => commands::run_check_entry(args).await?,
        Commands::Morning(args) => commands::run_morning(args).await?,
        Commands::Afternoon(args) => commands::run_afternoon(args).await?,
        Commands::Monitor(args) => commands::run_monitor(args).await?,
        Commands::ShowConfig(args) => commands::run_show_config(&args)?,
    }

    Ok(())
}
