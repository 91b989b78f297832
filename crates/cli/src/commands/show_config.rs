//! Prints the configuration the engine would run with.

use anyhow::Result;
use clap::Args;

use wheel_core::config_loader::DEFAULT_CONFIG_PATH;
use wheel_core::ConfigLoader;

#[derive(Args, Debug, Clone)]
pub struct ShowConfigArgs {
    /// Config file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: String,
}

pub fn run_show_config(args: &ShowConfigArgs) -> Result<()> {
    let config = ConfigLoader::load_from(&args.config)?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
