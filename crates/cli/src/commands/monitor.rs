//! Long-running monitor with config hot reload.

use anyhow::Result;
use tracing::info;

use super::engine::EngineArgs;

/// Runs monitoring passes until Ctrl+C, an invariant violation, or a
/// config watcher failure.
pub async fn run_monitor(args: EngineArgs) -> Result<()> {
    let session = args.session().await?;
    info!("Press Ctrl+C to stop");

    tokio::select! {
        res = session.engine.run() => res,
        res = session.watcher.watch(args.config.clone()) => res,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
            Ok(())
        }
    }
}
