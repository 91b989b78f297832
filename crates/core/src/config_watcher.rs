use crate::config::AppConfig;
use crate::config_loader::ConfigLoader;
use anyhow::{Context, Result};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tokio::sync::watch;
use tracing::{debug, error, info};

/// Publishes a fresh `AppConfig` whenever the config file changes.
///
/// Consumers hold a `watch::Receiver` and snapshot it at the start of each
/// pass, so a reload never changes limits halfway through an evaluation.
pub struct ConfigWatcher {
    tx: watch::Sender<AppConfig>,
}

impl ConfigWatcher {
    /// Returns the watcher and the receiver the engine reads from.
    #[must_use]
    pub fn new(initial: AppConfig) -> (Self, watch::Receiver<AppConfig>) {
        let (tx, rx) = watch::channel(initial);
        (Self { tx }, rx)
    }

    /// Another receiver on the same config.
    pub fn subscribe(&self) -> watch::Receiver<AppConfig> {
        self.tx.subscribe()
    }

    /// Loads `path` and publishes it. A file that fails to parse or
    /// validate leaves the current config in place.
    ///
    /// Returns whether a new config was published.
    pub fn reload(&self, path: &Path) -> bool {
        match ConfigLoader::load_from(path) {
            Ok(config) => {
                info!(
                    path = %path.display(),
                    max_daily_decisions = config.decisions.max_daily_decisions,
                    drawdown_stop = %config.risk.drawdown_stop,
                    "Risk thresholds reloaded"
                );
                self.tx.send_replace(config);
                true
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "Config reload rejected, keeping previous thresholds");
                false
            }
        }
    }

    /// Watches `config_path` until the watcher fails.
    ///
    /// The parent directory is watched rather than the file itself, since
    /// editors that save by rename would otherwise detach the watch.
    ///
    /// # Errors
    ///
    /// Returns an error if file watching cannot be set up or the watcher task fails.
    pub async fn watch(&self, config_path: impl Into<PathBuf>) -> Result<()> {
        let path = config_path.into();
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let file_name = path
            .file_name()
            .map(ToOwned::to_owned)
            .with_context(|| format!("config path {} has no file name", path.display()))?;

        let (events_tx, mut events_rx) = tokio::sync::mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            if let Ok(event) = res {
                let _ = events_tx.send(event);
            }
        })?;
        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("watching {}", dir.display()))?;
        info!(path = %path.display(), "Watching config for changes");

        while let Some(event) = events_rx.recv().await {
            if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                continue;
            }
            if !event.paths.iter().any(|p| p.file_name() == Some(file_name.as_os_str())) {
                continue;
            }
            debug!(kind = ?event.kind, "Config file event");
            self.reload(&path);
        }
        Ok(())
    }
}
