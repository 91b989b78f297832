use crate::config::AppConfig;
use anyhow::Result;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use std::path::Path;

pub const DEFAULT_CONFIG_PATH: &str = "config/Wheel.toml";

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads configuration from `config/Wheel.toml` and `WHEEL_` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be parsed or the result fails validation.
    pub fn load() -> Result<AppConfig> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Loads configuration layered as defaults, then the TOML file at `path`,
    /// then environment variables (`WHEEL_RISK__MAX_POSITION_PCT=0.05`).
    ///
    /// A missing file is not an error; the defaults apply.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be parsed or the result fails validation.
    pub fn load_from(path: impl AsRef<Path>) -> Result<AppConfig> {
        let config: AppConfig = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("WHEEL_").split("__"))
            .extract()?;

        config.validate()?;
        Ok(config)
    }
}
