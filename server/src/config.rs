use anyhow::{Context, Result};
use platform_db::DatabaseSettings;
use platform_obs::ObsConfig;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseSettings,
    pub obs: ObsConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        let database = DatabaseSettings::from_env().context("invalid database settings")?;
        Ok(Self {
            database,
            obs: ObsConfig::from_env(),
        })
    }
}
