use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::api::models::{DEFAULT_ASSET_URL_TEMPLATE, DEFAULT_QUERY_URL, DEFAULT_USER_AGENT};
use crate::api::ApiConfig;
use crate::application::ManagerSettings;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub download_dir: PathBuf,
    pub log_level: String,
    pub use_cache_check: bool,
    pub auto_download: bool,
    pub grace_period_ms: u64,
    pub batch_delay_ms: u64,
    pub query_url: String,
    pub asset_url_template: String,
    pub user_agent: String,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        Self::load(Some("vsix-fetch"))
    }

    fn load(file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            // Default settings
            .set_default("download_dir", "./downloads")?
            .set_default("log_level", "info")?
            .set_default("use_cache_check", true)?
            .set_default("auto_download", true)?
            .set_default("grace_period_ms", 3000)?
            .set_default("batch_delay_ms", 1000)?
            .set_default("query_url", DEFAULT_QUERY_URL)?
            .set_default("asset_url_template", DEFAULT_ASSET_URL_TEMPLATE)?
            .set_default("user_agent", DEFAULT_USER_AGENT)?;

        // Config file (optional)
        if let Some(name) = file {
            builder = builder.add_source(File::with_name(name).required(false));
        }

        // Environment variables (e.g. VSIX_FETCH_DOWNLOAD_DIR=/tmp/vsix)
        builder
            .add_source(Environment::with_prefix("VSIX_FETCH"))
            .build()?
            .try_deserialize()
    }

    pub fn api_config(&self) -> ApiConfig {
        ApiConfig {
            query_url: self.query_url.clone(),
            asset_url_template: self.asset_url_template.clone(),
            user_agent: self.user_agent.clone(),
        }
    }

    pub fn manager_settings(&self) -> ManagerSettings {
        ManagerSettings {
            use_cache_check: self.use_cache_check,
            auto_download: self.auto_download,
            grace_period: Duration::from_millis(self.grace_period_ms),
        }
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::load(None).unwrap();
        assert_eq!(settings.grace_period_ms, 3000);
        assert_eq!(settings.batch_delay(), Duration::from_secs(1));
        assert_eq!(settings.query_url, DEFAULT_QUERY_URL);

        let manager = settings.manager_settings();
        assert_eq!(manager.grace_period, Duration::from_secs(3));
        assert_eq!(settings.api_config().user_agent, "VSIX Downloader/1.0");
    }
}
