use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;
use url::Url;

use crate::auth::LoginConfig;
use crate::client::ClientConfig;
use crate::extract::{ExtractConfig, FilterConfig};
use crate::fetch::FetchConfig;
use crate::matcher::MatchConfig;
use crate::notify::NotifyConfig;
use crate::otp::OtpConfig;
use crate::session::SessionConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub watch: WatchConfig,
    #[serde(default)]
    pub matching: MatchConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub otp: OtpConfig,
    #[serde(default)]
    pub login: LoginConfig,
    #[serde(default)]
    pub extract: ExtractConfig,
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Listing URL the run starts from.
    pub start_url: String,
    /// Watch-list terms; fixed for the whole run.
    pub terms: Vec<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            // Start with default configuration
            .add_source(File::with_name("config/default"))
            // Add environment-specific config
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Add local config (ignored by git)
            .add_source(File::with_name("config/local").required(false))
            // Add environment variables with prefix "SHELFWATCH_"
            .add_source(Environment::with_prefix("SHELFWATCH").separator("__"))
            .build()?;

        let config: AppConfig = s.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if Url::parse(&self.watch.start_url).is_err() {
            return Err(ConfigError::Message("Invalid watch.start_url".into()));
        }

        if self.watch.terms.is_empty() {
            return Err(ConfigError::Message(
                "watch.terms must name at least one item".into(),
            ));
        }

        if !(0.0..=1.0).contains(&self.matching.similarity_threshold)
            || self.matching.similarity_threshold == 0.0
        {
            return Err(ConfigError::Message(
                "matching.similarity_threshold must be in (0, 1]".into(),
            ));
        }

        if !(0.0..=1.0).contains(&self.matching.significant_coverage)
            || self.matching.significant_coverage == 0.0
        {
            return Err(ConfigError::Message(
                "matching.significant_coverage must be in (0, 1]".into(),
            ));
        }

        if !(0.0..=1.0).contains(&self.matching.near_miss_threshold) {
            return Err(ConfigError::Message(
                "matching.near_miss_threshold must be in [0, 1]".into(),
            ));
        }

        if self.session.max_retries == 0 {
            return Err(ConfigError::Message(
                "session.max_retries must be greater than 0".into(),
            ));
        }

        if self.session.backoff_cap_ms < self.session.backoff_base_ms {
            return Err(ConfigError::Message(
                "session.backoff_cap_ms cannot be below backoff_base_ms".into(),
            ));
        }

        if self.fetch.page_count == 0 {
            return Err(ConfigError::Message(
                "fetch.page_count must be greater than 0".into(),
            ));
        }

        if self.fetch.entries_per_page == 0 {
            return Err(ConfigError::Message(
                "fetch.entries_per_page must be greater than 0".into(),
            ));
        }

        if self.fetch.jitter_min_ms > self.fetch.jitter_max_ms {
            return Err(ConfigError::Message(
                "fetch.jitter_min_ms cannot exceed jitter_max_ms".into(),
            ));
        }

        if self.fetch.page_count > 1 && !self.fetch.page_url_template.contains("{offset}") {
            return Err(ConfigError::Message(
                "fetch.page_url_template needs an {offset} placeholder".into(),
            ));
        }

        if self.client.request_timeout == 0 {
            return Err(ConfigError::Message(
                "client.request_timeout must be greater than 0".into(),
            ));
        }

        if self.client.block_url_markers.is_empty() {
            return Err(ConfigError::Message(
                "client.block_url_markers must not be empty".into(),
            ));
        }

        if self.otp.max_attempts == 0 || self.otp.scan_limit == 0 {
            return Err(ConfigError::Message(
                "otp.max_attempts and otp.scan_limit must be greater than 0".into(),
            ));
        }

        if self.otp.expected_sender.trim().is_empty() {
            return Err(ConfigError::Message(
                "otp.expected_sender must not be empty".into(),
            ));
        }

        if self.extract.entry_selectors.is_empty() {
            return Err(ConfigError::Message(
                "extract.entry_selectors must not be empty".into(),
            ));
        }

        Ok(())
    }
}
