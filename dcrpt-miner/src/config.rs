//! Configuration management for dcrpt-miner.
//!
//! Settings are layered: an optional TOML file, then `DCRPT__*` environment
//! variables, then explicit overrides (usually from the command line). Keys
//! that the classic configuration spelled `section:key`, such as
//! `periodic_report:initial_delay`, are nested tables here
//! (`[periodic_report] initial_delay = 30`, or
//! `DCRPT__PERIODIC_REPORT__INITIAL_DELAY=30`).

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use ext_config::{Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::{Error, Result};

/// Main configuration structure for the miner.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Pool login (wallet address, optionally with a `.worker` suffix)
    #[serde(default)]
    pub user: Option<String>,

    /// Pool password
    #[serde(default)]
    pub password: Option<String>,

    /// Pool URL or ordered list of failover URLs
    #[serde(default)]
    pub url: UrlSetting,

    /// Reconnect attempts a connection makes before giving up
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// What to do once every endpoint has given up
    #[serde(default)]
    pub action_after_retries_done: RetryAction,

    #[serde(default)]
    pub periodic_report: PeriodicReportConfig,

    #[serde(default)]
    pub gpu: DeviceConfig,

    #[serde(default)]
    pub cpu: DeviceConfig,

    #[serde(default)]
    pub api: ApiConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            user: None,
            password: None,
            url: UrlSetting::default(),
            retries: default_retries(),
            action_after_retries_done: RetryAction::default(),
            periodic_report: PeriodicReportConfig::default(),
            gpu: DeviceConfig::default(),
            cpu: DeviceConfig::default(),
            api: ApiConfig::default(),
        }
    }
}

/// The `url` key accepts either one string or a list of strings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum UrlSetting {
    One(String),
    Many(Vec<String>),
}

impl Default for UrlSetting {
    fn default() -> Self {
        UrlSetting::Many(Vec::new())
    }
}

/// Policy applied after the whole endpoint list has been tried once.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, Display, EnumString,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum RetryAction {
    /// Start over from the first endpoint after a pause
    #[default]
    Retry,
    Shutdown,
    Exit,
}

impl RetryAction {
    pub fn keeps_reconnecting(self) -> bool {
        self == RetryAction::Retry
    }
}

/// Timing of the periodic hashrate report, in seconds.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PeriodicReportConfig {
    #[serde(default = "default_initial_delay")]
    pub initial_delay: u64,

    #[serde(default = "default_report_interval")]
    pub report_interval: u64,
}

impl PeriodicReportConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.initial_delay)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval)
    }
}

impl Default for PeriodicReportConfig {
    fn default() -> Self {
        Self {
            initial_delay: default_initial_delay(),
            report_interval: default_report_interval(),
        }
    }
}

/// Hashing device family toggle.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DeviceConfig {
    #[serde(default)]
    pub enabled: bool,
}

/// Status API configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ApiConfig {
    /// Listen address; the API is disabled when unset
    #[serde(default)]
    pub listen: Option<SocketAddr>,
}

fn default_retries() -> u32 {
    5
}

fn default_initial_delay() -> u64 {
    30
}

fn default_report_interval() -> u64 {
    180
}

impl Config {
    /// Load configuration from an optional file plus the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_overrides(path, std::iter::empty::<(&str, String)>())
    }

    /// Load configuration, applying `overrides` on top of file and
    /// environment values.
    pub fn load_with_overrides<'a, I>(path: Option<&Path>, overrides: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, String)>,
    {
        let mut builder = ext_config::Config::builder();

        if let Some(path) = path {
            let path = path
                .to_str()
                .ok_or_else(|| Error::Config(format!("invalid path {}", path.display())))?;
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        }

        builder = builder.add_source(
            Environment::with_prefix("DCRPT")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        for (key, value) in overrides {
            builder = builder.set_override(key, value)?;
        }

        Ok(builder.build()?.try_deserialize::<Config>()?)
    }

    /// Parse configuration from TOML text (used by tests and tooling).
    pub fn from_toml(text: &str) -> Result<Self> {
        let settings = ext_config::Config::builder()
            .add_source(File::from_str(text, FileFormat::Toml))
            .build()?;
        Ok(settings.try_deserialize::<Config>()?)
    }

    /// Ordered endpoint list.
    ///
    /// A single flat `url` value replaces the list, which keeps one-pool
    /// command lines working. An empty result is a configuration error.
    pub fn endpoints(&self) -> Result<Vec<String>> {
        let urls: Vec<String> = match &self.url {
            UrlSetting::One(url) => vec![url.clone()],
            UrlSetting::Many(urls) => urls.clone(),
        }
        .into_iter()
        .map(|url| url.trim().to_string())
        .filter(|url| !url.is_empty())
        .collect();

        if urls.is_empty() {
            return Err(Error::Config("no pool url configured".into()));
        }

        Ok(urls)
    }

    /// Pool login, which must be present before a connection is attempted.
    pub fn credentials(&self) -> Result<(String, String)> {
        let user = self
            .user
            .as_deref()
            .filter(|user| !user.is_empty())
            .ok_or(Error::MissingCredentials("user"))?;
        Ok((user.to_string(), self.password.clone().unwrap_or_default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_defaults() {
        let config = Config::from_toml("user = \"wallet\"").unwrap();
        assert_eq!(config.retries, 5);
        assert_eq!(config.action_after_retries_done, RetryAction::Retry);
        assert_eq!(config.periodic_report.initial_delay(), Duration::from_secs(30));
        assert_eq!(config.periodic_report.report_interval(), Duration::from_secs(180));
        assert!(!config.gpu.enabled);
        assert!(!config.cpu.enabled);
        assert!(config.api.listen.is_none());
    }

    #[test]
    fn test_nested_sections() {
        let config = Config::from_toml(
            r#"
            user = "wallet"
            retries = 2
            action_after_retries_done = "EXIT"

            [periodic_report]
            initial_delay = 5
            report_interval = 60

            [gpu]
            enabled = true
            "#,
        )
        .unwrap();

        assert_eq!(config.retries, 2);
        assert_eq!(config.action_after_retries_done, RetryAction::Exit);
        assert_eq!(config.periodic_report.initial_delay, 5);
        assert_eq!(config.periodic_report.report_interval, 60);
        assert!(config.gpu.enabled);
    }

    #[test]
    fn test_url_list() {
        let config = Config::from_toml(
            r#"url = ["stratum+tcp://a.example:3333", "stratum+tcp://b.example:3333"]"#,
        )
        .unwrap();
        assert_eq!(
            config.endpoints().unwrap(),
            vec!["stratum+tcp://a.example:3333", "stratum+tcp://b.example:3333"]
        );
    }

    #[test]
    fn test_single_url_replaces_list() {
        let config = Config::load_with_overrides(
            None,
            [("url", "stratum+tcp://solo.example:3333".to_string())],
        )
        .unwrap();
        assert_eq!(
            config.endpoints().unwrap(),
            vec!["stratum+tcp://solo.example:3333"]
        );
    }

    #[test]
    fn test_empty_endpoints_rejected() {
        let config = Config::default();
        assert!(matches!(config.endpoints(), Err(Error::Config(_))));

        let config = Config {
            url: UrlSetting::One("   ".into()),
            ..Default::default()
        };
        assert!(config.endpoints().is_err());
    }

    #[test]
    fn test_credentials() {
        let config = Config {
            user: Some("wallet.rig1".into()),
            ..Default::default()
        };
        assert_eq!(
            config.credentials().unwrap(),
            ("wallet.rig1".to_string(), String::new())
        );

        let config = Config {
            user: Some(String::new()),
            ..Default::default()
        };
        assert!(matches!(
            config.credentials(),
            Err(Error::MissingCredentials("user"))
        ));
    }

    #[test]
    fn test_retry_action_parse() {
        assert_eq!(RetryAction::from_str("retry").unwrap(), RetryAction::Retry);
        assert_eq!(RetryAction::from_str("SHUTDOWN").unwrap(), RetryAction::Shutdown);
        assert!(RetryAction::Retry.keeps_reconnecting());
        assert!(!RetryAction::Exit.keeps_reconnecting());
    }
}
