use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::platform;

/// Environment variable carrying the schedule service token.
pub const TOKEN_ENV: &str = "LIVESTREAMS_TOKEN";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub player: PlayerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Preferences, schedule cache and log file live here.
    #[serde(default = "platform::data_dir")]
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Sent as the `App` header.
    #[serde(default = "default_app_name")]
    pub app_name: String,
    /// Sent as the `Token` header.  `LIVESTREAMS_TOKEN` takes precedence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
}

/// Channel catalog source.  Without a path the bundled catalog is used.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(default)]
    pub idiom: DeviceIdiom,
}

/// Class of the device the guide is presented on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceIdiom {
    Phone,
    Pad,
    Tv,
    #[default]
    Desktop,
}

impl DeviceIdiom {
    /// Whether the channel list stays visible next to the player, in which
    /// case a channel is selected from the start.
    pub fn has_persistent_sidebar(&self) -> bool {
        !matches!(self, DeviceIdiom::Phone)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlayerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mpv_binary: Option<PathBuf>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            data_dir: platform::data_dir(),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            app_name: default_app_name(),
            token: None,
            timeout_secs: default_timeout_secs(),
            refresh_interval_secs: default_refresh_interval_secs(),
        }
    }
}

impl ScheduleConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs.max(1))
    }

    /// Token from the environment, else from the config file.
    pub fn resolved_token(&self) -> Option<String> {
        std::env::var(TOKEN_ENV)
            .ok()
            .filter(|t| !t.is_empty())
            .or_else(|| self.token.clone())
    }
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    platform::DAEMON_TCP_PORT
}

fn default_endpoint() -> String {
    "https://api.yannikbloscheck.com/livestreams/2.0/program/upcoming/".to_string()
}

fn default_app_name() -> String {
    "Livestreams".to_string()
}

fn default_timeout_secs() -> u64 {
    20
}

fn default_refresh_interval_secs() -> u64 {
    30
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.daemon.port, 9877);
        assert_eq!(config.daemon.bind_address, "127.0.0.1");
        assert!(config.schedule.endpoint.ends_with("/livestreams/2.0/program/upcoming/"));
        assert_eq!(config.schedule.timeout(), Duration::from_secs(20));
        assert_eq!(config.schedule.refresh_interval(), Duration::from_secs(30));
        assert!(config.schedule.token.is_none());
        assert!(config.device.idiom.has_persistent_sidebar());
    }

    #[test]
    fn partial_file_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [schedule]
            refresh_interval_secs = 60

            [device]
            idiom = "phone"
            "#,
        )
        .unwrap();
        assert_eq!(config.schedule.refresh_interval_secs, 60);
        assert_eq!(config.schedule.timeout_secs, 20);
        assert_eq!(config.schedule.app_name, "Livestreams");
        assert!(!config.device.idiom.has_persistent_sidebar());
        assert!(config.catalog.path.is_none());
    }

    #[test]
    fn token_is_not_written_back_when_unset() {
        let content = toml::to_string_pretty(&Config::default()).unwrap();
        assert!(!content.contains("token"));
    }
}
