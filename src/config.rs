//! Configuration module
//!
//! [`AppConfig`] is the TOML file the runtime starts from. The
//! `[installation]` table holds per-installation overrides that
//! [`settings::resolve`] layers over the built-in defaults when a node is
//! constructed.

pub mod settings;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::support::ConfigError;

pub use settings::{
    resolve, AuthEntry, BuiltinDefaults, InstallationOverrides, SettingKey, SettingValue,
    StationSettings, WebsocketTiming,
};

/// Environment variable that points at the config file.
pub const CONFIG_ENV: &str = "CHARGE_ADVISOR_CONFIG";

/// `~/.config/charge-advisor/config.toml`, or `./config.toml` when the
/// platform has no config directory.
pub fn default_config_path() -> PathBuf {
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        return PathBuf::from(path);
    }
    dirs_next::config_dir()
        .map(|dir| dir.join("charge-advisor").join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("config.toml"))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub central_system: CentralSystemConfig,
    pub logging: LoggingConfig,
    pub backend: BackendConfig,
    pub runtime: RuntimeConfig,
    pub installation: InstallationOverrides,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            central_system: CentralSystemConfig::default(),
            logging: LoggingConfig::default(),
            backend: BackendConfig::default(),
            runtime: RuntimeConfig::default(),
            installation: InstallationOverrides::default(),
        }
    }
}

impl AppConfig {
    /// Load from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Check that the file resolves into usable station settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.central_system.id.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "central_system.id",
                reason: "must not be empty".to_string(),
            });
        }
        self.station_settings().map(|_| ())
    }

    pub fn station_settings(&self) -> Result<StationSettings, ConfigError> {
        StationSettings::resolve(&self.installation, &BuiltinDefaults::default())
    }
}

/// Identity and listen surface of the central system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CentralSystemConfig {
    /// Central system id (CSID); root of every device path.
    pub id: String,
    pub host: String,
    pub port: u16,
    pub ssl: bool,
    pub subprotocols: Vec<String>,
    pub skip_schema_validation: bool,
}

impl Default for CentralSystemConfig {
    fn default() -> Self {
        Self {
            id: "central".to_string(),
            host: "0.0.0.0".to_string(),
            port: 9000,
            ssl: false,
            subprotocols: vec!["ocpp1.6".to_string(), "ocpp2.0.1".to_string()],
            skip_schema_validation: false,
        }
    }
}

impl CentralSystemConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info` or `charge_advisor=debug`.
    pub level: String,
    /// `text` or `json`.
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

/// Energy-management backend link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Start backend communication together with the runtime.
    pub autostart: bool,
    /// Pause between two polls of the polling client.
    pub poll_interval_secs: u64,
    /// Read timeout of the streaming client, after which it re-checks the
    /// stop flag.
    pub stream_timeout_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            autostart: false,
            poll_interval_secs: 30,
            stream_timeout_ms: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub shutdown_timeout_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout_secs: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_default() {
        let config = AppConfig::from_toml("").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.central_system.address(), "0.0.0.0:9000");
    }

    #[test]
    fn partial_sections_keep_defaults() {
        let raw = r#"
            [central_system]
            id = "garage"

            [logging]
            format = "json"

            [installation]
            max_current = 16.0
        "#;
        let config = AppConfig::from_toml(raw).unwrap();
        assert_eq!(config.central_system.id, "garage");
        assert_eq!(config.central_system.port, 9000);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.station_settings().unwrap().max_current, 16.0);
    }

    #[test]
    fn blank_csid_is_rejected() {
        let raw = "[central_system]\nid = \" \"\n";
        assert!(matches!(
            AppConfig::from_toml(raw),
            Err(ConfigError::InvalidValue { key: "central_system.id", .. })
        ));
    }

    #[test]
    fn save_then_load() {
        let dir = std::env::temp_dir().join(format!("charge-advisor-{}", uuid::Uuid::new_v4()));
        let path = dir.join("config.toml");
        let mut config = AppConfig::default();
        config.backend.autostart = true;
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert!(loaded.backend.autostart);
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn missing_file_is_default() {
        let path = std::env::temp_dir().join("charge-advisor-does-not-exist.toml");
        assert_eq!(AppConfig::load(&path).unwrap(), AppConfig::default());
    }
}
