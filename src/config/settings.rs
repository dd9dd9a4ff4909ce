//! Layered setting resolution.
//!
//! Each setting is looked up in the per-installation overrides first and
//! falls back to the built-in default. Resolution happens once, when a
//! station node is constructed, and yields an immutable
//! [`StationSettings`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::support::ConfigError;

/// Authorization list entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthEntry {
    pub id_tag: String,
    /// `Accepted`, `Blocked`, `Expired`, `Invalid`...
    pub status: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingKey {
    DefaultAuthStatus,
    AuthList,
    DefaultCurrent,
    MaxCurrent,
    DefaultPower,
    MaxPower,
    ForceSmartCharging,
    WebsocketCloseTimeout,
    WebsocketPingTries,
    WebsocketPingInterval,
    WebsocketPingTimeout,
}

impl SettingKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DefaultAuthStatus => "default_auth_status",
            Self::AuthList => "auth_list",
            Self::DefaultCurrent => "default_current",
            Self::MaxCurrent => "max_current",
            Self::DefaultPower => "default_power",
            Self::MaxPower => "max_power",
            Self::ForceSmartCharging => "force_smart_charging",
            Self::WebsocketCloseTimeout => "websocket_close_timeout",
            Self::WebsocketPingTries => "websocket_ping_tries",
            Self::WebsocketPingInterval => "websocket_ping_interval",
            Self::WebsocketPingTimeout => "websocket_ping_timeout",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SettingValue {
    Text(String),
    Number(f64),
    Integer(u64),
    Flag(bool),
    AuthList(Vec<AuthEntry>),
}

/// Per-installation overrides (`[installation]` in the config file).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallationOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_auth_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_list: Option<Vec<AuthEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_current: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_current: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_power: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_power: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub force_smart_charging: Option<bool>,
    /// Seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub websocket_close_timeout: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub websocket_ping_tries: Option<u64>,
    /// Seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub websocket_ping_interval: Option<u64>,
    /// Seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub websocket_ping_timeout: Option<u64>,
}

impl InstallationOverrides {
    pub fn get(&self, key: SettingKey) -> Option<SettingValue> {
        match key {
            SettingKey::DefaultAuthStatus => self.default_auth_status.clone().map(SettingValue::Text),
            SettingKey::AuthList => self.auth_list.clone().map(SettingValue::AuthList),
            SettingKey::DefaultCurrent => self.default_current.map(SettingValue::Number),
            SettingKey::MaxCurrent => self.max_current.map(SettingValue::Number),
            SettingKey::DefaultPower => self.default_power.map(SettingValue::Number),
            SettingKey::MaxPower => self.max_power.map(SettingValue::Number),
            SettingKey::ForceSmartCharging => self.force_smart_charging.map(SettingValue::Flag),
            SettingKey::WebsocketCloseTimeout => self.websocket_close_timeout.map(SettingValue::Integer),
            SettingKey::WebsocketPingTries => self.websocket_ping_tries.map(SettingValue::Integer),
            SettingKey::WebsocketPingInterval => self.websocket_ping_interval.map(SettingValue::Integer),
            SettingKey::WebsocketPingTimeout => self.websocket_ping_timeout.map(SettingValue::Integer),
        }
    }
}

/// Values used when an installation does not override a setting.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltinDefaults {
    pub default_auth_status: String,
    pub default_current: f64,
    pub max_current: f64,
    pub default_power: f64,
    pub max_power: f64,
    pub force_smart_charging: bool,
    pub websocket_close_timeout: u64,
    pub websocket_ping_tries: u64,
    pub websocket_ping_interval: u64,
    pub websocket_ping_timeout: u64,
}

impl Default for BuiltinDefaults {
    fn default() -> Self {
        Self {
            default_auth_status: "Accepted".to_string(),
            default_current: 32.0,
            max_current: 32.0,
            default_power: 22_000.0,
            max_power: 22_000.0,
            force_smart_charging: false,
            websocket_close_timeout: 10,
            websocket_ping_tries: 2,
            websocket_ping_interval: 20,
            websocket_ping_timeout: 20,
        }
    }
}

impl BuiltinDefaults {
    pub fn get(&self, key: SettingKey) -> SettingValue {
        match key {
            SettingKey::DefaultAuthStatus => SettingValue::Text(self.default_auth_status.clone()),
            SettingKey::AuthList => SettingValue::AuthList(Vec::new()),
            SettingKey::DefaultCurrent => SettingValue::Number(self.default_current),
            SettingKey::MaxCurrent => SettingValue::Number(self.max_current),
            SettingKey::DefaultPower => SettingValue::Number(self.default_power),
            SettingKey::MaxPower => SettingValue::Number(self.max_power),
            SettingKey::ForceSmartCharging => SettingValue::Flag(self.force_smart_charging),
            SettingKey::WebsocketCloseTimeout => SettingValue::Integer(self.websocket_close_timeout),
            SettingKey::WebsocketPingTries => SettingValue::Integer(self.websocket_ping_tries),
            SettingKey::WebsocketPingInterval => SettingValue::Integer(self.websocket_ping_interval),
            SettingKey::WebsocketPingTimeout => SettingValue::Integer(self.websocket_ping_timeout),
        }
    }
}

/// Override if present, built-in default otherwise.
pub fn resolve(
    key: SettingKey,
    overrides: &InstallationOverrides,
    defaults: &BuiltinDefaults,
) -> SettingValue {
    overrides.get(key).unwrap_or_else(|| defaults.get(key))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WebsocketTiming {
    pub close_timeout: Duration,
    pub ping_tries: u32,
    pub ping_interval: Duration,
    pub ping_timeout: Duration,
}

/// Resolved, immutable settings of a station.
#[derive(Debug, Clone, PartialEq)]
pub struct StationSettings {
    pub default_auth_status: String,
    pub auth_list: Vec<AuthEntry>,
    pub default_current: f64,
    pub max_current: f64,
    pub default_power: f64,
    pub max_power: f64,
    pub force_smart_charging: bool,
    pub websocket: WebsocketTiming,
}

impl Default for StationSettings {
    fn default() -> Self {
        let d = BuiltinDefaults::default();
        Self {
            default_auth_status: d.default_auth_status,
            auth_list: Vec::new(),
            default_current: d.default_current,
            max_current: d.max_current,
            default_power: d.default_power,
            max_power: d.max_power,
            force_smart_charging: d.force_smart_charging,
            websocket: WebsocketTiming {
                close_timeout: Duration::from_secs(d.websocket_close_timeout),
                ping_tries: d.websocket_ping_tries as u32,
                ping_interval: Duration::from_secs(d.websocket_ping_interval),
                ping_timeout: Duration::from_secs(d.websocket_ping_timeout),
            },
        }
    }
}

impl StationSettings {
    pub fn resolve(
        overrides: &InstallationOverrides,
        defaults: &BuiltinDefaults,
    ) -> Result<Self, ConfigError> {
        let get = |key| resolve(key, overrides, defaults);

        let mut settings = Self {
            default_auth_status: text(SettingKey::DefaultAuthStatus, get(SettingKey::DefaultAuthStatus))?,
            auth_list: match get(SettingKey::AuthList) {
                SettingValue::AuthList(list) => list,
                other => return Err(mismatch(SettingKey::AuthList, &other)),
            },
            default_current: number(SettingKey::DefaultCurrent, get(SettingKey::DefaultCurrent))?,
            max_current: number(SettingKey::MaxCurrent, get(SettingKey::MaxCurrent))?,
            default_power: number(SettingKey::DefaultPower, get(SettingKey::DefaultPower))?,
            max_power: number(SettingKey::MaxPower, get(SettingKey::MaxPower))?,
            force_smart_charging: match get(SettingKey::ForceSmartCharging) {
                SettingValue::Flag(flag) => flag,
                other => return Err(mismatch(SettingKey::ForceSmartCharging, &other)),
            },
            websocket: WebsocketTiming {
                close_timeout: seconds(SettingKey::WebsocketCloseTimeout, get(SettingKey::WebsocketCloseTimeout))?,
                ping_tries: integer(SettingKey::WebsocketPingTries, get(SettingKey::WebsocketPingTries))?
                    .try_into()
                    .map_err(|_| invalid(SettingKey::WebsocketPingTries, "out of range"))?,
                ping_interval: seconds(SettingKey::WebsocketPingInterval, get(SettingKey::WebsocketPingInterval))?,
                ping_timeout: seconds(SettingKey::WebsocketPingTimeout, get(SettingKey::WebsocketPingTimeout))?,
            },
        };

        // A built-in default never exceeds an installation's own maximum.
        if overrides.default_current.is_none() {
            settings.default_current = settings.default_current.min(settings.max_current);
        }
        if overrides.default_power.is_none() {
            settings.default_power = settings.default_power.min(settings.max_power);
        }

        if settings.max_current <= 0.0 {
            return Err(invalid(SettingKey::MaxCurrent, "must be positive"));
        }
        if settings.default_current > settings.max_current {
            return Err(invalid(SettingKey::DefaultCurrent, "exceeds max_current"));
        }
        if settings.default_power > settings.max_power {
            return Err(invalid(SettingKey::DefaultPower, "exceeds max_power"));
        }
        Ok(settings)
    }

    /// Authorization status for an id tag: the list entry if any, the
    /// default status otherwise.
    pub fn authorization_status(&self, id_tag: &str) -> &str {
        self.auth_list
            .iter()
            .find(|entry| entry.id_tag == id_tag)
            .map(|entry| entry.status.as_str())
            .unwrap_or(self.default_auth_status.as_str())
    }
}

fn invalid(key: SettingKey, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.as_str(),
        reason: reason.to_string(),
    }
}

fn mismatch(key: SettingKey, value: &SettingValue) -> ConfigError {
    invalid(key, &format!("unexpected value {:?}", value))
}

fn text(key: SettingKey, value: SettingValue) -> Result<String, ConfigError> {
    match value {
        SettingValue::Text(s) => Ok(s),
        other => Err(mismatch(key, &other)),
    }
}

fn number(key: SettingKey, value: SettingValue) -> Result<f64, ConfigError> {
    match value {
        SettingValue::Number(n) if n.is_finite() && n >= 0.0 => Ok(n),
        SettingValue::Number(_) => Err(invalid(key, "must be a non-negative number")),
        other => Err(mismatch(key, &other)),
    }
}

fn integer(key: SettingKey, value: SettingValue) -> Result<u64, ConfigError> {
    match value {
        SettingValue::Integer(n) => Ok(n),
        other => Err(mismatch(key, &other)),
    }
}

fn seconds(key: SettingKey, value: SettingValue) -> Result<Duration, ConfigError> {
    integer(key, value).map(Duration::from_secs)
}
