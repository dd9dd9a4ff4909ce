use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::metrics::{DeviceClass, StateClass};
use crate::domain::service::{ServiceName, ServicePayload};

/// Namespace segment of every unique id.
pub const DOMAIN: &str = "charge_advisor";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Sensor,
    Switch,
    Button,
    Number,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sensor => "sensor",
            Self::Switch => "switch",
            Self::Button => "button",
            Self::Number => "number",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityCategory {
    Diagnostic,
    Config,
}

/// Extra condition on top of node availability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvailabilityRule {
    Node,
    /// Available only while the node's status metric is one of these.
    StatusIn(&'static [&'static str]),
}

/// When a switch reads as on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnWhen {
    Flag,
    TextIn(&'static [&'static str]),
}

/// How a controllable entity talks back to the router.
#[derive(Debug, Clone, PartialEq)]
pub enum Control {
    Switch {
        on: (ServiceName, ServicePayload),
        off: (ServiceName, ServicePayload),
        state_key: &'static str,
        on_when: OnWhen,
    },
    Button {
        press: ServiceName,
    },
    Number {
        service: ServiceName,
        state_key: &'static str,
        min: f64,
        max: f64,
        step: f64,
    },
}

/// Description of one entity a node should expose.
#[derive(Debug, Clone, PartialEq)]
pub struct EntitySpec {
    pub unique_id: String,
    pub platform: Platform,
    pub key: String,
    pub name: String,
    pub metric_key: Option<String>,
    pub category: Option<EntityCategory>,
    pub device_class: Option<DeviceClass>,
    pub state_class: Option<StateClass>,
    pub icon: &'static str,
    pub availability: AvailabilityRule,
    pub control: Option<Control>,
}

/// `platform.charge_advisor.<path joined by '.'>.<key>`
pub fn unique_id(platform: Platform, path: &[String], key: &str) -> String {
    format!("{}.{}.{}.{}", platform, DOMAIN, path.join("."), key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_id_layout() {
        let path = vec!["CP1".to_string(), "1".to_string(), "2".to_string()];
        assert_eq!(
            unique_id(Platform::Sensor, &path, "status"),
            "sensor.charge_advisor.CP1.1.2.status"
        );
    }
}
