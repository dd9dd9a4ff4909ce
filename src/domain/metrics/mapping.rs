//! Pure translation of metric keys and protocol units to display
//! classes and units. No state, no I/O.

use serde::{Deserialize, Serialize};

use super::keys;

pub const DEFAULT_ICON: &str = "mdi:ev-station";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    Current,
    Voltage,
    Energy,
    Frequency,
    Power,
    Temperature,
    Duration,
    Timestamp,
    Battery,
}

impl DeviceClass {
    /// Host unit assumed when the station does not report one.
    pub fn default_unit(&self) -> Option<&'static str> {
        match self {
            Self::Current => Some("A"),
            Self::Voltage => Some("V"),
            Self::Frequency => Some("Hz"),
            Self::Battery => Some("%"),
            Self::Power => Some("kW"),
            Self::Energy => Some("kWh"),
            Self::Temperature | Self::Duration | Self::Timestamp => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateClass {
    Measurement,
    TotalIncreasing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub device_class: DeviceClass,
    pub default_unit: Option<&'static str>,
}

impl Classification {
    fn of(device_class: DeviceClass) -> Self {
        Self {
            device_class,
            default_unit: device_class.default_unit(),
        }
    }
}

/// Classify a metric key by its prefix.
///
/// Reactive power has no host unit and classifies to `None`, as does any
/// key no rule matches.
pub fn classify(metric_key: &str) -> Option<Classification> {
    let key = metric_key.to_lowercase();
    let class = if key.starts_with("current.") {
        DeviceClass::Current
    } else if key.starts_with("voltage") {
        DeviceClass::Voltage
    } else if key.starts_with("energy.") {
        DeviceClass::Energy
    } else if key == "rpm" || key.starts_with("frequency") {
        DeviceClass::Frequency
    } else if key.starts_with("power.active") || key.starts_with("power.offered") {
        DeviceClass::Power
    } else if key.starts_with("power.reactive") {
        return None;
    } else if key.starts_with("temperature.") {
        DeviceClass::Temperature
    } else if key.starts_with("session.time") || key.starts_with("latency") {
        DeviceClass::Duration
    } else if key.starts_with("session.energy") {
        DeviceClass::Energy
    } else if key.starts_with("timestamp.")
        || key == keys::HEARTBEAT
        || key == keys::CONFIG_RESPONSE
        || key == keys::DATA_RESPONSE
    {
        DeviceClass::Timestamp
    } else if key.starts_with("soc") {
        DeviceClass::Battery
    } else {
        return None;
    };
    Some(Classification::of(class))
}

/// Map a protocol unit of measure to the host's unit vocabulary.
pub fn native_unit(protocol_unit: &str) -> Option<&'static str> {
    let unit = match protocol_unit {
        "Wh" => "Wh",
        "kWh" => "kWh",
        "varh" => "varh",
        "kvarh" => "kvarh",
        "W" => "W",
        "kW" => "kW",
        "VA" => "VA",
        "kVA" => "kVA",
        "var" => "var",
        "kvar" => "kvar",
        "A" => "A",
        "V" => "V",
        "Celsius" | "Celcius" => "°C",
        "Fahrenheit" => "°F",
        "K" => "K",
        "Percent" => "%",
        "Hertz" => "Hz",
        _ => return None,
    };
    Some(unit)
}

/// Unit an entity displays: the station's unit when it maps, otherwise
/// the classification default.
pub fn display_unit(metric_key: &str, protocol_unit: Option<&str>) -> Option<&'static str> {
    if let Some(unit) = protocol_unit.and_then(native_unit) {
        return Some(unit);
    }
    let key = metric_key.to_lowercase();
    if key.starts_with("latency") {
        return Some("ms");
    }
    if key.starts_with("session.time") {
        return Some("min");
    }
    classify(metric_key).and_then(|c| c.default_unit)
}

pub fn state_class(metric_key: &str) -> Option<StateClass> {
    let class = classify(metric_key)?;
    match class.device_class {
        DeviceClass::Energy => Some(StateClass::TotalIncreasing),
        DeviceClass::Current
        | DeviceClass::Voltage
        | DeviceClass::Power
        | DeviceClass::Temperature
        | DeviceClass::Battery
        | DeviceClass::Frequency
        | DeviceClass::Duration => Some(StateClass::Measurement),
        DeviceClass::Timestamp => None,
    }
}

pub fn icon_for(metric_key: &str) -> &'static str {
    let key = metric_key.to_lowercase();
    if key.starts_with("energy.") {
        "mdi:lightning-bolt"
    } else if key.starts_with("power.factor") {
        "mdi:angle-acute"
    } else if key.starts_with("power.") {
        "mdi:flash"
    } else if key.starts_with("current.") {
        "mdi:current-ac"
    } else if key == "voltage" {
        "mdi:transmission-tower"
    } else if key == "frequency" {
        "mdi:sine-wave"
    } else if key == "rpm" {
        "mdi:fan-speed-3"
    } else if key == "soc" {
        "mdi:battery-charging"
    } else if key.starts_with("temperature") {
        "mdi:thermometer"
    } else {
        DEFAULT_ICON
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn energy_register_is_energy_in_kwh() {
        let c = classify("energy.active_import.register").unwrap();
        assert_eq!(c.device_class, DeviceClass::Energy);
        assert_eq!(c.default_unit, Some("kWh"));
        assert_eq!(state_class("energy.active_import.register"), Some(StateClass::TotalIncreasing));
    }

    #[test]
    fn reactive_power_has_no_class() {
        assert!(classify("power.reactive.import").is_none());
        assert!(state_class("power.reactive.import").is_none());
        assert_eq!(display_unit("power.reactive.import", None), None);
    }

    #[test]
    fn prefix_rules_are_case_insensitive() {
        assert_eq!(classify("Current.Import").map(|c| c.device_class), Some(DeviceClass::Current));
        assert_eq!(classify("Power.Offered").map(|c| c.device_class), Some(DeviceClass::Power));
        assert_eq!(classify("SoC").map(|c| c.device_class), Some(DeviceClass::Battery));
        assert_eq!(classify("RPM").map(|c| c.device_class), Some(DeviceClass::Frequency));
    }

    #[test]
    fn status_keys_are_unclassified() {
        assert!(classify(keys::STATUS).is_none());
        assert!(classify(keys::ID_TAG).is_none());
        assert_eq!(classify(keys::HEARTBEAT).map(|c| c.device_class), Some(DeviceClass::Timestamp));
        assert_eq!(classify(keys::SESSION_START).map(|c| c.device_class), Some(DeviceClass::Timestamp));
    }

    #[test]
    fn native_units() {
        assert_eq!(native_unit("Celsius"), Some("°C"));
        assert_eq!(native_unit("Percent"), Some("%"));
        assert_eq!(native_unit("kvarh"), Some("kvarh"));
        assert_eq!(native_unit("furlong"), None);
    }

    #[test]
    fn display_unit_prefers_reported_unit() {
        assert_eq!(display_unit("energy.active_import.register", Some("Wh")), Some("Wh"));
        assert_eq!(display_unit("energy.active_import.register", None), Some("kWh"));
        assert_eq!(display_unit(keys::LATENCY_PING, None), Some("ms"));
        assert_eq!(display_unit(keys::SESSION_TIME, None), Some("min"));
    }

    #[test]
    fn icons() {
        assert_eq!(icon_for("Energy.Active.Import.Register"), "mdi:lightning-bolt");
        assert_eq!(icon_for("power.factor"), "mdi:angle-acute");
        assert_eq!(icon_for("status"), DEFAULT_ICON);
    }
}
