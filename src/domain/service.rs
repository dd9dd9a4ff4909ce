//! Service requests: the closed set of actions a user or the energy
//! management backend can invoke on the topology.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Every service the router knows how to dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceName {
    Availability,
    #[serde(rename = "start_transaction")]
    ChargeStart,
    #[serde(rename = "stop_transaction")]
    ChargeStop,
    Reset,
    Unlock,
    SetChargeRate,
    Configure,
    GetConfiguration,
    GetDiagnostics,
    UpdateFirmware,
    ClearProfile,
    DataTransfer,
    #[serde(rename = "ems_communication_start")]
    CommunicationStart,
    #[serde(rename = "ems_communication_stop")]
    CommunicationStop,
}

impl ServiceName {
    pub const ALL: &'static [ServiceName] = &[
        Self::Availability,
        Self::ChargeStart,
        Self::ChargeStop,
        Self::Reset,
        Self::Unlock,
        Self::SetChargeRate,
        Self::Configure,
        Self::GetConfiguration,
        Self::GetDiagnostics,
        Self::UpdateFirmware,
        Self::ClearProfile,
        Self::DataTransfer,
        Self::CommunicationStart,
        Self::CommunicationStop,
    ];

    /// Name used on the service-call surface.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Availability => "availability",
            Self::ChargeStart => "start_transaction",
            Self::ChargeStop => "stop_transaction",
            Self::Reset => "reset",
            Self::Unlock => "unlock",
            Self::SetChargeRate => "set_charge_rate",
            Self::Configure => "configure",
            Self::GetConfiguration => "get_configuration",
            Self::GetDiagnostics => "get_diagnostics",
            Self::UpdateFirmware => "update_firmware",
            Self::ClearProfile => "clear_profile",
            Self::DataTransfer => "data_transfer",
            Self::CommunicationStart => "ems_communication_start",
            Self::CommunicationStop => "ems_communication_stop",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.as_str() == name)
    }

    /// Services handled by the central system rather than a station.
    pub fn is_central(&self) -> bool {
        matches!(self, Self::CommunicationStart | Self::CommunicationStop)
    }

    /// Whether a successful call changes station state that entities show.
    pub fn changes_state(&self) -> bool {
        matches!(
            self,
            Self::Availability
                | Self::ChargeStart
                | Self::ChargeStop
                | Self::Reset
                | Self::Unlock
                | Self::SetChargeRate
                | Self::ClearProfile
        )
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Service-specific arguments.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServicePayload {
    #[default]
    None,
    Availability {
        operative: bool,
    },
    ChargeStart {
        id_tag: Option<String>,
    },
    ChargeRate {
        limit_amps: Option<f64>,
        limit_watts: Option<f64>,
    },
    Configure {
        key: String,
        value: String,
    },
    GetConfiguration {
        key: String,
    },
    GetDiagnostics {
        upload_url: String,
    },
    UpdateFirmware {
        firmware_url: String,
        delay_hours: u32,
    },
    DataTransfer {
        vendor_id: String,
        message_id: Option<String>,
        data: Option<String>,
    },
}

impl ServicePayload {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Availability { .. } => "availability",
            Self::ChargeStart { .. } => "charge_start",
            Self::ChargeRate { .. } => "charge_rate",
            Self::Configure { .. } => "configure",
            Self::GetConfiguration { .. } => "get_configuration",
            Self::GetDiagnostics { .. } => "get_diagnostics",
            Self::UpdateFirmware { .. } => "update_firmware",
            Self::DataTransfer { .. } => "data_transfer",
        }
    }
}

/// One service invocation. Built per call and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRequest {
    pub service: ServiceName,
    #[serde(default)]
    pub charging_station_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evse_id: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connector_id: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub payload: ServicePayload,
}

impl ServiceRequest {
    pub fn new(service: ServiceName, charging_station_id: impl Into<String>) -> Self {
        Self {
            service,
            charging_station_id: charging_station_id.into(),
            evse_id: None,
            connector_id: None,
            transaction_id: None,
            payload: ServicePayload::None,
        }
    }

    /// A central-system level request.
    pub fn central(service: ServiceName) -> Self {
        Self::new(service, "")
    }

    pub fn evse(mut self, evse_id: u32) -> Self {
        self.evse_id = Some(evse_id);
        self
    }

    pub fn connector(mut self, connector_id: u32) -> Self {
        self.connector_id = Some(connector_id);
        self
    }

    pub fn transaction(mut self, transaction_id: impl Into<String>) -> Self {
        self.transaction_id = Some(transaction_id.into());
        self
    }

    pub fn payload(mut self, payload: ServicePayload) -> Self {
        self.payload = payload;
        self
    }

    /// Address the request at whatever node `target` describes.
    pub fn at(mut self, target: OperationTarget) -> Self {
        self.evse_id = target.evse_id;
        self.connector_id = target.connector_id;
        self
    }
}

/// Where on a station a protocol operation applies.
///
/// Both ids empty means the whole station.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationTarget {
    pub evse_id: Option<u32>,
    pub connector_id: Option<u32>,
}

impl OperationTarget {
    pub fn station() -> Self {
        Self::default()
    }

    pub fn connector(connector_id: u32) -> Self {
        Self {
            evse_id: None,
            connector_id: Some(connector_id),
        }
    }

    pub fn evse(evse_id: u32) -> Self {
        Self {
            evse_id: Some(evse_id),
            connector_id: None,
        }
    }

    pub fn evse_connector(evse_id: u32, connector_id: u32) -> Self {
        Self {
            evse_id: Some(evse_id),
            connector_id: Some(connector_id),
        }
    }

    pub fn is_station(&self) -> bool {
        self.evse_id.is_none() && self.connector_id.is_none()
    }
}

impl fmt::Display for OperationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.evse_id, self.connector_id) {
            (None, None) => write!(f, "station"),
            (Some(e), None) => write!(f, "evse {}", e),
            (None, Some(c)) => write!(f, "connector {}", c),
            (Some(e), Some(c)) => write!(f, "evse {} connector {}", e, c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip_through_the_closed_set() {
        for service in ServiceName::ALL {
            assert_eq!(ServiceName::from_name(service.as_str()), Some(*service));
        }
        assert_eq!(ServiceName::from_name("self_destruct"), None);
    }

    #[test]
    fn serialized_name_matches_service_name() {
        for service in ServiceName::ALL {
            assert_eq!(serde_json::json!(service), serde_json::json!(service.as_str()));
        }
    }

    #[test]
    fn request_deserializes_with_defaults() {
        let json = r#"{"service":"unlock","charging_station_id":"CP1","connector_id":2}"#;
        let request: ServiceRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.service, ServiceName::Unlock);
        assert_eq!(request.connector_id, Some(2));
        assert_eq!(request.payload, ServicePayload::None);
    }

    #[test]
    fn payload_is_tagged() {
        let json = r#"{"type":"charge_rate","limit_amps":16.0,"limit_watts":null}"#;
        let payload: ServicePayload = serde_json::from_str(json).unwrap();
        assert_eq!(
            payload,
            ServicePayload::ChargeRate {
                limit_amps: Some(16.0),
                limit_watts: None
            }
        );
    }
}
