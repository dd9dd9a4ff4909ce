//! OCPP protocol version and the station topology it implies.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Supported OCPP protocol versions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OcppVersion {
    /// OCPP 1.6 (JSON / OCPP-J)
    V16,
    /// OCPP 2.0.1
    V201,
    /// OCPP 2.1
    V21,
}

impl OcppVersion {
    /// WebSocket subprotocol identifier for this OCPP version.
    pub fn subprotocol(&self) -> &'static str {
        match self {
            Self::V16 => "ocpp1.6",
            Self::V201 => "ocpp2.0.1",
            Self::V21 => "ocpp2.1",
        }
    }

    /// Parse an OCPP version from a negotiated subprotocol string.
    pub fn from_subprotocol(s: &str) -> Option<Self> {
        match s.trim() {
            "ocpp1.6" => Some(Self::V16),
            "ocpp2.0.1" => Some(Self::V201),
            "ocpp2.1" => Some(Self::V21),
            _ => None,
        }
    }

    pub fn version_string(&self) -> &'static str {
        match self {
            Self::V16 => "1.6",
            Self::V201 => "2.0.1",
            Self::V21 => "2.1",
        }
    }

    /// Topology shape a station speaking this version exposes.
    pub fn shape(&self) -> TopologyShape {
        match self {
            Self::V16 => TopologyShape::Flat,
            Self::V201 | Self::V21 => TopologyShape::Nested,
        }
    }
}

impl fmt::Display for OcppVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OCPP {}", self.version_string())
    }
}

/// How a charging station arranges its outlets.
///
/// `Flat` stations own connectors directly (OCPP 1.6). `Nested` stations
/// own EVSEs which in turn own connectors (OCPP 2.x). A station keeps one
/// shape for its whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopologyShape {
    Flat,
    Nested,
}

impl TopologyShape {
    /// Device model reported to the registry for a station of this shape.
    pub fn station_model(&self) -> &'static str {
        match self {
            Self::Flat => "OCPP 1.6 Charge Point",
            Self::Nested => "OCPP 2.0.1 Charging Station",
        }
    }

    pub fn has_evse_level(&self) -> bool {
        matches!(self, Self::Nested)
    }
}

impl fmt::Display for TopologyShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Flat => write!(f, "flat"),
            Self::Nested => write!(f, "nested"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subprotocol_parsing() {
        assert_eq!(OcppVersion::from_subprotocol("ocpp1.6"), Some(OcppVersion::V16));
        assert_eq!(OcppVersion::from_subprotocol(" ocpp2.0.1 "), Some(OcppVersion::V201));
        assert_eq!(OcppVersion::from_subprotocol("ocpp1.5"), None);
    }

    #[test]
    fn version_selects_shape() {
        assert_eq!(OcppVersion::V16.shape(), TopologyShape::Flat);
        assert_eq!(OcppVersion::V201.shape(), TopologyShape::Nested);
        assert_eq!(OcppVersion::V21.shape(), TopologyShape::Nested);
        assert!(!TopologyShape::Flat.has_evse_level());
    }
}
