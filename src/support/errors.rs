use thiserror::Error;

use crate::domain::ServiceName;

/// Failure of a protocol operation sent to a station.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProtocolError {
    #[error("Operation {0} is not implemented by this station")]
    NotImplemented(&'static str),

    #[error("Station rejected {operation}: {status}")]
    Rejected {
        operation: &'static str,
        status: String,
    },

    #[error("Charging station {0} is not connected")]
    StationOffline(String),

    #[error("Operation timeout for {0}")]
    Timeout(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

/// Failure reported by the host entity/device registry.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RegistryError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Entity not found: {0}")]
    EntityNotFound(String),

    #[error("Registry unavailable: {0}")]
    Unavailable(String),
}

/// Why a service request could not be carried out.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Unknown service: {0}")]
    UnknownService(String),

    #[error("Cannot resolve {segment} {value} on station {station_id}")]
    ResolutionFailure {
        station_id: String,
        segment: &'static str,
        value: String,
    },

    #[error("Invalid payload for {service}: expected {expected}, got {got}")]
    InvalidPayload {
        service: ServiceName,
        expected: &'static str,
        got: &'static str,
    },

    #[error("Target {0} is unavailable")]
    Unavailable(String),

    #[error("No active transaction on {0}")]
    NoTransaction(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Failure while mutating the topology.
#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("Charging station {0} is not attached")]
    StationNotFound(String),

    #[error("Node {0} not found")]
    NodeNotFound(String),

    #[error("Node {0} cannot own children")]
    LeafNode(String),

    #[error("Station id {0} is reserved for the central system")]
    ReservedId(String),

    #[error("Station {station_id} is {shape} and has no {level} level")]
    ShapeMismatch {
        station_id: String,
        shape: crate::domain::TopologyShape,
        level: &'static str,
    },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Failure of the energy-management backend link.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BackendError {
    #[error("No backend connector configured")]
    NotConfigured,

    #[error("Backend connection failed: {0}")]
    Connect(String),

    #[error("Backend I/O error: {0}")]
    Io(String),

    #[error("Backend worker {0} panicked")]
    WorkerPanicked(&'static str),
}

/// Failure loading or saving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Topology(#[from] TopologyError),

    #[error(transparent)]
    Backend(#[from] BackendError),
}
