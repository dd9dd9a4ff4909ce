//! Protocol port: the per-station engine that speaks OCPP on the wire.
//!
//! The engine owns the connection, codec and message correlation. This
//! crate only asks it to perform operations and, in return, receives
//! lifecycle callbacks through
//! [`TopologyBuilder`](crate::application::topology::TopologyBuilder).

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{OcppVersion, OperationTarget};
use crate::support::ProtocolError;

// ── Command status (version-agnostic) ──────────────────────────

/// Response status of a station operation.
///
/// Maps to `ParsedGenericStatus` in OCPP 1.6 and `GenericStatusEnum` in
/// 2.0.1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandStatus {
    Accepted,
    Rejected,
    Scheduled,
    NotSupported,
    Faulted,
    Unknown(String),
}

impl CommandStatus {
    pub fn from_str(s: &str) -> Self {
        match s {
            "Accepted" => Self::Accepted,
            "Rejected" => Self::Rejected,
            "Scheduled" => Self::Scheduled,
            "NotSupported" => Self::NotSupported,
            "Faulted" => Self::Faulted,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// Accepted now or scheduled for later.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Accepted | Self::Scheduled)
    }
}

impl std::fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Accepted => write!(f, "Accepted"),
            Self::Rejected => write!(f, "Rejected"),
            Self::Scheduled => write!(f, "Scheduled"),
            Self::NotSupported => write!(f, "NotSupported"),
            Self::Faulted => write!(f, "Faulted"),
            Self::Unknown(s) => write!(f, "{}", s),
        }
    }
}

/// Reset kind. Maps to v1.6 `Hard`/`Soft`, v2.0.1 `Immediate`/`OnIdle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetKind {
    Soft,
    Hard,
}

/// Charging limit for `set_charge_rate`. At least one bound is set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChargeRateLimit {
    pub amps: Option<f64>,
    pub watts: Option<f64>,
}

// ── StationProtocol ────────────────────────────────────────────

/// Operations the central system can ask one connected station to perform.
///
/// Every operation is asynchronous and reports success or failure; none is
/// retried by the caller. Optional operations default to
/// [`ProtocolError::NotImplemented`].
#[async_trait]
pub trait StationProtocol: Send + Sync {
    fn station_id(&self) -> &str;

    /// Negotiated protocol version. Fixed for the connection's lifetime.
    fn version(&self) -> OcppVersion;

    /// Whether the connection is currently usable.
    fn is_available(&self) -> bool;

    /// Surface a message to the user.
    async fn notify(&self, message: &str, params: serde_json::Value) -> bool;

    async fn reset(&self, kind: ResetKind) -> Result<CommandStatus, ProtocolError>;

    async fn unlock(&self, target: OperationTarget) -> Result<CommandStatus, ProtocolError>;

    async fn set_charge_rate(
        &self,
        target: OperationTarget,
        limit: ChargeRateLimit,
    ) -> Result<CommandStatus, ProtocolError>;

    async fn remote_start(
        &self,
        target: OperationTarget,
        id_tag: &str,
    ) -> Result<CommandStatus, ProtocolError>;

    async fn remote_stop(&self, transaction_id: &str) -> Result<CommandStatus, ProtocolError>;

    async fn change_availability(
        &self,
        target: OperationTarget,
        operative: bool,
    ) -> Result<CommandStatus, ProtocolError>;

    async fn configure(&self, _key: &str, _value: &str) -> Result<CommandStatus, ProtocolError> {
        Err(ProtocolError::NotImplemented("configure"))
    }

    async fn get_configuration(&self, _key: &str) -> Result<CommandStatus, ProtocolError> {
        Err(ProtocolError::NotImplemented("get_configuration"))
    }

    async fn get_diagnostics(&self, _upload_url: &str) -> Result<CommandStatus, ProtocolError> {
        Err(ProtocolError::NotImplemented("get_diagnostics"))
    }

    async fn update_firmware(
        &self,
        _firmware_url: &str,
        _delay_hours: u32,
    ) -> Result<CommandStatus, ProtocolError> {
        Err(ProtocolError::NotImplemented("update_firmware"))
    }

    async fn clear_profile(&self, _target: OperationTarget) -> Result<CommandStatus, ProtocolError> {
        Err(ProtocolError::NotImplemented("clear_profile"))
    }

    async fn data_transfer(
        &self,
        _vendor_id: &str,
        _message_id: Option<&str>,
        _data: Option<&str>,
    ) -> Result<CommandStatus, ProtocolError> {
        Err(ProtocolError::NotImplemented("data_transfer"))
    }
}

pub type SharedProtocol = Arc<dyn StationProtocol>;
