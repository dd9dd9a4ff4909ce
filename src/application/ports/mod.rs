//! Ports to the collaborators this crate drives but does not implement:
//! the per-station protocol engine and the host entity/device registry.

pub mod protocol;
pub mod registry;

pub use protocol::{ChargeRateLimit, CommandStatus, ResetKind, SharedProtocol, StationProtocol};
pub use registry::{DeviceDescriptor, EntityRegistry, SharedRegistry};
