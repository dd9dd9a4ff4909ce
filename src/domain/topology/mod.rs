//! The charging topology tree: Central System → Charging Station →
//! [EVSE] → Connector.

pub mod capability;
pub mod node;

pub use capability::{Available, MetricsHolder, ServiceTarget};
pub use node::{DeviceInfo, NodeKind, ReconcileState, SharedNode, TopologyNode};
