pub mod backend;
pub mod central_system;
pub mod dispatch;
pub mod events;
pub mod ports;
pub mod reconcile;
pub mod topology;

#[cfg(test)]
pub(crate) mod testing;

// Re-export key types for convenience
pub use backend::{BackendBridge, BackendConnector, BackendPoller, BackendSession, BackendStream};
pub use central_system::{CentralSystem, SharedCentralSystem};
pub use dispatch::{ServiceRouter, SharedServiceRouter};
pub use events::{create_event_bus, Event, EventBus, EventSubscriber, SharedEventBus};
pub use ports::{
    ChargeRateLimit, CommandStatus, DeviceDescriptor, EntityRegistry, ResetKind, SharedProtocol,
    SharedRegistry, StationProtocol,
};
pub use reconcile::{ReconcileReport, Reconciler, SharedReconciler};
pub use topology::{BootInfo, ReportVariable, SharedStation, SharedTopologyBuilder, Station, TopologyBuilder};
