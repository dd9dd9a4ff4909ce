//! Domain layer: the topology tree, telemetry, entity catalog and service
//! vocabulary. Nothing here performs I/O.

pub mod entity;
pub mod metrics;
pub mod ocpp;
pub mod service;
pub mod topology;

pub use entity::{EntitySnapshot, EntitySpec, Platform};
pub use metrics::{Metric, MetricValue, MetricsStore};
pub use ocpp::{OcppVersion, TopologyShape};
pub use service::{OperationTarget, ServiceName, ServicePayload, ServiceRequest};
pub use topology::{NodeKind, ReconcileState, SharedNode, TopologyNode};
