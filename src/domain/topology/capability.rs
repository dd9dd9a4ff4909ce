//! Capabilities a topology node exposes to the rest of the system.

use super::node::{NodeKind, TopologyNode};
use crate::domain::metrics::{MetricValue, MetricsStore};
use crate::domain::service::OperationTarget;

/// Anything whose availability depends on its own health and its parent's.
pub trait Available {
    fn is_available(&self) -> bool;
}

/// Read access to a node's telemetry.
pub trait MetricsHolder {
    fn metrics(&self) -> &MetricsStore;

    fn metric_value(&self, key: &str) -> Option<MetricValue> {
        self.metrics().value(key)
    }
}

/// A node that protocol operations can be addressed to.
pub trait ServiceTarget {
    fn operation_target(&self) -> OperationTarget;
}

impl Available for TopologyNode {
    fn is_available(&self) -> bool {
        TopologyNode::is_available(self)
    }
}

impl MetricsHolder for TopologyNode {
    fn metrics(&self) -> &MetricsStore {
        TopologyNode::metrics(self)
    }
}

impl ServiceTarget for TopologyNode {
    fn operation_target(&self) -> OperationTarget {
        match self.kind() {
            NodeKind::CentralSystem | NodeKind::ChargingStation => OperationTarget::station(),
            NodeKind::Evse => OperationTarget {
                evse_id: self.numeric_id(),
                connector_id: None,
            },
            NodeKind::Connector => OperationTarget {
                evse_id: self
                    .parent()
                    .filter(|p| p.kind() == NodeKind::Evse)
                    .and_then(|p| p.numeric_id()),
                connector_id: self.numeric_id(),
            },
        }
    }
}
