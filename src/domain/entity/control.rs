//! Turning entity actions into service requests addressed at the entity's
//! node.

use crate::domain::service::{ServiceName, ServicePayload, ServiceRequest};
use crate::domain::topology::{NodeKind, ServiceTarget, TopologyNode};

use super::spec::{Control, EntitySpec};

/// A user action on a controllable entity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EntityAction {
    Turn(bool),
    Press,
    Set(f64),
}

/// Request for `action` on `spec`, or `None` if the entity does not
/// support it.
pub fn action_request(spec: &EntitySpec, node: &TopologyNode, action: EntityAction) -> Option<ServiceRequest> {
    match action {
        EntityAction::Turn(on) => switch_request(spec, node, on),
        EntityAction::Press => button_request(spec, node),
        EntityAction::Set(value) => number_request(spec, node, value),
    }
}

fn request_at(service: ServiceName, node: &TopologyNode, payload: ServicePayload) -> ServiceRequest {
    if node.kind() == NodeKind::CentralSystem || service.is_central() {
        return ServiceRequest::central(service).payload(payload);
    }
    let station_id = node.path().first().cloned().unwrap_or_default();
    ServiceRequest::new(service, station_id)
        .at(node.operation_target())
        .payload(payload)
}

/// Request for flipping a switch, or `None` if `spec` is not a switch.
pub fn switch_request(spec: &EntitySpec, node: &TopologyNode, turn_on: bool) -> Option<ServiceRequest> {
    match &spec.control {
        Some(Control::Switch { on, off, .. }) => {
            let (service, payload) = if turn_on { on } else { off };
            Some(request_at(*service, node, payload.clone()))
        }
        _ => None,
    }
}

pub fn button_request(spec: &EntitySpec, node: &TopologyNode) -> Option<ServiceRequest> {
    match &spec.control {
        Some(Control::Button { press }) => Some(request_at(*press, node, ServicePayload::None)),
        _ => None,
    }
}

/// Request for setting a number entity; the value is clamped to its range.
pub fn number_request(spec: &EntitySpec, node: &TopologyNode, value: f64) -> Option<ServiceRequest> {
    match &spec.control {
        Some(Control::Number {
            service, min, max, ..
        }) => {
            let payload = ServicePayload::ChargeRate {
                limit_amps: Some(value.clamp(*min, *max)),
                limit_watts: None,
            };
            Some(request_at(*service, node, payload))
        }
        _ => None,
    }
}
