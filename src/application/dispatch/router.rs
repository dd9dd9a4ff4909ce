//! Service dispatch router.
//!
//! Resolves a [`ServiceRequest`] to one node of one station and performs the
//! matching protocol operation. Flat and nested stations use different
//! tables: a flat station has no EVSE level, so availability and charge
//! control address connectors there.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::application::events::{Event, ServiceDispatchedEvent, SharedEventBus};
use crate::application::ports::{ChargeRateLimit, CommandStatus, ResetKind};
use crate::application::reconcile::SharedReconciler;
use crate::application::topology::{SharedStation, SharedTopologyBuilder};
use crate::domain::metrics::keys;
use crate::domain::topology::ServiceTarget;
use crate::domain::{MetricValue, NodeKind, ServiceName, ServicePayload, ServiceRequest, SharedNode, TopologyShape};
use crate::support::{DispatchError, ProtocolError};

/// Id tag used for remote starts that do not carry one.
pub const DEFAULT_ID_TAG: &str = "ChargeAdvisor";

fn record_service_latency(service: &'static str, start: Instant, success: bool) {
    let duration = start.elapsed().as_secs_f64();
    let outcome = if success { "success" } else { "failure" };
    ::metrics::histogram!("charge_advisor_service_latency_seconds", "service" => service).record(duration);
    ::metrics::counter!("charge_advisor_services_total", "service" => service, "outcome" => outcome).increment(1);
}

/// Which node of a station an operation addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    /// Always the station itself.
    Station,
    /// The deepest addressed node, but no deeper than the given level.
    UpTo(NodeKind),
    /// Exactly the given level; it must be addressed.
    Exactly(NodeKind),
}

fn scope(service: ServiceName, shape: TopologyShape) -> Scope {
    use NodeKind::{Connector, Evse};
    use ServiceName::*;

    match shape {
        TopologyShape::Flat => match service {
            Availability | ChargeStop | SetChargeRate | ClearProfile => Scope::UpTo(Connector),
            ChargeStart | Unlock => Scope::Exactly(Connector),
            _ => Scope::Station,
        },
        TopologyShape::Nested => match service {
            Availability | ChargeStop => Scope::UpTo(Connector),
            SetChargeRate | ClearProfile => Scope::UpTo(Evse),
            ChargeStart => Scope::Exactly(Evse),
            Unlock => Scope::Exactly(Connector),
            _ => Scope::Station,
        },
    }
}

fn depth(kind: NodeKind) -> u8 {
    match kind {
        NodeKind::CentralSystem => 0,
        NodeKind::ChargingStation => 1,
        NodeKind::Evse => 2,
        NodeKind::Connector => 3,
    }
}

pub struct ServiceRouter {
    builder: SharedTopologyBuilder,
    reconciler: SharedReconciler,
    event_bus: SharedEventBus,
}

impl ServiceRouter {
    pub fn new(
        builder: SharedTopologyBuilder,
        reconciler: SharedReconciler,
        event_bus: SharedEventBus,
    ) -> Self {
        Self {
            builder,
            reconciler,
            event_bus,
        }
    }

    /// Invoke a service by its call-surface name with JSON call data.
    ///
    /// `data` carries the request fields (`charging_station_id`,
    /// `evse_id`, `connector_id`, `transaction_id`, `payload`).
    pub async fn invoke_named(&self, name: &str, data: serde_json::Value) -> bool {
        let Some(service) = ServiceName::from_name(name) else {
            warn!(service = name, "{}", DispatchError::UnknownService(name.to_string()));
            return false;
        };
        let mut data = match data {
            serde_json::Value::Object(map) => map,
            serde_json::Value::Null => serde_json::Map::new(),
            other => {
                warn!(%service, data = %other, "Service data must be an object");
                return false;
            }
        };
        data.insert("service".to_string(), serde_json::json!(service));
        match serde_json::from_value::<ServiceRequest>(serde_json::Value::Object(data)) {
            Ok(request) => self.invoke_service(request).await,
            Err(e) => {
                warn!(%service, error = %e, "Malformed service data");
                false
            }
        }
    }

    /// Perform one service call. Failures are logged and reported as
    /// `false`; nothing is retried.
    pub async fn invoke_service(&self, request: ServiceRequest) -> bool {
        let start = Instant::now();
        let service = request.service;
        let result = self.dispatch(&request).await;
        record_service_latency(service.as_str(), start, result.is_ok());

        let success = match result {
            Ok(station) => {
                if service.changes_state() && !station.node().is_detached() {
                    let reconciler = self.reconciler.clone();
                    let node = station.node().clone();
                    tokio::spawn(async move {
                        reconciler.reconcile(node).await;
                    });
                }
                true
            }
            Err(e) => {
                warn!(
                    station_id = %request.charging_station_id,
                    %service,
                    error = %e,
                    "Service call failed"
                );
                false
            }
        };

        self.event_bus.publish(Event::ServiceDispatched(ServiceDispatchedEvent {
            service: service.as_str().to_string(),
            station_id: Some(request.charging_station_id.clone()).filter(|s| !s.is_empty()),
            success,
            timestamp: Utc::now(),
        }));
        success
    }

    async fn dispatch(&self, request: &ServiceRequest) -> Result<SharedStation, DispatchError> {
        let service = request.service;
        if service.is_central() {
            return Err(DispatchError::UnknownService(format!(
                "{} is not a station service",
                service
            )));
        }

        let station = self.builder.station(&request.charging_station_id).ok_or_else(|| {
            DispatchError::ResolutionFailure {
                station_id: request.charging_station_id.clone(),
                segment: "station",
                value: request.charging_station_id.clone(),
            }
        })?;
        let node = resolve(&station, request, scope(service, station.shape()))?;
        if !station.is_available() || !node.is_available() {
            return Err(DispatchError::Unavailable(node.device_id()));
        }

        let version = station.version();
        let target = node.operation_target();
        let protocol = station.protocol();
        info!(%version, %service, station_id = %station.id(), %target, "Dispatching service");

        let status = match (service, &request.payload) {
            (ServiceName::Availability, ServicePayload::None) => {
                protocol.change_availability(target, true).await?
            }
            (ServiceName::Availability, ServicePayload::Availability { operative }) => {
                protocol.change_availability(target, *operative).await?
            }
            (ServiceName::ChargeStart, ServicePayload::None) => {
                protocol.remote_start(target, DEFAULT_ID_TAG).await?
            }
            (ServiceName::ChargeStart, ServicePayload::ChargeStart { id_tag }) => {
                let id_tag = id_tag.as_deref().unwrap_or(DEFAULT_ID_TAG);
                protocol.remote_start(target, id_tag).await?
            }
            (ServiceName::ChargeStop, _) => {
                let transaction_id = request
                    .transaction_id
                    .clone()
                    .or_else(|| active_transaction(&node))
                    .ok_or_else(|| DispatchError::NoTransaction(node.device_id()))?;
                protocol.remote_stop(&transaction_id).await?
            }
            (ServiceName::Reset, _) => protocol.reset(ResetKind::Hard).await?,
            (ServiceName::Unlock, _) => protocol.unlock(target).await?,
            (
                ServiceName::SetChargeRate,
                ServicePayload::ChargeRate {
                    limit_amps,
                    limit_watts,
                },
            ) if limit_amps.is_some() || limit_watts.is_some() => {
                let limit = ChargeRateLimit {
                    amps: *limit_amps,
                    watts: *limit_watts,
                };
                let status = protocol.set_charge_rate(target, limit).await?;
                if let (true, Some(amps)) = (status.is_success(), limit_amps) {
                    node.metrics().set_value(keys::CURRENT_SETPOINT, *amps);
                }
                status
            }
            (ServiceName::ClearProfile, _) => protocol.clear_profile(target).await?,
            (ServiceName::Configure, ServicePayload::Configure { key, value }) => {
                protocol.configure(key, value).await?
            }
            (ServiceName::GetConfiguration, ServicePayload::GetConfiguration { key }) => {
                protocol.get_configuration(key).await?
            }
            (ServiceName::GetDiagnostics, ServicePayload::GetDiagnostics { upload_url }) => {
                protocol.get_diagnostics(upload_url).await?
            }
            (
                ServiceName::UpdateFirmware,
                ServicePayload::UpdateFirmware {
                    firmware_url,
                    delay_hours,
                },
            ) => protocol.update_firmware(firmware_url, *delay_hours).await?,
            (
                ServiceName::DataTransfer,
                ServicePayload::DataTransfer {
                    vendor_id,
                    message_id,
                    data,
                },
            ) => {
                protocol
                    .data_transfer(vendor_id, message_id.as_deref(), data.as_deref())
                    .await?
            }
            (service, payload) => {
                return Err(DispatchError::InvalidPayload {
                    service,
                    expected: expected_payload(service),
                    got: payload.kind(),
                })
            }
        };

        check_status(service, status)?;
        debug!(%service, station_id = %station.id(), "Service accepted");
        Ok(station)
    }
}

fn check_status(service: ServiceName, status: CommandStatus) -> Result<(), ProtocolError> {
    if status.is_success() {
        Ok(())
    } else {
        Err(ProtocolError::Rejected {
            operation: service.as_str(),
            status: status.to_string(),
        })
    }
}

fn expected_payload(service: ServiceName) -> &'static str {
    match service {
        ServiceName::Availability => "availability",
        ServiceName::ChargeStart => "charge_start",
        ServiceName::SetChargeRate => "charge_rate with a limit",
        ServiceName::Configure => "configure",
        ServiceName::GetConfiguration => "get_configuration",
        ServiceName::GetDiagnostics => "get_diagnostics",
        ServiceName::UpdateFirmware => "update_firmware",
        ServiceName::DataTransfer => "data_transfer",
        _ => "none",
    }
}

fn active_transaction(node: &SharedNode) -> Option<String> {
    match node.metrics().value(keys::TRANSACTION_ID)? {
        MetricValue::Text(id) if !id.is_empty() => Some(id),
        MetricValue::Integer(id) => Some(id.to_string()),
        _ => None,
    }
}

/// Walk `station → [evse] → [connector]` as far as `scope` allows.
fn resolve(
    station: &SharedStation,
    request: &ServiceRequest,
    scope: Scope,
) -> Result<SharedNode, DispatchError> {
    let limit = match scope {
        Scope::Station => return Ok(station.node().clone()),
        Scope::UpTo(kind) | Scope::Exactly(kind) => depth(kind),
    };
    let failure = |segment: &'static str, value: String| DispatchError::ResolutionFailure {
        station_id: station.id().to_string(),
        segment,
        value,
    };
    let evse_id = request.evse_id.filter(|id| *id > 0);
    let connector_id = request.connector_id.filter(|id| *id > 0);

    let mut node = station.node().clone();
    match (station.shape(), evse_id) {
        (TopologyShape::Flat, Some(evse)) => return Err(failure("evse", evse.to_string())),
        (TopologyShape::Nested, Some(evse)) => {
            node = node
                .child(&evse.to_string())
                .ok_or_else(|| failure("evse", evse.to_string()))?;
        }
        (TopologyShape::Nested, None) if connector_id.is_some() && limit >= depth(NodeKind::Connector) => {
            return Err(failure("evse", "missing".to_string()));
        }
        _ => {}
    }

    if let Some(connector) = connector_id {
        if limit >= depth(NodeKind::Connector) {
            node = node
                .child(&connector.to_string())
                .ok_or_else(|| failure("connector", connector.to_string()))?;
        }
    }

    if let Scope::Exactly(kind) = scope {
        if node.kind() != kind {
            let segment = match kind {
                NodeKind::Evse => "evse",
                _ => "connector",
            };
            return Err(failure(segment, "missing".to_string()));
        }
    }
    Ok(node)
}

pub type SharedServiceRouter = Arc<ServiceRouter>;
