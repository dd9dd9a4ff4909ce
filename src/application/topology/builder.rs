use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use serde_json::json;
use tracing::{debug, info, warn};

use super::report::{DeviceReport, ReportStore, ReportVariable};
use super::station::{SharedStation, Station};
use crate::application::events::{
    ChildrenChangedEvent, Event, SharedEventBus, StationAttachedEvent,
    StationConnectionChangedEvent, StationDetachedEvent,
};
use crate::application::ports::{DeviceDescriptor, SharedProtocol, SharedRegistry};
use crate::application::reconcile::{ReconcileReport, SharedReconciler};
use crate::config::{BuiltinDefaults, InstallationOverrides, StationSettings};
use crate::domain::metrics::keys;
use crate::domain::{Metric, MetricValue, NodeKind, SharedNode, TopologyNode, TopologyShape};
use crate::support::TopologyError;

/// Identity a station reports when it boots.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BootInfo {
    pub vendor: String,
    pub model: String,
    pub serial: Option<String>,
    pub firmware_version: Option<String>,
}

/// Reacts to protocol lifecycle events by mutating the topology and
/// reconciling the affected nodes.
///
/// Every callback awaits the reconciliation it triggers and returns its
/// report; a protocol engine that must not block its message loop spawns
/// the callback instead.
pub struct TopologyBuilder {
    root: SharedNode,
    stations: DashMap<String, SharedStation>,
    registry: SharedRegistry,
    reconciler: SharedReconciler,
    reports: ReportStore,
    event_bus: SharedEventBus,
    overrides: InstallationOverrides,
    defaults: BuiltinDefaults,
}

impl TopologyBuilder {
    pub fn new(
        root: SharedNode,
        registry: SharedRegistry,
        reconciler: SharedReconciler,
        event_bus: SharedEventBus,
        overrides: InstallationOverrides,
    ) -> Self {
        Self {
            root,
            stations: DashMap::new(),
            registry,
            reconciler,
            reports: ReportStore::new(),
            event_bus,
            overrides,
            defaults: BuiltinDefaults::default(),
        }
    }

    pub fn root(&self) -> &SharedNode {
        &self.root
    }

    /// Most recent device report of a station, complete or still arriving.
    pub fn latest_report(&self, station_id: &str) -> Option<DeviceReport> {
        self.reports.get_latest_report(station_id)
    }

    pub fn station(&self, station_id: &str) -> Option<SharedStation> {
        self.stations.get(station_id).map(|s| s.clone())
    }

    pub fn station_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.stations.iter().map(|s| s.key().clone()).collect();
        ids.sort();
        ids
    }

    fn require_station(&self, station_id: &str) -> Result<SharedStation, TopologyError> {
        self.station(station_id)
            .ok_or_else(|| TopologyError::StationNotFound(station_id.to_string()))
    }

    /// Find a node anywhere in the tree by its device id.
    pub fn find_node(&self, device_id: &str) -> Option<SharedNode> {
        fn walk(node: &SharedNode, device_id: &str) -> Option<SharedNode> {
            if node.device_id() == device_id {
                return Some(node.clone());
            }
            node.children().iter().find_map(|c| walk(c, device_id))
        }
        walk(&self.root, device_id)
    }

    /// Find the node that registered the entity `unique_id`.
    pub fn find_entity_node(&self, unique_id: &str) -> Option<SharedNode> {
        fn walk(node: &SharedNode, unique_id: &str) -> Option<SharedNode> {
            if node.registered_entity_ids().contains(unique_id) {
                return Some(node.clone());
            }
            node.children().iter().find_map(|c| walk(c, unique_id))
        }
        walk(&self.root, unique_id)
    }

    /// Locate the node addressed by a protocol message.
    ///
    /// Id 0 (or no id) addresses the level above, as in OCPP where
    /// connector 0 means the whole station.
    pub fn locate(
        &self,
        station_id: &str,
        evse_id: Option<u32>,
        connector_id: Option<u32>,
    ) -> Result<SharedNode, TopologyError> {
        let station = self.require_station(station_id)?;
        let node = station.node().clone();
        let evse_id = evse_id.filter(|id| *id > 0);
        let connector_id = connector_id.filter(|id| *id > 0);

        let outlet_parent = match (station.shape(), evse_id) {
            (TopologyShape::Flat, Some(_)) => {
                return Err(TopologyError::ShapeMismatch {
                    station_id: station_id.to_string(),
                    shape: TopologyShape::Flat,
                    level: "EVSE",
                })
            }
            (TopologyShape::Flat, None) => node,
            (TopologyShape::Nested, Some(evse)) => node
                .child(&evse.to_string())
                .ok_or_else(|| TopologyError::NodeNotFound(format!("{}_{}", station_id, evse)))?,
            (TopologyShape::Nested, None) if connector_id.is_some() => {
                return Err(TopologyError::NodeNotFound(format!(
                    "{}: connector without EVSE",
                    station_id
                )))
            }
            (TopologyShape::Nested, None) => node,
        };

        match connector_id {
            None => Ok(outlet_parent),
            Some(connector) => outlet_parent.child(&connector.to_string()).ok_or_else(|| {
                TopologyError::NodeNotFound(format!("{}_{}", outlet_parent.device_id(), connector))
            }),
        }
    }

    // ── Devices ────────────────────────────────────────────────────

    async fn register_device(&self, node: &SharedNode) -> Result<(), TopologyError> {
        let info = node.device_info();
        let mut identifiers = BTreeSet::from([node.device_id()]);
        if let Some(serial) = &info.serial {
            identifiers.insert(serial.clone());
        }
        self.registry
            .get_or_create_device(DeviceDescriptor {
                device_id: node.device_id(),
                identifiers,
                parent: node.parent().map(|p| p.device_id()),
                name: info.name,
                model: info.model,
                vendor: info.vendor,
                sw_version: info.firmware_version,
            })
            .await?;
        Ok(())
    }

    /// Register the central system's own device and reconcile it.
    pub async fn register_root(&self) -> Result<ReconcileReport, TopologyError> {
        self.root.update_device_info(|info| {
            info.model = Some("Central System".to_string());
        });
        self.register_device(&self.root).await?;
        Ok(self.reconciler.reconcile(self.root.clone()).await)
    }

    // ── Connect / disconnect ───────────────────────────────────────

    /// A station connected.
    ///
    /// A station that is already known re-uses its node when the
    /// negotiated version keeps the same shape. A shape change retires the
    /// old subtree and builds a fresh one.
    pub async fn attach_station(&self, protocol: SharedProtocol) -> Result<SharedStation, TopologyError> {
        let station_id = protocol.station_id().to_string();
        if station_id == self.root.id() {
            return Err(TopologyError::ReservedId(station_id));
        }
        let version = protocol.version();
        let shape = version.shape();

        if let Some(existing) = self.station(&station_id) {
            if existing.shape() == shape {
                let station = Arc::new(existing.with_protocol(protocol));
                self.stations.insert(station_id.clone(), station.clone());
                self.publish_attached(&station, true);
                self.on_reconnect(&station_id).await?;
                return Ok(station);
            }
            warn!(
                %station_id,
                old = %existing.shape(),
                new = %shape,
                "Station changed topology shape, rebuilding"
            );
            self.stations.remove(&station_id);
            self.root.retire_child(&station_id);
            // The new node shares the device id; purge the old one first.
            self.reconciler.reconcile(self.root.clone()).await;
        }

        let settings = Arc::new(StationSettings::resolve(&self.overrides, &self.defaults)?);
        let (node, _) = self
            .root
            .insert_station(station_id.clone(), shape)
            .ok_or_else(|| TopologyError::LeafNode(self.root.device_id()))?;
        node.set_healthy(true);
        node.update_device_info(|info| {
            info.model = Some(shape.station_model().to_string());
        });
        let metrics = node.metrics();
        metrics.set_value(keys::IDENTIFIER, station_id.as_str());
        metrics.set_value(keys::STATUS, keys::CONNECTED);
        metrics.set_value(keys::AVAILABILITY, keys::OPERATIVE);
        metrics.set_value(keys::RECONNECTS, 0_i64);
        metrics.set_value(keys::CURRENT_SETPOINT, settings.default_current);

        let station = Arc::new(Station::new(node.clone(), protocol, settings));
        self.stations.insert(station_id.clone(), station.clone());
        self.register_device(&node).await?;

        info!(%station_id, %version, %shape, "Charging station attached");
        self.publish_attached(&station, false);

        // Root pass also covers the new station subtree.
        self.reconciler.reconcile(self.root.clone()).await;
        Ok(station)
    }

    fn publish_attached(&self, station: &Station, reattached: bool) {
        self.event_bus.publish(Event::StationAttached(StationAttachedEvent {
            station_id: station.id().to_string(),
            ocpp_version: station.version().to_string(),
            shape: station.shape().to_string(),
            reattached,
            timestamp: Utc::now(),
        }));
    }

    /// Connection lost. The node is kept; it and everything below it
    /// render unavailable until the station reconnects.
    pub async fn on_disconnect(&self, station_id: &str) -> Result<ReconcileReport, TopologyError> {
        let station = self.require_station(station_id)?;
        let node = station.node();
        node.set_healthy(false);
        node.metrics().set_value(keys::STATUS, keys::UNAVAILABLE);
        mark_subtree_unavailable(node);

        warn!(%station_id, "Charging station disconnected");
        self.publish_connection(node, false);
        Ok(self.reconciler.reconcile(node.clone()).await)
    }

    pub async fn on_reconnect(&self, station_id: &str) -> Result<ReconcileReport, TopologyError> {
        let station = self.require_station(station_id)?;
        let node = station.node();
        let reconnects = node
            .metrics()
            .value(keys::RECONNECTS)
            .and_then(|v| v.as_i64())
            .unwrap_or(0)
            + 1;
        node.metrics().set_value(keys::RECONNECTS, reconnects);
        node.metrics().set_value(keys::STATUS, keys::CONNECTED);
        node.set_healthy(true);

        info!(%station_id, reconnects, "Charging station reconnected");
        self.publish_connection(node, true);
        Ok(self.reconciler.reconcile(node.clone()).await)
    }

    fn publish_connection(&self, node: &SharedNode, connected: bool) {
        self.event_bus
            .publish(Event::StationConnectionChanged(StationConnectionChangedEvent {
                station_id: node.id().to_string(),
                connected,
                reconnects: node
                    .metrics()
                    .value(keys::RECONNECTS)
                    .and_then(|v| v.as_i64())
                    .unwrap_or(0),
                timestamp: Utc::now(),
            }));
    }

    /// Permanent teardown: the station's entities and devices are removed
    /// by the root pass that follows.
    pub async fn detach_station(&self, station_id: &str) -> Result<ReconcileReport, TopologyError> {
        self.stations
            .remove(station_id)
            .ok_or_else(|| TopologyError::StationNotFound(station_id.to_string()))?;
        self.root.retire_child(station_id);
        self.reports.clear_station(station_id);

        info!(%station_id, "Charging station detached");
        self.event_bus.publish(Event::StationDetached(StationDetachedEvent {
            station_id: station_id.to_string(),
            timestamp: Utc::now(),
        }));
        Ok(self.reconciler.reconcile(self.root.clone()).await)
    }

    // ── Boot and identity ──────────────────────────────────────────

    pub async fn on_boot(&self, station_id: &str, boot: BootInfo) -> Result<ReconcileReport, TopologyError> {
        let station = self.require_station(station_id)?;
        let node = station.node();
        node.update_device_info(|info| {
            info.vendor = Some(boot.vendor.clone());
            info.model = Some(boot.model.clone());
            info.serial = boot.serial.clone();
            info.firmware_version = boot.firmware_version.clone();
        });

        let metrics = node.metrics();
        metrics.set_value(keys::VENDOR, boot.vendor.as_str());
        metrics.set_value(keys::MODEL, boot.model.as_str());
        if let Some(serial) = &boot.serial {
            metrics.set_value(keys::SERIAL, serial.as_str());
        }
        if let Some(firmware) = &boot.firmware_version {
            metrics.set_value(keys::FIRMWARE_VERSION, firmware.as_str());
        }

        self.register_device(node).await?;
        info!(%station_id, vendor = %boot.vendor, model = %boot.model, "Boot notification applied");
        Ok(self.reconciler.reconcile(node.clone()).await)
    }

    pub async fn on_heartbeat(&self, station_id: &str) -> Result<(), TopologyError> {
        let station = self.require_station(station_id)?;
        station
            .node()
            .metrics()
            .set_value(keys::HEARTBEAT, Utc::now().to_rfc3339());
        Ok(())
    }

    // ── Cardinality ────────────────────────────────────────────────

    /// Make sure children `1..=count` exist below `parent`, then reconcile
    /// `parent`. Existing children are kept as they are.
    pub async fn add_children(
        &self,
        parent: &SharedNode,
        count: u32,
    ) -> Result<ReconcileReport, TopologyError> {
        self.grow(parent, count).await?;
        Ok(self.reconciler.reconcile(parent.clone()).await)
    }

    async fn grow(&self, parent: &SharedNode, count: u32) -> Result<Vec<String>, TopologyError> {
        let kind = parent
            .child_kind()
            .ok_or_else(|| TopologyError::LeafNode(parent.device_id()))?;
        let vendor = parent
            .station()
            .and_then(|s| s.device_info().vendor);

        let mut created = Vec::new();
        for n in 1..=count {
            let Some((child, is_new)) = parent.insert_outlet(n.to_string()) else {
                return Err(TopologyError::LeafNode(parent.device_id()));
            };
            if !is_new {
                continue;
            }
            let name = format!("{} {}", kind_label(kind), child.device_id());
            child.update_device_info(|info| {
                info.name = name;
                info.model = Some(kind_label(kind).to_string());
                info.vendor = vendor.clone();
            });
            let metrics = child.metrics();
            metrics.set_value(keys::IDENTIFIER, child.id());
            metrics.set_value(keys::AVAILABILITY, keys::OPERATIVE);
            self.register_device(&child).await?;
            created.push(child.id().to_string());
        }

        parent
            .metrics()
            .set_value(keys::CONNECTORS, parent.child_count() as i64);

        if !created.is_empty() {
            debug!(parent = %parent.device_id(), children = ?created, "Children added");
            self.event_bus.publish(Event::ChildrenAdded(ChildrenChangedEvent {
                station_id: parent.station().map(|s| s.id().to_string()),
                parent_device_id: parent.device_id(),
                child_ids: created.clone(),
                timestamp: Utc::now(),
            }));
        }
        Ok(created)
    }

    /// Retire numbered children beyond `count`; the next pass over
    /// `parent` purges them.
    fn shrink(&self, parent: &SharedNode, count: u32) {
        let retired = parent.retire_children_beyond(count);
        if retired.is_empty() {
            return;
        }
        let ids: Vec<String> = retired.iter().map(|c| c.id().to_string()).collect();
        info!(parent = %parent.device_id(), children = ?ids, "Children retired");
        parent
            .metrics()
            .set_value(keys::CONNECTORS, parent.child_count() as i64);
        self.event_bus.publish(Event::ChildrenRetired(ChildrenChangedEvent {
            station_id: parent.station().map(|s| s.id().to_string()),
            parent_device_id: parent.device_id(),
            child_ids: ids,
            timestamp: Utc::now(),
        }));
    }

    /// Grow or shrink `parent` to exactly `count` numbered children.
    pub async fn set_children_count(
        &self,
        parent: &SharedNode,
        count: u32,
    ) -> Result<ReconcileReport, TopologyError> {
        self.grow(parent, count).await?;
        self.shrink(parent, count);
        Ok(self.reconciler.reconcile(parent.clone()).await)
    }

    /// Connectors reported for a flat station, or for one EVSE of a
    /// nested station.
    pub async fn on_connectors_discovered(
        &self,
        station_id: &str,
        evse_id: Option<u32>,
        count: u32,
    ) -> Result<ReconcileReport, TopologyError> {
        let parent = self.locate(station_id, evse_id, None)?;
        if parent.kind() == NodeKind::ChargingStation && parent.shape() == Some(TopologyShape::Nested) {
            return Err(TopologyError::NodeNotFound(format!(
                "{}: connectors need an EVSE",
                station_id
            )));
        }
        self.add_children(&parent, count).await
    }

    pub async fn on_evses_discovered(
        &self,
        station_id: &str,
        count: u32,
    ) -> Result<ReconcileReport, TopologyError> {
        let station = self.require_station(station_id)?;
        if station.shape() != TopologyShape::Nested {
            return Err(TopologyError::ShapeMismatch {
                station_id: station_id.to_string(),
                shape: station.shape(),
                level: "EVSE",
            });
        }
        self.add_children(station.node(), count).await
    }

    // ── Device reports ─────────────────────────────────────────────

    /// One part of a device report. When the last part arrives
    /// (`tbc == false`) the assembled report is applied: cardinality of
    /// every level follows the report and non-controller variables become
    /// sensors on the node they describe.
    pub async fn on_report(
        &self,
        station_id: &str,
        request_id: i32,
        variables: Vec<ReportVariable>,
        tbc: bool,
    ) -> Result<Option<ReconcileReport>, TopologyError> {
        let station = self.require_station(station_id)?;
        let Some(report) = self.reports.append_report(station_id, request_id, variables, tbc) else {
            debug!(%station_id, request_id, "Report part stored, waiting for more");
            return Ok(None);
        };
        let node = station.node();

        match station.shape() {
            TopologyShape::Flat => {
                let connectors = report.connector_count(None);
                if connectors > 0 {
                    self.grow(node, connectors).await?;
                    self.shrink(node, connectors);
                }
            }
            TopologyShape::Nested => {
                let evses = report.evse_count();
                if evses > 0 {
                    self.grow(node, evses).await?;
                    self.shrink(node, evses);
                }
                for evse in node.children() {
                    let connectors = report.connector_count(evse.numeric_id());
                    if connectors > 0 {
                        self.grow(&evse, connectors).await?;
                        self.shrink(&evse, connectors);
                    }
                }
            }
        }

        for variable in report.variables.iter().filter(|v| !v.is_controller()) {
            let target = match self.locate(station_id, variable.evse_id, variable.connector_id) {
                Ok(target) => target,
                Err(e) => {
                    debug!(%station_id, error = %e, "Report variable has no node");
                    continue;
                }
            };
            let key = variable.metric_key();
            let mut metric = match variable.actual_value() {
                Some(value) => Metric::new(parse_reported(value)),
                None => Metric::empty(),
            };
            metric.unit = variable.unit.clone();
            target.metrics().set(key.clone(), metric);
            target.track_sensor(key);
        }

        info!(
            %station_id,
            request_id,
            parts = report.parts_received,
            variables = report.variables.len(),
            "Device report applied"
        );
        Ok(Some(self.reconciler.reconcile(node.clone()).await))
    }

    // ── Telemetry ──────────────────────────────────────────────────

    pub async fn on_status_change(
        &self,
        station_id: &str,
        evse_id: Option<u32>,
        connector_id: Option<u32>,
        status: &str,
        error_code: Option<&str>,
    ) -> Result<ReconcileReport, TopologyError> {
        let station = self.require_station(station_id)?;
        let node = self.locate(station_id, evse_id, connector_id)?;
        node.metrics().set_value(keys::STATUS, status);
        if let Some(code) = error_code {
            node.metrics().set_value(keys::ERROR_CODE, code);
        }
        node.metrics().set_value(
            keys::AVAILABILITY,
            if status == keys::UNAVAILABLE {
                keys::INOPERATIVE
            } else {
                keys::OPERATIVE
            },
        );

        if node.kind() == NodeKind::Connector {
            if let Some(evse) = node.parent().filter(|p| p.kind() == NodeKind::Evse) {
                evse.metrics().set_value(keys::STATUS, evse_status(&evse));
            }
        }

        debug!(%station_id, device_id = %node.device_id(), status, "Status changed");
        Ok(self.reconciler.reconcile(station.node().clone()).await)
    }

    /// Measurand samples for one node. Every key becomes a sensor.
    pub async fn on_meter_values(
        &self,
        station_id: &str,
        evse_id: Option<u32>,
        connector_id: Option<u32>,
        samples: Vec<(String, Metric)>,
    ) -> Result<ReconcileReport, TopologyError> {
        let node = self.locate(station_id, evse_id, connector_id)?;
        for (key, metric) in samples {
            node.track_sensor(key.clone());
            node.metrics().set(key, metric);
        }
        let station = node.station().unwrap_or(node);
        Ok(self.reconciler.reconcile(station).await)
    }

    /// Replace metrics that back the fixed entity set (session values,
    /// id tag, latency...). No new sensors are created.
    pub async fn update_metrics(
        &self,
        station_id: &str,
        evse_id: Option<u32>,
        connector_id: Option<u32>,
        values: BTreeMap<String, MetricValue>,
    ) -> Result<ReconcileReport, TopologyError> {
        let node = self.locate(station_id, evse_id, connector_id)?;
        for (key, value) in values {
            node.metrics().set(key, Metric::new(value));
        }
        Ok(self.reconciler.reconcile(node).await)
    }

    // ── Notifications ──────────────────────────────────────────────

    pub async fn on_firmware_status(
        &self,
        station_id: &str,
        status: &str,
    ) -> Result<ReconcileReport, TopologyError> {
        let station = self.require_station(station_id)?;
        station.node().metrics().set_value(keys::FIRMWARE_STATUS, status);
        self.notify(station_id, &format!("Firmware update status: {}", status), json!({ "status": status }))
            .await?;
        Ok(self.reconciler.reconcile(station.node().clone()).await)
    }

    pub async fn on_diagnostics_status(&self, station_id: &str, status: &str) -> Result<bool, TopologyError> {
        self.notify(station_id, &format!("Diagnostics upload status: {}", status), json!({ "status": status }))
            .await
    }

    pub async fn on_security_event(
        &self,
        station_id: &str,
        event_type: &str,
        tech_info: Option<&str>,
    ) -> Result<bool, TopologyError> {
        self.notify(
            station_id,
            &format!("Security event: {}", event_type),
            json!({ "type": event_type, "tech_info": tech_info }),
        )
        .await
    }

    /// Forward a user notification through the station's protocol engine.
    pub async fn notify(
        &self,
        station_id: &str,
        message: &str,
        params: serde_json::Value,
    ) -> Result<bool, TopologyError> {
        let station = self.require_station(station_id)?;
        let delivered = station.protocol().notify(message, params).await;
        if !delivered {
            warn!(%station_id, message, "Notification not delivered");
        }
        Ok(delivered)
    }
}

fn kind_label(kind: NodeKind) -> &'static str {
    match kind {
        NodeKind::CentralSystem => "Central System",
        NodeKind::ChargingStation => "Charging Station",
        NodeKind::Evse => "EVSE",
        NodeKind::Connector => "Connector",
    }
}

/// An EVSE is occupied while any connector is; otherwise it reports the
/// status its connectors agree on, or `Available`.
fn evse_status(evse: &TopologyNode) -> String {
    let statuses: Vec<String> = evse
        .children()
        .iter()
        .filter_map(|c| c.metrics().text(keys::STATUS))
        .collect();
    if statuses.iter().any(|s| s == "Occupied") {
        return "Occupied".to_string();
    }
    match statuses.first() {
        Some(first) if statuses.iter().all(|s| s == first) => first.clone(),
        _ => "Available".to_string(),
    }
}

fn mark_subtree_unavailable(node: &SharedNode) {
    for child in node.children() {
        child.metrics().set_value(keys::AVAILABILITY, keys::INOPERATIVE);
        child.metrics().set_value(keys::STATUS, keys::UNAVAILABLE);
        mark_subtree_unavailable(&child);
    }
}

fn parse_reported(raw: &str) -> MetricValue {
    if let Ok(v) = raw.parse::<i64>() {
        return MetricValue::Integer(v);
    }
    if let Ok(v) = raw.parse::<f64>() {
        return MetricValue::Float(v);
    }
    match raw {
        "true" => MetricValue::Bool(true),
        "false" => MetricValue::Bool(false),
        _ => MetricValue::Text(raw.to_string()),
    }
}

pub type SharedTopologyBuilder = Arc<TopologyBuilder>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::events::create_event_bus;
    use crate::application::reconcile::Reconciler;
    use crate::application::testing::RecordingProtocol;
    use crate::domain::entity::CatalogContext;
    use crate::domain::ReconcileState;
    use crate::domain::OcppVersion;
    use crate::infrastructure::registry::InMemoryEntityRegistry;

    fn builder() -> (Arc<InMemoryEntityRegistry>, TopologyBuilder) {
        let registry = Arc::new(InMemoryEntityRegistry::new());
        let bus = create_event_bus();
        let reconciler = Arc::new(Reconciler::new(registry.clone(), CatalogContext::default(), bus.clone()));
        let builder = TopologyBuilder::new(
            TopologyNode::central_system("cs"),
            registry.clone(),
            reconciler,
            bus,
            InstallationOverrides::default(),
        );
        (registry, builder)
    }

    #[tokio::test]
    async fn attach_registers_station_device_under_root() {
        let (registry, builder) = builder();
        builder.register_root().await.unwrap();
        let station = builder
            .attach_station(RecordingProtocol::shared("CP1", OcppVersion::V16))
            .await
            .unwrap();

        assert_eq!(station.shape(), TopologyShape::Flat);
        let device = registry.device("CP1").unwrap();
        assert_eq!(device.parent.as_deref(), Some("cs"));
        assert_eq!(device.model.as_deref(), Some("OCPP 1.6 Charge Point"));
        assert!(registry.entity("switch.charge_advisor.CP1.availability").is_some());
        assert!(registry.entity("switch.charge_advisor.cs.energy_control_communication").is_some());
    }

    #[tokio::test]
    async fn add_children_is_idempotent() {
        let (registry, builder) = builder();
        let station = builder
            .attach_station(RecordingProtocol::shared("CP1", OcppVersion::V16))
            .await
            .unwrap();

        builder.add_children(station.node(), 2).await.unwrap();
        let entities = registry.entity_count();
        let report = builder.add_children(station.node(), 2).await.unwrap();

        assert_eq!(station.node().child_count(), 2);
        assert_eq!(report.total_added(), 0);
        assert_eq!(registry.entity_count(), entities);
        assert!(registry.device("CP1_2").is_some());
    }

    #[tokio::test]
    async fn station_cannot_take_the_central_system_id() {
        let (registry, builder) = builder();
        builder.register_root().await.unwrap();
        let entities = registry.entity_ids("cs");

        let err = builder
            .attach_station(RecordingProtocol::shared("cs", OcppVersion::V16))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Station id cs is reserved for the central system");
        assert!(builder.station("cs").is_none());
        assert_eq!(builder.root().child_count(), 0);
        assert_eq!(registry.entity_ids("cs"), entities);
    }

    #[tokio::test]
    async fn children_count_grows_then_shrinks_with_purge() {
        let (registry, builder) = builder();
        let station = builder
            .attach_station(RecordingProtocol::shared("CP1", OcppVersion::V16))
            .await
            .unwrap();

        let grown = builder.set_children_count(station.node(), 3).await.unwrap();
        assert_eq!(station.node().child_count(), 3);
        assert_eq!(grown.children.len(), 3);
        let kept = registry.entity_ids("CP1_1");
        assert!(!kept.is_empty());
        assert!(registry.device("CP1_3").is_some());

        let shrunk = builder.set_children_count(station.node(), 1).await.unwrap();
        assert_eq!(station.node().child_count(), 1);
        assert_eq!(shrunk.purged_devices, 2);
        assert!(registry.entity_ids("CP1_2").is_empty());
        assert!(registry.entity_ids("CP1_3").is_empty());
        assert!(registry.device("CP1_2").is_none());
        assert!(registry.device("CP1_3").is_none());
        assert_eq!(registry.entity_ids("CP1_1"), kept);
        assert_eq!(station.node().reconcile_state(), ReconcileState::Idle);
    }

    #[tokio::test]
    async fn heartbeat_stamps_the_station() {
        let (_registry, builder) = builder();
        let station = builder
            .attach_station(RecordingProtocol::shared("CP1", OcppVersion::V16))
            .await
            .unwrap();
        assert!(station.node().metrics().text(keys::HEARTBEAT).is_none());

        builder.on_heartbeat("CP1").await.unwrap();
        let stamp = station.node().metrics().text(keys::HEARTBEAT).unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(&stamp).is_ok());
        assert!(matches!(
            builder.on_heartbeat("CP9").await,
            Err(TopologyError::StationNotFound(_))
        ));
    }

    #[tokio::test]
    async fn metric_updates_land_on_the_addressed_connector() {
        let (_registry, builder) = builder();
        let station = builder
            .attach_station(RecordingProtocol::shared("CP1", OcppVersion::V16))
            .await
            .unwrap();
        builder.add_children(station.node(), 2).await.unwrap();

        let values = BTreeMap::from([(keys::TRANSACTION_ID.to_string(), MetricValue::from("4711"))]);
        let report = builder.update_metrics("CP1", None, Some(2), values).await.unwrap();

        assert!(report.is_clean());
        assert_eq!(report.device_id, "CP1_2");
        let connector = station.node().child("2").unwrap();
        assert_eq!(connector.metrics().text(keys::TRANSACTION_ID).as_deref(), Some("4711"));
        assert!(station.node().child("1").unwrap().metrics().get(keys::TRANSACTION_ID).is_none());
    }

    #[tokio::test]
    async fn diagnostics_and_security_events_notify() {
        let (_registry, builder) = builder();
        let protocol = RecordingProtocol::new("CP1", OcppVersion::V201);
        builder.attach_station(protocol.clone()).await.unwrap();

        assert!(builder.on_diagnostics_status("CP1", "Uploaded").await.unwrap());
        assert!(builder
            .on_security_event("CP1", "FirmwareUpdated", Some("v2.0"))
            .await
            .unwrap());
        assert_eq!(
            protocol.notifications(),
            vec![
                "Diagnostics upload status: Uploaded".to_string(),
                "Security event: FirmwareUpdated".to_string(),
            ]
        );
        assert!(builder.on_security_event("CP9", "Tamper", None).await.is_err());
    }

    #[tokio::test]
    async fn reconnect_with_same_shape_reuses_node() {
        let (_registry, builder) = builder();
        let first = builder
            .attach_station(RecordingProtocol::shared("CP1", OcppVersion::V201))
            .await
            .unwrap();
        builder.on_evses_discovered("CP1", 1).await.unwrap();
        builder.on_disconnect("CP1").await.unwrap();
        assert!(!first.node().is_available());

        let second = builder
            .attach_station(RecordingProtocol::shared("CP1", OcppVersion::V201))
            .await
            .unwrap();
        assert!(Arc::ptr_eq(first.node(), second.node()));
        assert!(second.node().is_available());
        assert_eq!(second.node().child_count(), 1);
        assert_eq!(
            second.node().metrics().value(keys::RECONNECTS),
            Some(MetricValue::Integer(1))
        );
    }

    #[tokio::test]
    async fn shape_change_rebuilds_station() {
        let (registry, builder) = builder();
        let flat = builder
            .attach_station(RecordingProtocol::shared("CP1", OcppVersion::V16))
            .await
            .unwrap();
        builder.add_children(flat.node(), 2).await.unwrap();

        let nested = builder
            .attach_station(RecordingProtocol::shared("CP1", OcppVersion::V201))
            .await
            .unwrap();
        assert!(!Arc::ptr_eq(flat.node(), nested.node()));
        assert_eq!(nested.shape(), TopologyShape::Nested);
        assert_eq!(nested.node().child_count(), 0);
        assert!(registry.entity_ids("CP1_1").is_empty());
        assert!(!registry.entity_ids("CP1").is_empty());
    }

    #[tokio::test]
    async fn disconnect_marks_descendants_unavailable() {
        let (registry, builder) = builder();
        let station = builder
            .attach_station(RecordingProtocol::shared("CP1", OcppVersion::V16))
            .await
            .unwrap();
        builder.add_children(station.node(), 1).await.unwrap();
        builder.on_disconnect("CP1").await.unwrap();

        let connector = station.node().child("1").unwrap();
        assert_eq!(connector.metrics().text(keys::AVAILABILITY).as_deref(), Some(keys::INOPERATIVE));
        let snapshot = registry.entity("sensor.charge_advisor.CP1.1.status").unwrap().snapshot;
        assert!(!snapshot.available);
    }

    #[tokio::test]
    async fn flat_station_rejects_evse_addressing() {
        let (_registry, builder) = builder();
        builder
            .attach_station(RecordingProtocol::shared("CP1", OcppVersion::V16))
            .await
            .unwrap();
        let err = builder.on_evses_discovered("CP1", 1).await.unwrap_err();
        assert!(matches!(err, TopologyError::ShapeMismatch { .. }));
        assert!(builder.locate("CP1", Some(1), None).is_err());
        assert!(builder.locate("CP1", None, Some(0)).is_ok());
    }

    #[tokio::test]
    async fn report_shrink_removes_exactly_one_connector() {
        let (registry, builder) = builder();
        builder
            .attach_station(RecordingProtocol::shared("CP1", OcppVersion::V201))
            .await
            .unwrap();

        let two = vec![
            ReportVariable::new("EVSE", "AvailabilityState").at(Some(1), None).actual("Available"),
            ReportVariable::new("Connector", "AvailabilityState").at(Some(1), Some(1)),
            ReportVariable::new("Connector", "AvailabilityState").at(Some(1), Some(2)),
        ];
        builder.on_report("CP1", 1, two, false).await.unwrap().unwrap();
        let first = registry.entity_ids("CP1_1_1");
        let second = registry.entity_ids("CP1_1_2");
        assert!(!first.is_empty());
        assert!(!second.is_empty());

        let one = vec![ReportVariable::new("Connector", "AvailabilityState").at(Some(1), Some(1))];
        let report = builder.on_report("CP1", 2, one, false).await.unwrap().unwrap();

        assert_eq!(report.total_removed(), second.len());
        assert!(registry.entity_ids("CP1_1_2").is_empty());
        assert_eq!(registry.entity_ids("CP1_1_1"), first);
    }

    #[tokio::test]
    async fn partial_report_waits_for_last_part() {
        let (_registry, builder) = builder();
        builder
            .attach_station(RecordingProtocol::shared("CP1", OcppVersion::V201))
            .await
            .unwrap();
        let part = vec![ReportVariable::new("Connector", "AvailabilityState").at(Some(1), Some(1))];
        assert!(builder.on_report("CP1", 3, part, true).await.unwrap().is_none());
        assert_eq!(builder.station("CP1").unwrap().node().child_count(), 0);

        let pending = builder.latest_report("CP1").unwrap();
        assert!(pending.in_progress);
        assert_eq!(pending.parts_received, 1);

        let last = vec![ReportVariable::new("SampledDataCtrlr", "Enabled").actual("true")];
        builder.on_report("CP1", 3, last, false).await.unwrap();
        let complete = builder.latest_report("CP1").unwrap();
        assert!(!complete.in_progress);
        assert_eq!(complete.request_id, 3);
        assert_eq!(complete.variables.len(), 2);
        let station = builder.station("CP1").unwrap();
        assert_eq!(station.node().child_count(), 1);
        assert!(station.node().tracked_sensors().is_empty());
    }

    #[tokio::test]
    async fn meter_values_create_sensors_on_the_addressed_node() {
        let (registry, builder) = builder();
        let station = builder
            .attach_station(RecordingProtocol::shared("CP1", OcppVersion::V16))
            .await
            .unwrap();
        builder.add_children(station.node(), 1).await.unwrap();

        builder
            .on_meter_values(
                "CP1",
                None,
                Some(1),
                vec![("energy.active_import.register".to_string(), Metric::new(1500.0).with_unit("Wh"))],
            )
            .await
            .unwrap();

        let record = registry
            .entity("sensor.charge_advisor.CP1.1.energy.active_import.register")
            .unwrap();
        assert_eq!(record.snapshot.unit.as_deref(), Some("Wh"));
        assert_eq!(record.snapshot.state, Some(MetricValue::Float(1500.0)));
    }

    #[tokio::test]
    async fn nested_connector_status_drives_evse_status() {
        let (_registry, builder) = builder();
        builder
            .attach_station(RecordingProtocol::shared("CP1", OcppVersion::V201))
            .await
            .unwrap();
        builder.on_evses_discovered("CP1", 1).await.unwrap();
        builder.on_connectors_discovered("CP1", Some(1), 2).await.unwrap();

        builder.on_status_change("CP1", Some(1), Some(2), "Occupied", None).await.unwrap();
        let evse = builder.locate("CP1", Some(1), None).unwrap();
        assert_eq!(evse.metrics().text(keys::STATUS).as_deref(), Some("Occupied"));
        assert_eq!(evse.metrics().value(keys::CONNECTORS), Some(MetricValue::Integer(2)));
    }

    #[tokio::test]
    async fn boot_updates_device_and_firmware_status_notifies() {
        let (registry, builder) = builder();
        let protocol = RecordingProtocol::new("CP1", OcppVersion::V16);
        builder.attach_station(protocol.clone()).await.unwrap();

        builder
            .on_boot(
                "CP1",
                BootInfo {
                    vendor: "Acme".into(),
                    model: "Volt 22".into(),
                    serial: Some("SN-9".into()),
                    firmware_version: Some("1.2.3".into()),
                },
            )
            .await
            .unwrap();
        let device = registry.device("CP1").unwrap();
        assert!(device.identifiers.contains("SN-9"));
        assert_eq!(device.sw_version.as_deref(), Some("1.2.3"));

        builder.on_firmware_status("CP1", "Installed").await.unwrap();
        assert_eq!(protocol.notifications(), vec!["Firmware update status: Installed".to_string()]);
    }

    #[tokio::test]
    async fn detach_purges_station_subtree() {
        let (registry, builder) = builder();
        builder.register_root().await.unwrap();
        let station = builder
            .attach_station(RecordingProtocol::shared("CP1", OcppVersion::V16))
            .await
            .unwrap();
        builder.add_children(station.node(), 2).await.unwrap();

        let report = builder.detach_station("CP1").await.unwrap();
        assert_eq!(report.purged_devices, 3);
        assert!(registry.entity_ids("CP1").is_empty());
        assert!(registry.device("CP1").is_none());
        assert!(registry.device("cs").is_some());
        assert!(builder.station("CP1").is_none());
        assert!(builder.latest_report("CP1").is_none());
    }
}
