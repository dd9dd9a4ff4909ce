use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::domain::metrics::MetricsStore;
use crate::domain::ocpp::TopologyShape;

/// Kind of a topology node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    CentralSystem,
    ChargingStation,
    Evse,
    Connector,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CentralSystem => "central_system",
            Self::ChargingStation => "charging_station",
            Self::Evse => "evse",
            Self::Connector => "connector",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a node is in its reconciliation cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileState {
    #[default]
    Idle,
    Adding,
    Updating,
}

/// Descriptive device data pushed to the registry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub firmware_version: Option<String>,
}

/// Shared handle to a node.
pub type SharedNode = Arc<TopologyNode>;

/// In-memory node of the charging topology.
///
/// A node exclusively owns its children and holds only a weak reference to
/// its parent. Availability is derived on every read: a node is available
/// when it is healthy itself and its parent is available.
///
/// `registered_entity_ids` and `reconcile_state` are written by the
/// reconciliation engine only.
pub struct TopologyNode {
    id: String,
    kind: NodeKind,
    shape: Option<TopologyShape>,
    parent: Option<Weak<TopologyNode>>,
    children: RwLock<Vec<SharedNode>>,
    retired: Mutex<Vec<SharedNode>>,
    metrics: MetricsStore,
    healthy: AtomicBool,
    detached: AtomicBool,
    device_info: RwLock<DeviceInfo>,
    sensor_keys: RwLock<BTreeSet<String>>,
    registered: RwLock<BTreeSet<String>>,
    state: Mutex<ReconcileState>,
    pub(crate) reconcile_gate: tokio::sync::Mutex<()>,
    pub(crate) reconcile_requested: AtomicU64,
    pub(crate) reconcile_started: AtomicU64,
}

impl TopologyNode {
    fn build(
        id: String,
        kind: NodeKind,
        shape: Option<TopologyShape>,
        parent: Option<Weak<TopologyNode>>,
    ) -> Self {
        let device_info = DeviceInfo {
            name: id.clone(),
            ..DeviceInfo::default()
        };
        Self {
            id,
            kind,
            shape,
            parent,
            children: RwLock::new(Vec::new()),
            retired: Mutex::new(Vec::new()),
            metrics: MetricsStore::new(),
            healthy: AtomicBool::new(true),
            detached: AtomicBool::new(false),
            device_info: RwLock::new(device_info),
            sensor_keys: RwLock::new(BTreeSet::new()),
            registered: RwLock::new(BTreeSet::new()),
            state: Mutex::new(ReconcileState::Idle),
            reconcile_gate: tokio::sync::Mutex::new(()),
            reconcile_requested: AtomicU64::new(0),
            reconcile_started: AtomicU64::new(0),
        }
    }

    /// Create the root of a tree.
    pub fn central_system(id: impl Into<String>) -> SharedNode {
        Arc::new(Self::build(id.into(), NodeKind::CentralSystem, None, None))
    }

    // ── Identity ───────────────────────────────────────────────────

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Shape of the station this node belongs to. `None` for the root.
    pub fn shape(&self) -> Option<TopologyShape> {
        self.shape
    }

    /// Numeric id of an EVSE or connector.
    pub fn numeric_id(&self) -> Option<u32> {
        match self.kind {
            NodeKind::Evse | NodeKind::Connector => self.id.parse().ok(),
            _ => None,
        }
    }

    pub fn parent(&self) -> Option<SharedNode> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    /// Ids from the charging station down to this node. The root's path is
    /// its own id.
    pub fn path(&self) -> Vec<String> {
        if self.kind == NodeKind::CentralSystem {
            return vec![self.id.clone()];
        }
        let mut path = vec![self.id.clone()];
        let mut cursor = self.parent();
        while let Some(node) = cursor {
            if node.kind == NodeKind::CentralSystem {
                break;
            }
            path.push(node.id.clone());
            cursor = node.parent();
        }
        path.reverse();
        path
    }

    /// Registry device identity: the path joined with `_`.
    pub fn device_id(&self) -> String {
        self.path().join("_")
    }

    /// The charging station this node belongs to (itself for a station).
    pub fn station(self: &Arc<Self>) -> Option<SharedNode> {
        let mut cursor = Some(self.clone());
        while let Some(node) = cursor {
            if node.kind == NodeKind::ChargingStation {
                return Some(node);
            }
            cursor = node.parent();
        }
        None
    }

    // ── Availability ───────────────────────────────────────────────

    pub fn is_available(&self) -> bool {
        if !self.is_healthy() || self.detached.load(Ordering::SeqCst) {
            return false;
        }
        match &self.parent {
            None => true,
            Some(weak) => weak.upgrade().is_some_and(|p| p.is_available()),
        }
    }

    /// The node's own health, ignoring ancestors.
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::SeqCst)
    }

    fn mark_detached(&self) {
        self.detached.store(true, Ordering::SeqCst);
        for child in self.children() {
            child.mark_detached();
        }
    }

    // ── Children ───────────────────────────────────────────────────

    /// Snapshot of the current children.
    pub fn children(&self) -> Vec<SharedNode> {
        self.children.read().clone()
    }

    pub fn child(&self, id: &str) -> Option<SharedNode> {
        self.children.read().iter().find(|c| c.id == id).cloned()
    }

    pub fn child_count(&self) -> usize {
        self.children.read().len()
    }

    /// Kind of the children this node owns, if it can own any.
    pub fn child_kind(&self) -> Option<NodeKind> {
        match (self.kind, self.shape) {
            (NodeKind::CentralSystem, _) => Some(NodeKind::ChargingStation),
            (NodeKind::ChargingStation, Some(TopologyShape::Nested)) => Some(NodeKind::Evse),
            (NodeKind::ChargingStation, _) => Some(NodeKind::Connector),
            (NodeKind::Evse, _) => Some(NodeKind::Connector),
            (NodeKind::Connector, _) => None,
        }
    }

    /// Attach a charging station of the given shape under the root.
    ///
    /// Returns the existing station when one with the same id is already
    /// attached; the flag tells whether a node was created.
    pub fn insert_station(
        self: &Arc<Self>,
        id: impl Into<String>,
        shape: TopologyShape,
    ) -> Option<(SharedNode, bool)> {
        if self.kind != NodeKind::CentralSystem {
            return None;
        }
        Some(self.insert_child(id.into(), NodeKind::ChargingStation, Some(shape)))
    }

    /// Attach an EVSE or connector child, keeping ids unique.
    pub fn insert_outlet(self: &Arc<Self>, id: impl Into<String>) -> Option<(SharedNode, bool)> {
        match self.child_kind()? {
            NodeKind::ChargingStation => None,
            kind => Some(self.insert_child(id.into(), kind, self.shape)),
        }
    }

    fn insert_child(
        self: &Arc<Self>,
        id: String,
        kind: NodeKind,
        shape: Option<TopologyShape>,
    ) -> (SharedNode, bool) {
        let mut children = self.children.write();
        if let Some(existing) = children.iter().find(|c| c.id == id) {
            return (existing.clone(), false);
        }
        let child = Arc::new(Self::build(id, kind, shape, Some(Arc::downgrade(self))));
        children.push(child.clone());
        (child, true)
    }

    /// Detach numbered children whose id exceeds `count` and queue them for
    /// purge by the next reconciliation pass.
    pub fn retire_children_beyond(&self, count: u32) -> Vec<SharedNode> {
        let mut children = self.children.write();
        let (keep, drop): (Vec<_>, Vec<_>) = children
            .drain(..)
            .partition(|c| c.numeric_id().map_or(true, |n| n <= count));
        *children = keep;
        drop.iter().for_each(|c| c.mark_detached());
        self.retired.lock().extend(drop.iter().cloned());
        drop
    }

    /// Detach a single child by id and queue it for purge.
    pub fn retire_child(&self, id: &str) -> Option<SharedNode> {
        let mut children = self.children.write();
        let index = children.iter().position(|c| c.id == id)?;
        let child = children.remove(index);
        child.mark_detached();
        self.retired.lock().push(child.clone());
        Some(child)
    }

    pub fn has_retired(&self) -> bool {
        !self.retired.lock().is_empty()
    }

    pub(crate) fn take_retired(&self) -> Vec<SharedNode> {
        std::mem::take(&mut *self.retired.lock())
    }

    // ── Telemetry and device data ──────────────────────────────────

    pub fn metrics(&self) -> &MetricsStore {
        &self.metrics
    }

    pub fn device_info(&self) -> DeviceInfo {
        self.device_info.read().clone()
    }

    pub fn update_device_info(&self, update: impl FnOnce(&mut DeviceInfo)) {
        update(&mut self.device_info.write());
    }

    /// Record a metric key that should be exposed as a sensor.
    pub fn track_sensor(&self, key: impl Into<String>) -> bool {
        self.sensor_keys.write().insert(key.into())
    }

    pub fn tracked_sensors(&self) -> Vec<String> {
        self.sensor_keys.read().iter().cloned().collect()
    }

    // ── Reconciliation bookkeeping ─────────────────────────────────

    pub fn registered_entity_ids(&self) -> BTreeSet<String> {
        self.registered.read().clone()
    }

    pub(crate) fn replace_registered_entity_ids(&self, ids: BTreeSet<String>) {
        *self.registered.write() = ids;
    }

    pub fn reconcile_state(&self) -> ReconcileState {
        *self.state.lock()
    }

    pub(crate) fn set_reconcile_state(&self, state: ReconcileState) {
        *self.state.lock() = state;
    }
}

impl fmt::Debug for TopologyNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TopologyNode")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("shape", &self.shape)
            .field("children", &self.child_count())
            .field("healthy", &self.is_healthy())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nested_station() -> (SharedNode, SharedNode) {
        let root = TopologyNode::central_system("cs");
        let (station, _) = root.insert_station("CP1", TopologyShape::Nested).unwrap();
        (root, station)
    }

    #[test]
    fn device_id_joins_path_without_root() {
        let (_root, station) = nested_station();
        let (evse, _) = station.insert_outlet("1").unwrap();
        let (connector, _) = evse.insert_outlet("2").unwrap();

        assert_eq!(evse.kind(), NodeKind::Evse);
        assert_eq!(connector.kind(), NodeKind::Connector);
        assert_eq!(connector.device_id(), "CP1_1_2");
        assert_eq!(station.device_id(), "CP1");
        assert_eq!(connector.station().unwrap().id(), "CP1");
    }

    #[test]
    fn flat_station_owns_connectors() {
        let root = TopologyNode::central_system("cs");
        let (station, _) = root.insert_station("CP2", TopologyShape::Flat).unwrap();
        let (child, created) = station.insert_outlet("1").unwrap();
        assert!(created);
        assert_eq!(child.kind(), NodeKind::Connector);
        assert!(child.insert_outlet("1").is_none());
    }

    #[test]
    fn insert_is_idempotent() {
        let (_root, station) = nested_station();
        let (first, created) = station.insert_outlet("1").unwrap();
        let (second, created_again) = station.insert_outlet("1").unwrap();
        assert!(created);
        assert!(!created_again);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(station.child_count(), 1);
    }

    #[test]
    fn availability_propagates_down() {
        let (_root, station) = nested_station();
        let (evse, _) = station.insert_outlet("1").unwrap();
        let (connector, _) = evse.insert_outlet("1").unwrap();
        assert!(connector.is_available());

        station.set_healthy(false);
        assert!(evse.is_healthy());
        assert!(!evse.is_available());
        assert!(!connector.is_available());

        station.set_healthy(true);
        assert!(connector.is_available());
    }

    #[test]
    fn orphan_is_unavailable() {
        let connector = {
            let (_root, station) = nested_station();
            let (evse, _) = station.insert_outlet("1").unwrap();
            let (connector, _) = evse.insert_outlet("1").unwrap();
            connector
        };
        assert!(connector.parent().is_none());
        assert!(!connector.is_available());
    }

    #[test]
    fn retire_beyond_count() {
        let (_root, station) = nested_station();
        let (evse, _) = station.insert_outlet("1").unwrap();
        evse.insert_outlet("1").unwrap();
        let (second, _) = evse.insert_outlet("2").unwrap();

        let retired = evse.retire_children_beyond(1);
        assert_eq!(retired.len(), 1);
        assert!(Arc::ptr_eq(&retired[0], &second));
        assert_eq!(evse.child_count(), 1);
        assert!(second.is_detached());
        assert!(!second.is_available());
        assert!(evse.has_retired());
        assert_eq!(evse.take_retired().len(), 1);
        assert!(!evse.has_retired());
    }
}
