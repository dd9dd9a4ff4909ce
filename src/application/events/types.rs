//! Topology events
//!
//! Published by the builder, the reconciler and the router so that
//! observers (tests, a UI bridge, diagnostics) can follow what the core
//! does without polling it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event types for topology observers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Event {
    StationAttached(StationAttachedEvent),
    StationDetached(StationDetachedEvent),
    StationConnectionChanged(StationConnectionChangedEvent),
    ChildrenAdded(ChildrenChangedEvent),
    ChildrenRetired(ChildrenChangedEvent),
    ReconcileCompleted(ReconcileCompletedEvent),
    ServiceDispatched(ServiceDispatchedEvent),
    BackendCommunicationChanged(BackendCommunicationEvent),
}

impl Event {
    pub fn event_type(&self) -> &'static str {
        match self {
            Event::StationAttached(_) => "station_attached",
            Event::StationDetached(_) => "station_detached",
            Event::StationConnectionChanged(_) => "station_connection_changed",
            Event::ChildrenAdded(_) => "children_added",
            Event::ChildrenRetired(_) => "children_retired",
            Event::ReconcileCompleted(_) => "reconcile_completed",
            Event::ServiceDispatched(_) => "service_dispatched",
            Event::BackendCommunicationChanged(_) => "backend_communication_changed",
        }
    }

    pub fn station_id(&self) -> Option<&str> {
        match self {
            Event::StationAttached(e) => Some(&e.station_id),
            Event::StationDetached(e) => Some(&e.station_id),
            Event::StationConnectionChanged(e) => Some(&e.station_id),
            Event::ChildrenAdded(e) | Event::ChildrenRetired(e) => e.station_id.as_deref(),
            Event::ReconcileCompleted(_) => None,
            Event::ServiceDispatched(e) => e.station_id.as_deref(),
            Event::BackendCommunicationChanged(_) => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationAttachedEvent {
    pub station_id: String,
    pub ocpp_version: String,
    pub shape: String,
    /// The station was already known and re-used its node.
    pub reattached: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationDetachedEvent {
    pub station_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationConnectionChangedEvent {
    pub station_id: String,
    pub connected: bool,
    pub reconnects: i64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChildrenChangedEvent {
    pub station_id: Option<String>,
    pub parent_device_id: String,
    pub child_ids: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileCompletedEvent {
    pub device_id: String,
    pub added: usize,
    pub removed: usize,
    pub refreshed: usize,
    pub failed: usize,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceDispatchedEvent {
    pub service: String,
    pub station_id: Option<String>,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendCommunicationEvent {
    pub active: bool,
    pub timestamp: DateTime<Utc>,
}

/// Wrapper for sending events with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMessage {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: Event,
}

impl EventMessage {
    pub fn new(event: Event) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event,
        }
    }
}
