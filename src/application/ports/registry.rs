//! Registry port: the host's device and entity store.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::domain::{EntitySnapshot, EntitySpec};
use crate::support::RegistryError;

/// Device as the registry records it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceDescriptor {
    /// Primary identity; the node's `device_id`.
    pub device_id: String,
    /// Additional identifiers (e.g. the station serial number).
    pub identifiers: BTreeSet<String>,
    /// Parent device (`via` link).
    pub parent: Option<String>,
    pub name: String,
    pub model: Option<String>,
    pub vendor: Option<String>,
    pub sw_version: Option<String>,
}

/// Host entity/device registry.
///
/// The reconciliation engine is the only writer of entities through this
/// port; the topology builder writes devices.
#[async_trait]
pub trait EntityRegistry: Send + Sync {
    /// Create the device or update its descriptive fields.
    async fn get_or_create_device(&self, device: DeviceDescriptor) -> Result<(), RegistryError>;

    /// Unique ids of every entity registered for the device.
    async fn list_entities_for_device(&self, device_id: &str) -> Result<Vec<String>, RegistryError>;

    async fn add_entity(
        &self,
        device_id: &str,
        spec: &EntitySpec,
        snapshot: EntitySnapshot,
    ) -> Result<(), RegistryError>;

    async fn remove_entity(&self, entity_id: &str) -> Result<(), RegistryError>;

    /// Push fresh state for an existing entity.
    async fn refresh_entity(
        &self,
        entity_id: &str,
        snapshot: EntitySnapshot,
    ) -> Result<(), RegistryError>;

    async fn remove_device(&self, device_id: &str) -> Result<(), RegistryError>;
}

pub type SharedRegistry = Arc<dyn EntityRegistry>;
