//! In-memory entity registry
//!
//! Used by the headless runtime when no host registry is attached, and by
//! tests. Every call is appended to an operation log so callers can assert
//! on what the reconciler did, and per-device concurrency is tracked to
//! detect interleaved passes.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;

use crate::application::ports::{DeviceDescriptor, EntityRegistry};
use crate::domain::{EntitySnapshot, EntitySpec, Platform};
use crate::support::RegistryError;

/// One registered entity.
#[derive(Debug, Clone)]
pub struct EntityRecord {
    pub device_id: String,
    pub platform: Platform,
    pub name: String,
    pub snapshot: EntitySnapshot,
}

/// A call made against the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryOp {
    DeviceUpserted(String),
    Listed(String),
    Added(String),
    Removed(String),
    Refreshed(String),
    DeviceRemoved(String),
}

#[derive(Default)]
struct Concurrency {
    active: AtomicUsize,
    max: AtomicUsize,
}

/// Thread-safe in-memory registry.
#[derive(Default)]
pub struct InMemoryEntityRegistry {
    devices: DashMap<String, DeviceDescriptor>,
    entities: DashMap<String, EntityRecord>,
    failing: DashSet<String>,
    operations: Mutex<Vec<RegistryOp>>,
    concurrency: DashMap<String, Concurrency>,
    latency: Option<Duration>,
}

impl InMemoryEntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Make every call touching `entity_id` fail.
    pub fn fail_entity(&self, entity_id: &str) {
        self.failing.insert(entity_id.to_string());
    }

    /// Register an entity directly, bypassing the reconciler.
    pub fn seed_entity(&self, device_id: &str, entity_id: &str) {
        self.entities.insert(
            entity_id.to_string(),
            EntityRecord {
                device_id: device_id.to_string(),
                platform: Platform::Sensor,
                name: entity_id.to_string(),
                snapshot: EntitySnapshot {
                    unique_id: entity_id.to_string(),
                    available: false,
                    state: None,
                    unit: None,
                    icon: String::new(),
                    attributes: Default::default(),
                },
            },
        );
    }

    /// Entity ids of a device, sorted.
    pub fn entity_ids(&self, device_id: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .entities
            .iter()
            .filter(|e| e.value().device_id == device_id)
            .map(|e| e.key().clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn entity(&self, entity_id: &str) -> Option<EntityRecord> {
        self.entities.get(entity_id).map(|e| e.clone())
    }

    pub fn device(&self, device_id: &str) -> Option<DeviceDescriptor> {
        self.devices.get(device_id).map(|d| d.clone())
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn operations(&self) -> Vec<RegistryOp> {
        self.operations.lock().clone()
    }

    /// Highest number of simultaneous calls observed for one device.
    pub fn max_concurrency(&self, device_id: &str) -> usize {
        self.concurrency
            .get(device_id)
            .map(|c| c.max.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    fn record(&self, op: RegistryOp) {
        self.operations.lock().push(op);
    }

    fn check(&self, entity_id: &str) -> Result<(), RegistryError> {
        if self.failing.contains(entity_id) {
            return Err(RegistryError::Unavailable(format!("{} is failing", entity_id)));
        }
        Ok(())
    }

    fn device_of(&self, entity_id: &str) -> Option<String> {
        self.entities.get(entity_id).map(|e| e.device_id.clone())
    }

    async fn tracked<T>(
        &self,
        device_id: Option<String>,
        call: impl FnOnce() -> Result<T, RegistryError>,
    ) -> Result<T, RegistryError> {
        if let Some(device_id) = &device_id {
            let entry = self.concurrency.entry(device_id.clone()).or_default();
            let now = entry.active.fetch_add(1, Ordering::SeqCst) + 1;
            entry.max.fetch_max(now, Ordering::SeqCst);
        }
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let result = call();
        if let Some(device_id) = &device_id {
            if let Some(entry) = self.concurrency.get(device_id) {
                entry.active.fetch_sub(1, Ordering::SeqCst);
            }
        }
        result
    }
}

#[async_trait]
impl EntityRegistry for InMemoryEntityRegistry {
    async fn get_or_create_device(&self, device: DeviceDescriptor) -> Result<(), RegistryError> {
        let device_id = device.device_id.clone();
        self.tracked(None, || {
            self.record(RegistryOp::DeviceUpserted(device_id.clone()));
            self.devices.insert(device_id, device);
            Ok(())
        })
        .await
    }

    async fn list_entities_for_device(&self, device_id: &str) -> Result<Vec<String>, RegistryError> {
        self.tracked(Some(device_id.to_string()), || {
            self.record(RegistryOp::Listed(device_id.to_string()));
            Ok(self.entity_ids(device_id))
        })
        .await
    }

    async fn add_entity(
        &self,
        device_id: &str,
        spec: &EntitySpec,
        snapshot: EntitySnapshot,
    ) -> Result<(), RegistryError> {
        self.tracked(Some(device_id.to_string()), || {
            self.check(&spec.unique_id)?;
            self.record(RegistryOp::Added(spec.unique_id.clone()));
            self.entities.insert(
                spec.unique_id.clone(),
                EntityRecord {
                    device_id: device_id.to_string(),
                    platform: spec.platform,
                    name: spec.name.clone(),
                    snapshot,
                },
            );
            Ok(())
        })
        .await
    }

    async fn remove_entity(&self, entity_id: &str) -> Result<(), RegistryError> {
        self.tracked(self.device_of(entity_id), || {
            self.check(entity_id)?;
            self.entities
                .remove(entity_id)
                .ok_or_else(|| RegistryError::EntityNotFound(entity_id.to_string()))?;
            self.record(RegistryOp::Removed(entity_id.to_string()));
            Ok(())
        })
        .await
    }

    async fn refresh_entity(
        &self,
        entity_id: &str,
        snapshot: EntitySnapshot,
    ) -> Result<(), RegistryError> {
        self.tracked(self.device_of(entity_id), || {
            self.check(entity_id)?;
            let mut entry = self
                .entities
                .get_mut(entity_id)
                .ok_or_else(|| RegistryError::EntityNotFound(entity_id.to_string()))?;
            entry.snapshot = snapshot;
            self.record(RegistryOp::Refreshed(entity_id.to_string()));
            Ok(())
        })
        .await
    }

    async fn remove_device(&self, device_id: &str) -> Result<(), RegistryError> {
        self.tracked(None, || {
            self.entities.retain(|_, e| e.device_id != device_id);
            self.devices.remove(device_id);
            self.record(RegistryOp::DeviceRemoved(device_id.to_string()));
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;

    fn device(id: &str) -> DeviceDescriptor {
        DeviceDescriptor {
            device_id: id.to_string(),
            identifiers: BTreeSet::from([id.to_string()]),
            parent: None,
            name: id.to_string(),
            model: None,
            vendor: None,
            sw_version: None,
        }
    }

    #[tokio::test]
    async fn device_upsert_replaces_fields() {
        let registry = InMemoryEntityRegistry::new();
        registry.get_or_create_device(device("CP1")).await.unwrap();
        let mut updated = device("CP1");
        updated.vendor = Some("Acme".to_string());
        registry.get_or_create_device(updated).await.unwrap();

        assert_eq!(registry.device_count(), 1);
        assert_eq!(registry.device("CP1").unwrap().vendor.as_deref(), Some("Acme"));
    }

    #[tokio::test]
    async fn remove_unknown_entity_fails() {
        let registry = InMemoryEntityRegistry::new();
        let err = registry.remove_entity("sensor.nope").await.unwrap_err();
        assert_eq!(err, RegistryError::EntityNotFound("sensor.nope".to_string()));
    }

    #[tokio::test]
    async fn removing_device_drops_its_entities() {
        let registry = InMemoryEntityRegistry::new();
        registry.get_or_create_device(device("CP1_1")).await.unwrap();
        registry.seed_entity("CP1_1", "sensor.a");
        registry.seed_entity("CP1", "sensor.b");

        registry.remove_device("CP1_1").await.unwrap();
        assert!(registry.entity_ids("CP1_1").is_empty());
        assert_eq!(registry.entity_ids("CP1"), vec!["sensor.b"]);
        assert!(registry.operations().contains(&RegistryOp::DeviceRemoved("CP1_1".into())));
    }
}
