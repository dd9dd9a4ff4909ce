//! The central system: root of the topology and owner of the engines that
//! act on it.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::application::backend::{BackendBridge, SharedBackendConnector};
use crate::application::dispatch::{ServiceRouter, SharedServiceRouter};
use crate::application::events::{BackendCommunicationEvent, Event, SharedEventBus};
use crate::application::ports::SharedRegistry;
use crate::application::reconcile::{ReconcileReport, Reconciler, SharedReconciler};
use crate::application::topology::{SharedTopologyBuilder, TopologyBuilder};
use crate::config::AppConfig;
use crate::domain::entity::{action_request, entities_for, CatalogContext, EntityAction};
use crate::domain::metrics::keys;
use crate::domain::{ServiceName, ServiceRequest, SharedNode, TopologyNode};
use crate::support::{ConfigError, TopologyError};

pub struct CentralSystem {
    root: SharedNode,
    builder: SharedTopologyBuilder,
    reconciler: SharedReconciler,
    router: SharedServiceRouter,
    backend: BackendBridge,
    event_bus: SharedEventBus,
    catalog: CatalogContext,
}

impl CentralSystem {
    pub fn new(
        config: &AppConfig,
        registry: SharedRegistry,
        backend: Option<SharedBackendConnector>,
        event_bus: SharedEventBus,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let settings = config.station_settings()?;
        let root = TopologyNode::central_system(config.central_system.id.clone());
        root.metrics().set_value(keys::EMS_COMMUNICATION, false);

        let catalog = CatalogContext {
            max_current: settings.max_current,
        };
        let reconciler = Arc::new(Reconciler::new(registry.clone(), catalog, event_bus.clone()));
        let builder = Arc::new(TopologyBuilder::new(
            root.clone(),
            registry,
            reconciler.clone(),
            event_bus.clone(),
            config.installation.clone(),
        ));
        let router = Arc::new(ServiceRouter::new(
            builder.clone(),
            reconciler.clone(),
            event_bus.clone(),
        ));
        let backend = BackendBridge::new(backend, router.clone(), config.backend.clone());

        Ok(Self {
            root,
            builder,
            reconciler,
            router,
            backend,
            event_bus,
            catalog,
        })
    }

    pub fn id(&self) -> &str {
        self.root.id()
    }

    pub fn root(&self) -> &SharedNode {
        &self.root
    }

    pub fn builder(&self) -> &SharedTopologyBuilder {
        &self.builder
    }

    pub fn router(&self) -> &SharedServiceRouter {
        &self.router
    }

    pub fn reconciler(&self) -> &SharedReconciler {
        &self.reconciler
    }

    pub fn event_bus(&self) -> &SharedEventBus {
        &self.event_bus
    }

    /// Register the central system device and its entities.
    pub async fn start(&self) -> Result<ReconcileReport, TopologyError> {
        let report = self.builder.register_root().await?;
        info!(csid = %self.id(), added = report.total_added(), "Central system started");
        Ok(report)
    }

    /// Reconcile the node with the given device id and everything below it.
    /// `false` when no such node exists or the pass had failures.
    pub async fn reconcile(&self, device_id: &str) -> bool {
        let Some(node) = self.builder.find_node(device_id) else {
            warn!(%device_id, "{}", TopologyError::NodeNotFound(device_id.to_string()));
            return false;
        };
        self.reconciler.reconcile(node).await.is_clean()
    }

    pub async fn invoke_service(&self, request: ServiceRequest) -> bool {
        match request.service {
            ServiceName::CommunicationStart => self.communication_start().await,
            ServiceName::CommunicationStop => self.communication_stop().await,
            _ => self.router.invoke_service(request).await,
        }
    }

    pub async fn invoke_named(&self, name: &str, data: serde_json::Value) -> bool {
        match ServiceName::from_name(name) {
            Some(ServiceName::CommunicationStart) => self.communication_start().await,
            Some(ServiceName::CommunicationStop) => self.communication_stop().await,
            _ => self.router.invoke_named(name, data).await,
        }
    }

    /// Carry out a user action on an entity through the service it is
    /// bound to.
    pub async fn entity_action(&self, unique_id: &str, action: EntityAction) -> bool {
        let request = self.builder.find_entity_node(unique_id).and_then(|node| {
            entities_for(&node, &self.catalog)
                .into_iter()
                .find(|spec| spec.unique_id == unique_id)
                .and_then(|spec| action_request(&spec, &node, action))
        });
        match request {
            Some(request) => self.invoke_service(request).await,
            None => {
                warn!(entity_id = %unique_id, ?action, "Entity does not support this action");
                false
            }
        }
    }

    pub fn is_communicating(&self) -> bool {
        self.backend.is_running()
    }

    /// Start talking to the energy-management backend. Idempotent.
    pub async fn communication_start(&self) -> bool {
        match self.backend.start().await {
            Ok(false) => true,
            Ok(true) => {
                self.set_communication(true).await;
                true
            }
            Err(e) => {
                warn!(csid = %self.id(), error = %e, "Cannot start backend communication");
                false
            }
        }
    }

    /// Stop talking to the backend. Idempotent.
    pub async fn communication_stop(&self) -> bool {
        match self.backend.stop().await {
            Ok(false) => true,
            Ok(true) => {
                self.set_communication(false).await;
                true
            }
            Err(e) => {
                warn!(csid = %self.id(), error = %e, "Backend communication stopped with errors");
                self.set_communication(false).await;
                false
            }
        }
    }

    async fn set_communication(&self, active: bool) {
        self.root.metrics().set_value(keys::EMS_COMMUNICATION, active);
        self.event_bus
            .publish(Event::BackendCommunicationChanged(BackendCommunicationEvent {
                active,
                timestamp: Utc::now(),
            }));
        self.reconciler.reconcile(self.root.clone()).await;
    }

    /// Authorization status for an id tag presented at a station.
    pub fn authorize(&self, station_id: &str, id_tag: &str) -> Option<String> {
        let station = self.builder.station(station_id)?;
        Some(station.settings().authorization_status(id_tag).to_string())
    }

    /// Stop backend workers before the runtime goes away.
    pub async fn shutdown(&self) {
        if self.is_communicating() {
            self.communication_stop().await;
        }
    }
}

pub type SharedCentralSystem = Arc<CentralSystem>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::events::create_event_bus;
    use crate::application::ports::ChargeRateLimit;
    use crate::application::testing::{ProtocolCall, RecordingProtocol};
    use crate::config::AuthEntry;
    use crate::domain::{MetricValue, OcppVersion, OperationTarget};
    use crate::infrastructure::registry::InMemoryEntityRegistry;

    fn central(config: &AppConfig) -> (Arc<InMemoryEntityRegistry>, CentralSystem) {
        let registry = Arc::new(InMemoryEntityRegistry::new());
        let cs = CentralSystem::new(config, registry.clone(), None, create_event_bus()).unwrap();
        (registry, cs)
    }

    #[tokio::test]
    async fn start_registers_root_switch() {
        let mut config = AppConfig::default();
        config.central_system.id = "garage".to_string();
        let (registry, cs) = central(&config);
        cs.start().await.unwrap();

        let record = registry
            .entity("switch.charge_advisor.garage.energy_control_communication")
            .unwrap();
        assert_eq!(record.snapshot.state, Some(MetricValue::Bool(false)));
        assert!(registry.device("garage").is_some());
    }

    #[tokio::test]
    async fn reconcile_by_device_id() {
        let (_registry, cs) = central(&AppConfig::default());
        cs.start().await.unwrap();
        cs.builder()
            .attach_station(RecordingProtocol::shared("CP1", OcppVersion::V16))
            .await
            .unwrap();
        cs.builder().on_connectors_discovered("CP1", None, 1).await.unwrap();

        assert!(cs.reconcile("CP1_1").await);
        assert!(!cs.reconcile("CP1_7").await);
    }

    #[tokio::test]
    async fn communication_without_backend_fails() {
        let (registry, cs) = central(&AppConfig::default());
        cs.start().await.unwrap();

        assert!(!cs.invoke_named("ems_communication_start", serde_json::Value::Null).await);
        assert!(!cs.is_communicating());
        assert!(cs.invoke_service(ServiceRequest::central(ServiceName::CommunicationStop)).await);

        let record = registry
            .entity("switch.charge_advisor.central.energy_control_communication")
            .unwrap();
        assert_eq!(record.snapshot.state, Some(MetricValue::Bool(false)));
    }

    #[tokio::test]
    async fn authorization_uses_station_settings() {
        let mut config = AppConfig::default();
        config.installation.auth_list = Some(vec![AuthEntry {
            id_tag: "TAG1".to_string(),
            status: "Blocked".to_string(),
        }]);
        let (_registry, cs) = central(&config);
        cs.builder()
            .attach_station(RecordingProtocol::shared("CP1", OcppVersion::V16))
            .await
            .unwrap();

        assert_eq!(cs.authorize("CP1", "TAG1").as_deref(), Some("Blocked"));
        assert_eq!(cs.authorize("CP1", "OTHER").as_deref(), Some("Accepted"));
        assert_eq!(cs.authorize("CP9", "TAG1"), None);
    }

    #[tokio::test]
    async fn entity_actions_reach_the_station() {
        let (_registry, cs) = central(&AppConfig::default());
        cs.start().await.unwrap();
        let protocol = RecordingProtocol::new("CP1", OcppVersion::V16);
        cs.builder().attach_station(protocol.clone()).await.unwrap();
        cs.builder().on_connectors_discovered("CP1", None, 1).await.unwrap();

        assert!(
            cs.entity_action("switch.charge_advisor.CP1.1.availability", EntityAction::Turn(false))
                .await
        );
        assert!(
            cs.entity_action("number.charge_advisor.CP1.1.maximum_current", EntityAction::Set(40.0))
                .await
        );
        assert!(!cs.entity_action("sensor.charge_advisor.CP1.1.status", EntityAction::Press).await);
        assert!(
            !cs.entity_action(
                "switch.charge_advisor.central.energy_control_communication",
                EntityAction::Turn(true)
            )
            .await
        );

        assert_eq!(
            protocol.calls(),
            vec![
                ProtocolCall::ChangeAvailability(OperationTarget::connector(1), false),
                ProtocolCall::SetChargeRate(
                    OperationTarget::connector(1),
                    ChargeRateLimit {
                        amps: Some(32.0),
                        watts: None
                    }
                ),
            ]
        );
    }

    #[tokio::test]
    async fn max_current_follows_installation() {
        let mut config = AppConfig::default();
        config.installation.max_current = Some(16.0);
        let (registry, cs) = central(&config);
        cs.builder()
            .attach_station(RecordingProtocol::shared("CP1", OcppVersion::V16))
            .await
            .unwrap();

        let number = registry.entity("number.charge_advisor.CP1.maximum_current").unwrap();
        assert_eq!(number.snapshot.state, Some(MetricValue::Float(16.0)));
    }
}
