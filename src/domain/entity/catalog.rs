//! The intended entity set of every node kind and shape.

use std::collections::BTreeSet;

use crate::domain::metrics::{classify, icon_for, keys, mapping::DEFAULT_ICON, state_class};
use crate::domain::ocpp::TopologyShape;
use crate::domain::service::{ServiceName, ServicePayload};
use crate::domain::topology::{NodeKind, TopologyNode};

use super::spec::{
    unique_id, AvailabilityRule, Control, EntityCategory, EntitySpec, OnWhen, Platform,
};

/// Connector statuses during which a flat connector has a session.
pub const FLAT_SESSION_STATUSES: &[&str] = &[
    "Preparing",
    "Finishing",
    "Charging",
    "SuspendedEVSE",
    "SuspendedEV",
];

/// Statuses during which a nested EVSE has a session.
pub const NESTED_SESSION_STATUSES: &[&str] = &["Occupied"];

/// Statuses in which charge control reads as on.
pub const CHARGING_STATUSES: &[&str] = &["Preparing", "Charging", "SuspendedEVSE", "SuspendedEV"];

const OPERATIVE: &[&str] = &[keys::OPERATIVE];

const STATION_SENSORS: &[&str] = &[
    keys::AVAILABILITY,
    keys::STATUS,
    keys::HEARTBEAT,
    keys::LATENCY_PING,
    keys::LATENCY_PONG,
    keys::ERROR_CODE,
    keys::FIRMWARE_STATUS,
    keys::RECONNECTS,
    keys::IDENTIFIER,
    keys::MODEL,
    keys::VENDOR,
    keys::SERIAL,
    keys::FIRMWARE_VERSION,
    keys::FEATURES,
    keys::CONNECTORS,
    keys::DATA_RESPONSE,
    keys::DATA_TRANSFER,
    keys::CONFIG_RESPONSE,
];

const STATION_DIAGNOSTICS: &[&str] = &[
    keys::IDENTIFIER,
    keys::MODEL,
    keys::VENDOR,
    keys::SERIAL,
    keys::FIRMWARE_VERSION,
    keys::FEATURES,
    keys::CONNECTORS,
    keys::DATA_RESPONSE,
    keys::DATA_TRANSFER,
    keys::CONFIG_RESPONSE,
];

const EVSE_SENSORS: &[&str] = &[
    keys::AVAILABILITY,
    keys::CONNECTORS,
    keys::IDENTIFIER,
    keys::STATUS,
];

const CONNECTOR_SENSORS: &[&str] = &[
    keys::AVAILABILITY,
    keys::STATUS,
    keys::ERROR_CODE,
    keys::ID_TAG,
];

const SESSION_SENSORS: &[&str] = &[
    keys::STOP_REASON,
    keys::TRANSACTION_ID,
    keys::SESSION_START,
    keys::SESSION_TIME,
    keys::SESSION_ENERGY,
    keys::SESSION_ENERGY_PAST,
    keys::CURRENT_SETPOINT,
    keys::ENERGY_METER_START,
];

const NESTED_SESSION_EXTRA: &[&str] = &[keys::CHARGING_CONNECTOR, keys::CHARGING_STATE];

/// Values the catalog needs beyond the node itself.
#[derive(Debug, Clone, Copy)]
pub struct CatalogContext {
    /// Upper bound of the maximum-current number entity, in amps.
    pub max_current: f64,
}

impl Default for CatalogContext {
    fn default() -> Self {
        Self { max_current: 32.0 }
    }
}

/// Every entity `node` should have in its current configuration.
///
/// The result depends on node kind, station shape and the sensor keys
/// tracked on the node; ids are unique within the returned list.
pub fn entities_for(node: &TopologyNode, ctx: &CatalogContext) -> Vec<EntitySpec> {
    let path = node.path();
    let mut out = CatalogBuilder::new(path);

    match (node.kind(), node.shape()) {
        (NodeKind::CentralSystem, _) => {
            out.switch(
                "energy_control_communication",
                (ServiceName::CommunicationStart, ServicePayload::None),
                (ServiceName::CommunicationStop, ServicePayload::None),
                keys::EMS_COMMUNICATION,
                OnWhen::Flag,
            );
        }
        (NodeKind::ChargingStation, _) => {
            for key in STATION_SENSORS {
                let category = STATION_DIAGNOSTICS
                    .contains(key)
                    .then_some(EntityCategory::Diagnostic);
                out.sensor(key, category, AvailabilityRule::Node);
            }
            out.availability_switch();
            out.button("reset", ServiceName::Reset);
            out.max_current(ctx.max_current);
        }
        (NodeKind::Evse, _) => {
            for key in EVSE_SENSORS {
                out.sensor(key, None, AvailabilityRule::Node);
            }
            let session = AvailabilityRule::StatusIn(NESTED_SESSION_STATUSES);
            for key in SESSION_SENSORS.iter().chain(NESTED_SESSION_EXTRA) {
                out.sensor(key, None, session);
            }
            out.charge_control(NESTED_SESSION_STATUSES);
            out.availability_switch();
        }
        (NodeKind::Connector, Some(TopologyShape::Nested)) => {
            for key in CONNECTOR_SENSORS {
                out.sensor(key, None, AvailabilityRule::Node);
            }
            out.button("unlock", ServiceName::Unlock);
        }
        (NodeKind::Connector, _) => {
            for key in CONNECTOR_SENSORS {
                out.sensor(key, None, AvailabilityRule::Node);
            }
            let session = AvailabilityRule::StatusIn(FLAT_SESSION_STATUSES);
            for key in SESSION_SENSORS {
                out.sensor(key, None, session);
            }
            out.charge_control(CHARGING_STATUSES);
            out.availability_switch();
            out.button("unlock", ServiceName::Unlock);
            out.max_current(ctx.max_current);
        }
    }

    if node.kind() != NodeKind::CentralSystem {
        for key in node.tracked_sensors() {
            out.sensor(&key, None, AvailabilityRule::Node);
        }
    }

    out.finish()
}

struct CatalogBuilder {
    path: Vec<String>,
    seen: BTreeSet<String>,
    specs: Vec<EntitySpec>,
}

impl CatalogBuilder {
    fn new(path: Vec<String>) -> Self {
        Self {
            path,
            seen: BTreeSet::new(),
            specs: Vec::new(),
        }
    }

    fn push(&mut self, spec: EntitySpec) {
        if self.seen.insert(spec.unique_id.clone()) {
            self.specs.push(spec);
        }
    }

    fn base(&self, platform: Platform, key: &str) -> EntitySpec {
        let key = key.to_lowercase();
        EntitySpec {
            unique_id: unique_id(platform, &self.path, &key),
            platform,
            name: key.replace(['.', '_'], " "),
            key,
            metric_key: None,
            category: None,
            device_class: None,
            state_class: None,
            icon: DEFAULT_ICON,
            availability: AvailabilityRule::Node,
            control: None,
        }
    }

    fn sensor(&mut self, metric_key: &str, category: Option<EntityCategory>, rule: AvailabilityRule) {
        let mut spec = self.base(Platform::Sensor, metric_key);
        spec.metric_key = Some(metric_key.to_string());
        spec.category = category;
        spec.device_class = classify(metric_key).map(|c| c.device_class);
        spec.state_class = state_class(metric_key);
        spec.icon = icon_for(metric_key);
        spec.availability = rule;
        self.push(spec);
    }

    fn switch(
        &mut self,
        key: &str,
        on: (ServiceName, ServicePayload),
        off: (ServiceName, ServicePayload),
        state_key: &'static str,
        on_when: OnWhen,
    ) {
        let mut spec = self.base(Platform::Switch, key);
        spec.control = Some(Control::Switch {
            on,
            off,
            state_key,
            on_when,
        });
        self.push(spec);
    }

    fn availability_switch(&mut self) {
        self.switch(
            keys::AVAILABILITY,
            (ServiceName::Availability, ServicePayload::Availability { operative: true }),
            (ServiceName::Availability, ServicePayload::Availability { operative: false }),
            keys::AVAILABILITY,
            OnWhen::TextIn(OPERATIVE),
        );
    }

    fn charge_control(&mut self, on_statuses: &'static [&'static str]) {
        self.switch(
            "charge_control",
            (ServiceName::ChargeStart, ServicePayload::ChargeStart { id_tag: None }),
            (ServiceName::ChargeStop, ServicePayload::None),
            keys::STATUS,
            OnWhen::TextIn(on_statuses),
        );
    }

    fn button(&mut self, key: &str, press: ServiceName) {
        let mut spec = self.base(Platform::Button, key);
        spec.category = Some(EntityCategory::Config);
        spec.control = Some(Control::Button { press });
        self.push(spec);
    }

    fn max_current(&mut self, max: f64) {
        let mut spec = self.base(Platform::Number, "maximum_current");
        spec.icon = "mdi:current-ac";
        spec.control = Some(Control::Number {
            service: ServiceName::SetChargeRate,
            state_key: keys::CURRENT_SETPOINT,
            min: 0.0,
            max,
            step: 1.0,
        });
        self.push(spec);
    }

    fn finish(self) -> Vec<EntitySpec> {
        self.specs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::topology::TopologyNode;

    fn ids(specs: &[EntitySpec]) -> Vec<&str> {
        specs.iter().map(|s| s.unique_id.as_str()).collect()
    }

    #[test]
    fn central_system_has_communication_switch() {
        let root = TopologyNode::central_system("cs");
        let specs = entities_for(&root, &CatalogContext::default());
        assert_eq!(ids(&specs), vec!["switch.charge_advisor.cs.energy_control_communication"]);
    }

    #[test]
    fn station_entities() {
        let root = TopologyNode::central_system("cs");
        let (station, _) = root.insert_station("CP1", TopologyShape::Flat).unwrap();
        let specs = entities_for(&station, &CatalogContext::default());

        let sensors = specs.iter().filter(|s| s.platform == Platform::Sensor).count();
        assert_eq!(sensors, STATION_SENSORS.len());
        assert!(ids(&specs).contains(&"button.charge_advisor.CP1.reset"));
        assert!(ids(&specs).contains(&"switch.charge_advisor.CP1.availability"));

        let serial = specs.iter().find(|s| s.key == "serial").unwrap();
        assert_eq!(serial.category, Some(EntityCategory::Diagnostic));
        let status = specs.iter().find(|s| s.key == "status" && s.platform == Platform::Sensor);
        assert_eq!(status.unwrap().category, None);
    }

    #[test]
    fn flat_connector_carries_charge_control() {
        let root = TopologyNode::central_system("cs");
        let (station, _) = root.insert_station("CP1", TopologyShape::Flat).unwrap();
        let (connector, _) = station.insert_outlet("2").unwrap();
        let specs = entities_for(&connector, &CatalogContext::default());

        let all = ids(&specs);
        assert!(all.contains(&"switch.charge_advisor.CP1.2.charge_control"));
        assert!(all.contains(&"button.charge_advisor.CP1.2.unlock"));
        assert!(all.contains(&"number.charge_advisor.CP1.2.maximum_current"));
        assert!(all.contains(&"sensor.charge_advisor.CP1.2.session.energy"));
    }

    #[test]
    fn nested_connector_is_minimal() {
        let root = TopologyNode::central_system("cs");
        let (station, _) = root.insert_station("CP1", TopologyShape::Nested).unwrap();
        let (evse, _) = station.insert_outlet("1").unwrap();
        let (connector, _) = evse.insert_outlet("1").unwrap();

        let evse_specs = entities_for(&evse, &CatalogContext::default());
        assert!(ids(&evse_specs).contains(&"sensor.charge_advisor.CP1.1.charging.state"));
        assert!(ids(&evse_specs).contains(&"switch.charge_advisor.CP1.1.charge_control"));

        let specs = entities_for(&connector, &CatalogContext::default());
        assert_eq!(specs.len(), CONNECTOR_SENSORS.len() + 1);
        assert!(specs.iter().all(|s| s.platform != Platform::Switch));
    }

    #[test]
    fn tracked_measurands_become_sensors_once() {
        let root = TopologyNode::central_system("cs");
        let (station, _) = root.insert_station("CP1", TopologyShape::Flat).unwrap();
        let (connector, _) = station.insert_outlet("1").unwrap();
        connector.track_sensor("energy.active_import.register");
        connector.track_sensor(keys::STATUS);

        let specs = entities_for(&connector, &CatalogContext::default());
        let energy: Vec<_> = specs
            .iter()
            .filter(|s| s.key == "energy.active_import.register")
            .collect();
        assert_eq!(energy.len(), 1);
        assert_eq!(energy[0].icon, "mdi:lightning-bolt");

        let status = specs
            .iter()
            .filter(|s| s.platform == Platform::Sensor && s.key == keys::STATUS)
            .count();
        assert_eq!(status, 1);
    }
}
