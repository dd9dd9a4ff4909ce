use std::collections::BTreeMap;

use serde::Serialize;

use crate::domain::metrics::{display_unit, keys, MetricValue};
use crate::domain::topology::{Available, MetricsHolder};

use super::spec::{AvailabilityRule, Control, EntitySpec, OnWhen};

/// What the registry shows for one entity at one moment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntitySnapshot {
    pub unique_id: String,
    pub available: bool,
    pub state: Option<MetricValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    pub icon: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

/// Render an entity from the node's current metrics and availability.
pub fn render<N>(spec: &EntitySpec, node: &N) -> EntitySnapshot
where
    N: Available + MetricsHolder + ?Sized,
{
    let metrics = node.metrics();
    let available = node.is_available()
        && match spec.availability {
            AvailabilityRule::Node => true,
            AvailabilityRule::StatusIn(set) => metrics
                .text(keys::STATUS)
                .is_some_and(|status| set.contains(&status.as_str())),
        };

    let mut snapshot = EntitySnapshot {
        unique_id: spec.unique_id.clone(),
        available,
        state: None,
        unit: None,
        icon: spec.icon.to_string(),
        attributes: BTreeMap::new(),
    };

    match &spec.control {
        None => {
            if let Some(metric) = spec.metric_key.as_deref().and_then(|k| metrics.get(k)) {
                snapshot.state = metric.value.map(round_float);
                snapshot.unit = spec
                    .metric_key
                    .as_deref()
                    .and_then(|k| display_unit(k, metric.unit.as_deref()))
                    .map(String::from);
                snapshot.attributes = metric.extra;
            }
        }
        Some(Control::Switch {
            state_key, on_when, ..
        }) => {
            let value = metrics.value(state_key);
            let on = match on_when {
                OnWhen::Flag => value.and_then(|v| v.as_bool()).unwrap_or(false),
                OnWhen::TextIn(set) => value
                    .as_ref()
                    .and_then(MetricValue::as_str)
                    .is_some_and(|s| set.contains(&s)),
            };
            snapshot.state = Some(MetricValue::Bool(on));
        }
        Some(Control::Button { .. }) => {}
        Some(Control::Number { state_key, max, .. }) => {
            let value = metrics
                .value(state_key)
                .and_then(|v| v.as_f64())
                .unwrap_or(*max);
            snapshot.state = Some(MetricValue::Float(value));
            snapshot.unit = Some("A".to_string());
        }
    }

    snapshot
}

fn round_float(value: MetricValue) -> MetricValue {
    match value {
        MetricValue::Float(v) => MetricValue::Float((v * 10.0).round() / 10.0),
        other => other,
    }
}
