//! In-memory accumulator for multi-part device reports.
//!
//! A station answers a base-report request with several report messages
//! (`tbc = true` until the last one). Parts are collected keyed by
//! `(station_id, request_id)`; the builder applies a report once its last
//! part has arrived.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// A single reported variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportVariable {
    /// Component name (e.g. "EVSE", "Connector", "SmartChargingCtrlr").
    pub component: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component_instance: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evse_id: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connector_id: Option<u32>,
    pub variable: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variable_instance: Option<String>,
    pub attributes: Vec<VariableAttributeEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl ReportVariable {
    pub fn new(component: impl Into<String>, variable: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            component_instance: None,
            evse_id: None,
            connector_id: None,
            variable: variable.into(),
            variable_instance: None,
            attributes: Vec::new(),
            unit: None,
        }
    }

    pub fn at(mut self, evse_id: Option<u32>, connector_id: Option<u32>) -> Self {
        self.evse_id = evse_id;
        self.connector_id = connector_id;
        self
    }

    pub fn actual(mut self, value: impl Into<String>) -> Self {
        self.attributes.push(VariableAttributeEntry {
            attr_type: "Actual".to_string(),
            value: Some(value.into()),
            mutability: None,
        });
        self
    }

    /// Value of the `Actual` attribute, if reported.
    pub fn actual_value(&self) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.attr_type == "Actual")
            .and_then(|a| a.value.as_deref())
    }

    /// Controller components configure the station and are not telemetry.
    pub fn is_controller(&self) -> bool {
        self.component.ends_with("Ctrlr")
    }

    /// Metric key the variable is stored under on its node.
    pub fn metric_key(&self) -> String {
        let mut key = format!("{}.{}", self.component, self.variable);
        if let Some(instance) = &self.variable_instance {
            key.push('.');
            key.push_str(instance);
        }
        key.to_lowercase()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableAttributeEntry {
    /// Actual, Target, MinSet, MaxSet.
    #[serde(rename = "type")]
    pub attr_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mutability: Option<String>,
}

/// Aggregated report for one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceReport {
    pub station_id: String,
    pub request_id: i32,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub in_progress: bool,
    pub parts_received: i32,
    pub variables: Vec<ReportVariable>,
}

impl DeviceReport {
    /// Highest EVSE id mentioned.
    pub fn evse_count(&self) -> u32 {
        self.variables
            .iter()
            .filter_map(|v| v.evse_id)
            .max()
            .unwrap_or(0)
    }

    /// Highest connector id mentioned for `evse_id` (`None` for a flat
    /// station).
    pub fn connector_count(&self, evse_id: Option<u32>) -> u32 {
        self.variables
            .iter()
            .filter(|v| v.evse_id == evse_id)
            .filter_map(|v| v.connector_id)
            .max()
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct ReportKey {
    station_id: String,
    request_id: i32,
}

/// Thread-safe in-memory store for device reports.
#[derive(Debug, Clone, Default)]
pub struct ReportStore {
    reports: Arc<DashMap<ReportKey, DeviceReport>>,
    latest: Arc<DashMap<String, i32>>,
}

impl ReportStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one part. Returns the assembled report when `tbc` is false.
    pub fn append_report(
        &self,
        station_id: &str,
        request_id: i32,
        variables: Vec<ReportVariable>,
        tbc: bool,
    ) -> Option<DeviceReport> {
        let key = ReportKey {
            station_id: station_id.to_string(),
            request_id,
        };

        let report = self
            .reports
            .entry(key)
            .and_modify(|report| {
                report.parts_received += 1;
                report.variables.extend(variables.iter().cloned());
                if !tbc {
                    report.in_progress = false;
                    report.completed_at = Some(Utc::now());
                }
            })
            .or_insert_with(|| DeviceReport {
                station_id: station_id.to_string(),
                request_id,
                started_at: Utc::now(),
                completed_at: if tbc { None } else { Some(Utc::now()) },
                in_progress: tbc,
                parts_received: 1,
                variables,
            })
            .clone();

        self.latest.insert(station_id.to_string(), request_id);
        (!tbc).then_some(report)
    }

    pub fn get_latest_report(&self, station_id: &str) -> Option<DeviceReport> {
        let request_id = *self.latest.get(station_id)?;
        self.get_report(station_id, request_id)
    }

    pub fn get_report(&self, station_id: &str, request_id: i32) -> Option<DeviceReport> {
        let key = ReportKey {
            station_id: station_id.to_string(),
            request_id,
        };
        self.reports.get(&key).map(|r| r.clone())
    }

    /// Forget every report of a station.
    pub fn clear_station(&self, station_id: &str) {
        self.reports.retain(|k, _| k.station_id != station_id);
        self.latest.remove(station_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multi_part_report_completes_on_last_part() {
        let store = ReportStore::new();

        let part1 = vec![ReportVariable::new("EVSE", "Power").at(Some(1), None)];
        assert!(store.append_report("CP001", 42, part1, true).is_none());
        let pending = store.get_latest_report("CP001").unwrap();
        assert!(pending.in_progress);
        assert_eq!(pending.parts_received, 1);
        assert!(pending.completed_at.is_none());

        let part2 = vec![
            ReportVariable::new("Connector", "AvailabilityState").at(Some(1), Some(1)),
            ReportVariable::new("Connector", "AvailabilityState").at(Some(1), Some(2)),
        ];
        let report = store.append_report("CP001", 42, part2, false).unwrap();
        assert!(!report.in_progress);
        assert_eq!(report.parts_received, 2);
        assert_eq!(report.variables.len(), 3);
        assert!(report.completed_at.is_some());
        assert_eq!(report.evse_count(), 1);
        assert_eq!(report.connector_count(Some(1)), 2);
    }

    #[test]
    fn single_part_report_is_complete() {
        let store = ReportStore::new();
        let report = store
            .append_report("CP002", 7, vec![ReportVariable::new("EVSE", "Power")], false)
            .unwrap();
        assert_eq!(report.parts_received, 1);
        assert_eq!(store.get_latest_report("CP002").unwrap().request_id, 7);
    }

    #[test]
    fn latest_report_tracks_most_recent() {
        let store = ReportStore::new();
        store.append_report("CP001", 1, Vec::new(), false);
        store.append_report("CP001", 5, Vec::new(), true);
        assert_eq!(store.get_latest_report("CP001").unwrap().request_id, 5);
        assert_eq!(store.get_report("CP001", 1).unwrap().request_id, 1);

        store.clear_station("CP001");
        assert!(store.get_latest_report("CP001").is_none());
        assert!(store.get_report("UNKNOWN", 1).is_none());
    }

    #[test]
    fn variable_helpers() {
        let var = ReportVariable::new("SmartChargingCtrlr", "Enabled").actual("true");
        assert!(var.is_controller());
        assert_eq!(var.actual_value(), Some("true"));

        let mut power = ReportVariable::new("EVSE", "Power");
        power.variable_instance = Some("Max".to_string());
        assert!(!power.is_controller());
        assert_eq!(power.metric_key(), "evse.power.max");
    }
}
