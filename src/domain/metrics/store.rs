use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// A single telemetry value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl MetricValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Text(s) => s.trim().parse().ok(),
            Self::Bool(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            Self::Float(v) => Some(*v as i64),
            Self::Text(s) => s.trim().parse().ok(),
            Self::Bool(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl From<bool> for MetricValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for MetricValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<u32> for MetricValue {
    fn from(v: u32) -> Self {
        Self::Integer(i64::from(v))
    }
}

impl From<f64> for MetricValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for MetricValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for MetricValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl std::fmt::Display for MetricValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{}", v),
            Self::Integer(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
            Self::Text(v) => write!(f, "{}", v),
        }
    }
}

/// A metric sample: value, protocol unit and free-form attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub value: Option<MetricValue>,
    /// Unit as reported by the station (protocol vocabulary).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl Metric {
    pub fn new(value: impl Into<MetricValue>) -> Self {
        Self {
            value: Some(value.into()),
            unit: None,
            timestamp: Utc::now(),
            extra: BTreeMap::new(),
        }
    }

    pub fn empty() -> Self {
        Self {
            value: None,
            unit: None,
            timestamp: Utc::now(),
            extra: BTreeMap::new(),
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// Metric map owned by a topology node.
///
/// Entries are replaced wholesale; a reader never observes a half-updated
/// sample.
#[derive(Debug, Default)]
pub struct MetricsStore {
    entries: DashMap<String, Metric>,
}

impl MetricsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Metric> {
        self.entries.get(key).map(|m| m.clone())
    }

    pub fn value(&self, key: &str) -> Option<MetricValue> {
        self.entries.get(key).and_then(|m| m.value.clone())
    }

    pub fn text(&self, key: &str) -> Option<String> {
        self.value(key).map(|v| v.to_string())
    }

    pub fn set(&self, key: impl Into<String>, metric: Metric) {
        self.entries.insert(key.into(), metric);
    }

    pub fn set_value(&self, key: impl Into<String>, value: impl Into<MetricValue>) {
        self.set(key, Metric::new(value));
    }

    pub fn remove(&self, key: &str) -> Option<Metric> {
        self.entries.remove(key).map(|(_, m)| m)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Keys in sorted order.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_replaces_whole_sample() {
        let store = MetricsStore::new();
        store.set("current.import", Metric::new(16.0).with_unit("A").with_extra("phase", "L1"));
        store.set("current.import", Metric::new(8.0));

        let metric = store.get("current.import").unwrap();
        assert_eq!(metric.value, Some(MetricValue::Float(8.0)));
        assert!(metric.unit.is_none());
        assert!(metric.extra.is_empty());
    }

    #[test]
    fn numeric_views() {
        assert_eq!(MetricValue::from("12.5").as_f64(), Some(12.5));
        assert_eq!(MetricValue::from(3_i64).as_f64(), Some(3.0));
        assert_eq!(MetricValue::from(true).as_f64(), None);
        assert_eq!(MetricValue::from("42").as_i64(), Some(42));
    }

    #[test]
    fn keys_are_sorted() {
        let store = MetricsStore::new();
        store.set_value("voltage", 230.0);
        store.set_value("availability", "Operative");
        assert_eq!(store.keys(), vec!["availability", "voltage"]);
        assert_eq!(store.text("availability").as_deref(), Some("Operative"));
    }
}
