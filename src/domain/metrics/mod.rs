//! Node telemetry: the per-node metric store and the pure mapping from
//! metric keys and protocol units to display classes and units.

pub mod keys;
pub mod mapping;
pub mod store;

pub use mapping::{
    classify, display_unit, icon_for, native_unit, state_class, Classification, DeviceClass,
    StateClass,
};
pub use store::{Metric, MetricValue, MetricsStore};
