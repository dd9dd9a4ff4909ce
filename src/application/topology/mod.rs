//! Topology builder
//!
//! Turns protocol lifecycle callbacks (connect, boot, status, meter values,
//! reports, disconnect) into tree mutations and reconciliation passes.

pub mod builder;
pub mod report;
pub mod station;

pub use builder::{BootInfo, SharedTopologyBuilder, TopologyBuilder};
pub use report::{DeviceReport, ReportStore, ReportVariable, VariableAttributeEntry};
pub use station::{SharedStation, Station};
