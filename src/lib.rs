//! # Charge Advisor
//!
//! Entity reconciliation and service dispatch for a tree of OCPP charging
//! stations managed by one central system.
//!
//! ## Architecture
//!
//! - **domain**: topology nodes, metrics and their unit mapping, the entity
//!   catalog, service requests
//! - **application**: topology builder, reconciliation engine, service
//!   router, backend bridge, ports to the protocol engine and the host
//!   registry
//! - **infrastructure**: in-memory entity registry
//! - **config**: TOML configuration and the per-installation settings
//!   resolver
//! - **server**: headless runtime used by the CLI

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod server;
pub mod support;

pub use config::{default_config_path, AppConfig};

pub use application::{
    create_event_bus, CentralSystem, Event, EventBus, ReconcileReport, SharedCentralSystem,
    SharedEventBus, TopologyBuilder,
};
pub use domain::{ServiceName, ServicePayload, ServiceRequest};
