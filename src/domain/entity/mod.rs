//! UI-facing entities derived from topology nodes.
//!
//! [`catalog`] decides which entities a node should have, [`render`]
//! turns a node's current state into an entity snapshot and [`control`]
//! maps switch, button and number actions back to service requests.

pub mod catalog;
pub mod control;
pub mod render;
pub mod spec;

pub use catalog::{entities_for, CatalogContext};
pub use control::{action_request, button_request, number_request, switch_request, EntityAction};
pub use render::{render, EntitySnapshot};
pub use spec::{AvailabilityRule, Control, EntityCategory, EntitySpec, OnWhen, Platform};
