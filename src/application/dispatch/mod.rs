//! Service dispatch
//!
//! Maps a service call (name + station/EVSE/connector address + payload)
//! onto exactly one protocol operation.

pub mod router;

pub use router::{ServiceRouter, SharedServiceRouter, DEFAULT_ID_TAG};
