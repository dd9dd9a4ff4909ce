pub mod version;

pub use version::{OcppVersion, TopologyShape};
