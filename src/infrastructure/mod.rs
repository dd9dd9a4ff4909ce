//! Infrastructure layer - adapters for the application ports

pub mod registry;

pub use registry::InMemoryEntityRegistry;
