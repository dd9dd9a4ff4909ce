pub mod memory;

pub use memory::{EntityRecord, InMemoryEntityRegistry, RegistryOp};
