pub mod errors;
pub mod shutdown;

pub use errors::{
    AppError, BackendError, ConfigError, DispatchError, ProtocolError, RegistryError,
    TopologyError,
};
