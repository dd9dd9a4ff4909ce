//! Energy-management backend communication
//!
//! The backend reaches the central system through two blocking clients: a
//! poller asked for pending commands at a fixed interval and a stream that
//! pushes commands as they arrive. Both run on dedicated OS threads; the
//! commands they produce are handed to the async runtime through a channel
//! and dispatched by the service router.

pub mod bridge;

use std::sync::Arc;
use std::time::Duration;

use crate::domain::ServiceRequest;
use crate::support::BackendError;

pub use bridge::BackendBridge;

/// Blocking client polled for pending commands.
pub trait BackendPoller: Send {
    fn poll(&mut self) -> Result<Vec<ServiceRequest>, BackendError>;
}

/// Blocking client that delivers commands one at a time.
pub trait BackendStream: Send {
    /// Wait up to `timeout` for the next command. `Ok(None)` on timeout.
    fn next_message(&mut self, timeout: Duration) -> Result<Option<ServiceRequest>, BackendError>;
}

/// Both clients of one backend connection.
pub struct BackendSession {
    pub poller: Box<dyn BackendPoller>,
    pub stream: Box<dyn BackendStream>,
}

/// Opens backend connections.
pub trait BackendConnector: Send + Sync {
    fn open(&self) -> Result<BackendSession, BackendError>;
}

pub type SharedBackendConnector = Arc<dyn BackendConnector>;
