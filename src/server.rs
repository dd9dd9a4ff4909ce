//! Headless runtime.
//!
//! [`ServerHandle`] owns the whole lifecycle: registry, central system,
//! event bus, backend link and graceful shutdown. The CLI binary is a thin
//! shell around it; a host that embeds the crate passes its own registry
//! and backend connector through [`ServerOptions`].

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::application::backend::SharedBackendConnector;
use crate::application::events::{create_event_bus, SharedEventBus};
use crate::application::ports::SharedRegistry;
use crate::application::{CentralSystem, SharedCentralSystem};
use crate::config::AppConfig;
use crate::infrastructure::InMemoryEntityRegistry;
use crate::support::shutdown::{ShutdownCoordinator, ShutdownSignal};
use crate::support::AppError;

// ── Options ────────────────────────────────────────────────────────

pub struct ServerOptions {
    pub config: AppConfig,
    /// Host entity registry. The in-memory registry when `None`.
    pub registry: Option<SharedRegistry>,
    /// Energy-management backend. Communication cannot start without one.
    pub backend: Option<SharedBackendConnector>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            config: AppConfig::default(),
            registry: None,
            backend: None,
        }
    }
}

// ── ServerHandle ───────────────────────────────────────────────────

/// Handle to a running central system.
///
/// ```rust,no_run
/// use charge_advisor::server::{ServerHandle, ServerOptions};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let handle = ServerHandle::start(ServerOptions::default()).await?;
///     handle.install_signal_handler();
///     handle.shutdown_signal().wait().await;
///     handle.wait().await;
///     Ok(())
/// }
/// ```
pub struct ServerHandle {
    pub central_system: SharedCentralSystem,
    pub event_bus: SharedEventBus,
    pub registry: SharedRegistry,
    pub config: AppConfig,

    shutdown: ShutdownCoordinator,
    event_task: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    /// Build the central system, register its device and, when configured,
    /// start backend communication.
    pub async fn start(opts: ServerOptions) -> Result<Self, AppError> {
        let config = opts.config;
        info!(csid = %config.central_system.id, "Starting Charge Advisor");

        let registry: SharedRegistry = match opts.registry {
            Some(registry) => registry,
            None => {
                info!("No host registry attached, using in-memory registry");
                Arc::new(InMemoryEntityRegistry::new())
            }
        };
        let event_bus = create_event_bus();

        let central_system = Arc::new(CentralSystem::new(
            &config,
            registry.clone(),
            opts.backend,
            event_bus.clone(),
        )?);
        central_system.start().await?;

        if config.backend.autostart && !central_system.communication_start().await {
            warn!("Backend autostart failed, communication stays off");
        }

        let shutdown = ShutdownCoordinator::new(config.runtime.shutdown_timeout_secs);
        let event_task = spawn_event_log(event_bus.clone(), shutdown.signal());

        info!(address = %config.central_system.address(), "Charge Advisor running");
        Ok(Self {
            central_system,
            event_bus,
            registry,
            config,
            shutdown,
            event_task,
        })
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.signal()
    }

    /// Trigger shutdown on SIGTERM / SIGINT.
    pub fn install_signal_handler(&self) {
        self.shutdown.start_signal_listener();
    }

    pub fn trigger_shutdown(&self) {
        self.shutdown.signal().trigger();
    }

    /// Stop the backend and background tasks once shutdown has been
    /// triggered.
    pub async fn wait(self) {
        self.shutdown.signal().wait().await;

        let central_system = self.central_system.clone();
        let event_task = self.event_task;
        self.shutdown
            .run_cleanup(|| async move {
                central_system.shutdown().await;
                if let Err(e) = event_task.await {
                    error!(error = %e, "Event log task panicked");
                }
            })
            .await;
        info!("Charge Advisor stopped");
    }

    pub async fn shutdown(self) {
        self.trigger_shutdown();
        self.wait().await;
    }

    pub fn is_running(&self) -> bool {
        !self.event_task.is_finished()
    }
}

/// Mirror bus events into the log until shutdown.
fn spawn_event_log(event_bus: SharedEventBus, shutdown: ShutdownSignal) -> tokio::task::JoinHandle<()> {
    let mut events = event_bus.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                message = events.recv() => match message {
                    Some(message) => debug!(
                        event_type = message.event.event_type(),
                        station_id = ?message.event.station_id(),
                        id = %message.id,
                        "Topology event"
                    ),
                    None => break,
                },
            }
        }
    })
}

/// Initialize tracing from the `[logging]` section. `RUST_LOG` wins over
/// the configured level.
pub fn init_tracing(config: &AppConfig) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    let result = match config.logging.format.to_lowercase().as_str() {
        "json" => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
        _ => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init(),
    };
    if let Err(e) = result {
        eprintln!("tracing already initialized: {}", e);
    }
}
