//! Shutdown coordination
//!
//! One [`ShutdownSignal`] is shared by the runtime's tasks; OS signals and
//! explicit calls both trigger it, and the [`ShutdownCoordinator`] runs the
//! cleanup under a deadline.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Cloneable one-shot shutdown flag.
#[derive(Clone)]
pub struct ShutdownSignal {
    sender: broadcast::Sender<()>,
    triggered: Arc<AtomicBool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1);
        Self {
            sender,
            triggered: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Only the first call has an effect.
    pub fn trigger(&self) {
        if !self.triggered.swap(true, Ordering::SeqCst) {
            info!("Shutdown requested");
            let _ = self.sender.send(());
        }
    }

    /// Resolves once the signal has been triggered, including before the
    /// call.
    pub async fn wait(&self) {
        let mut rx = self.sender.subscribe();
        if self.is_triggered() {
            return;
        }
        let _ = rx.recv().await;
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Trigger `shutdown` on SIGTERM or SIGINT (Ctrl+C elsewhere).
///
/// When no handler can be installed the error is logged and the signal is
/// left to explicit triggers.
pub async fn listen_for_shutdown_signals(shutdown: ShutdownSignal) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) = match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(term), Ok(int)) => (term, int),
            (Err(e), _) | (_, Err(e)) => {
                error!(error = %e, "Cannot install signal handlers");
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
        }
        shutdown.trigger();
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Cannot install Ctrl+C handler");
            return;
        }
        info!("Received Ctrl+C");
        shutdown.trigger();
    }
}

pub struct ShutdownCoordinator {
    signal: ShutdownSignal,
    timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            signal: ShutdownSignal::new(),
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    pub fn signal(&self) -> ShutdownSignal {
        self.signal.clone()
    }

    pub fn start_signal_listener(&self) {
        tokio::spawn(listen_for_shutdown_signals(self.signal.clone()));
    }

    /// Run `cleanup` under the configured deadline. `false` on timeout.
    pub async fn run_cleanup<F, Fut>(&self, cleanup: F) -> bool
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ()>,
    {
        info!(timeout_secs = self.timeout.as_secs(), "Shutting down");
        match tokio::time::timeout(self.timeout, cleanup()).await {
            Ok(()) => {
                info!("Shutdown complete");
                true
            }
            Err(_) => {
                warn!(timeout_secs = self.timeout.as_secs(), "Shutdown timed out");
                false
            }
        }
    }

    /// Wait for the signal, then run `cleanup`.
    pub async fn shutdown_with_cleanup<F, Fut>(&self, cleanup: F) -> bool
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ()>,
    {
        self.signal.wait().await;
        self.run_cleanup(cleanup).await
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new(30)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wait_returns_after_earlier_trigger() {
        let signal = ShutdownSignal::new();
        signal.trigger();
        signal.trigger();
        tokio::time::timeout(Duration::from_secs(1), signal.wait())
            .await
            .unwrap();
        assert!(signal.is_triggered());
    }

    #[tokio::test]
    async fn cleanup_runs_after_trigger() {
        let coordinator = ShutdownCoordinator::new(1);
        let signal = coordinator.signal();
        tokio::spawn(async move { signal.trigger() });
        assert!(coordinator.shutdown_with_cleanup(|| async {}).await);
    }

    #[tokio::test]
    async fn slow_cleanup_times_out() {
        let coordinator = ShutdownCoordinator::new(0);
        let finished = coordinator
            .run_cleanup(|| tokio::time::sleep(Duration::from_millis(200)))
            .await;
        assert!(!finished);
    }
}
