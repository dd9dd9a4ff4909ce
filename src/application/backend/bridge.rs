use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::{debug, info, warn};

use super::{BackendPoller, BackendStream, SharedBackendConnector};
use crate::application::dispatch::SharedServiceRouter;
use crate::config::BackendConfig;
use crate::domain::ServiceRequest;
use crate::support::BackendError;

/// Granularity at which an idle poller re-checks the stop flag.
const STOP_CHECK: Duration = Duration::from_millis(50);

struct Running {
    stop: Arc<AtomicBool>,
    workers: Vec<(&'static str, JoinHandle<()>)>,
    consumer: tokio::task::JoinHandle<usize>,
}

/// Starts and stops the backend worker threads.
pub struct BackendBridge {
    connector: Option<SharedBackendConnector>,
    router: SharedServiceRouter,
    config: BackendConfig,
    running: Mutex<Option<Running>>,
    /// Serializes start and stop.
    transition: tokio::sync::Mutex<()>,
}

impl BackendBridge {
    pub fn new(
        connector: Option<SharedBackendConnector>,
        router: SharedServiceRouter,
        config: BackendConfig,
    ) -> Self {
        Self {
            connector,
            router,
            config,
            running: Mutex::new(None),
            transition: tokio::sync::Mutex::new(()),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.connector.is_some()
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Open a connection and start both worker threads.
    ///
    /// The connector is opened on the blocking pool. Returns `Ok(false)`
    /// when the workers are already running.
    pub async fn start(&self) -> Result<bool, BackendError> {
        let _transition = self.transition.lock().await;
        if self.is_running() {
            return Ok(false);
        }
        let connector = self.connector.clone().ok_or(BackendError::NotConfigured)?;
        let session = tokio::task::spawn_blocking(move || connector.open())
            .await
            .map_err(|e| BackendError::Io(e.to_string()))??;

        let stop = Arc::new(AtomicBool::new(false));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let interval = Duration::from_secs(self.config.poll_interval_secs);
        let poller = spawn_worker("backend-poller", {
            let (stop, tx) = (stop.clone(), tx.clone());
            move || poll_loop(session.poller, tx, stop, interval)
        });
        let poller = match poller {
            Ok(handle) => handle,
            Err(e) => {
                stop.store(true, Ordering::SeqCst);
                return Err(e);
            }
        };

        let timeout = Duration::from_millis(self.config.stream_timeout_ms);
        let stream = spawn_worker("backend-stream", {
            let stop = stop.clone();
            move || stream_loop(session.stream, tx, stop, timeout)
        });
        let stream = match stream {
            Ok(handle) => handle,
            Err(e) => {
                stop.store(true, Ordering::SeqCst);
                return Err(e);
            }
        };

        let router = self.router.clone();
        let consumer = tokio::spawn(async move {
            let mut dispatched = 0;
            while let Some(request) = rx.recv().await {
                if request.service.is_central() {
                    debug!(service = %request.service, "Central service ignored from backend");
                    continue;
                }
                debug!(service = %request.service, station_id = %request.charging_station_id, "Backend command received");
                router.invoke_service(request).await;
                dispatched += 1;
            }
            dispatched
        });

        *self.running.lock() = Some(Running {
            stop,
            workers: vec![("backend-poller", poller), ("backend-stream", stream)],
            consumer,
        });
        info!(poll_interval_secs = self.config.poll_interval_secs, "Backend communication started");
        Ok(true)
    }

    /// Signal both workers, join them off the runtime and drain the
    /// commands they already queued.
    ///
    /// Returns `Ok(false)` when nothing was running.
    pub async fn stop(&self) -> Result<bool, BackendError> {
        let _transition = self.transition.lock().await;
        let running = self.running.lock().take();
        let Some(running) = running else {
            return Ok(false);
        };
        running.stop.store(true, Ordering::SeqCst);

        let joined = tokio::task::spawn_blocking(move || {
            let mut result = Ok(());
            for (name, handle) in running.workers {
                if handle.join().is_err() {
                    warn!(worker = name, "Backend worker panicked");
                    result = Err(BackendError::WorkerPanicked(name));
                }
            }
            result
        })
        .await
        .map_err(|e| BackendError::Io(e.to_string()))?;

        // Senders are gone once both workers exit; the consumer drains and ends.
        let dispatched = running
            .consumer
            .await
            .map_err(|e| BackendError::Io(e.to_string()))?;
        joined?;

        info!(dispatched, "Backend communication stopped");
        Ok(true)
    }
}

fn spawn_worker(
    name: &'static str,
    work: impl FnOnce() + Send + 'static,
) -> Result<JoinHandle<()>, BackendError> {
    thread::Builder::new()
        .name(name.to_string())
        .spawn(work)
        .map_err(|e| BackendError::Io(format!("cannot spawn {}: {}", name, e)))
}

fn poll_loop(
    mut poller: Box<dyn BackendPoller>,
    tx: UnboundedSender<ServiceRequest>,
    stop: Arc<AtomicBool>,
    interval: Duration,
) {
    while !stop.load(Ordering::SeqCst) {
        match poller.poll() {
            Ok(requests) => {
                for request in requests {
                    if tx.send(request).is_err() {
                        return;
                    }
                }
            }
            Err(e) => warn!(error = %e, "Backend poll failed"),
        }

        let next = Instant::now() + interval.max(STOP_CHECK);
        while Instant::now() < next {
            if stop.load(Ordering::SeqCst) {
                return;
            }
            thread::sleep(STOP_CHECK.min(next.saturating_duration_since(Instant::now())));
        }
    }
}

fn stream_loop(
    mut stream: Box<dyn BackendStream>,
    tx: UnboundedSender<ServiceRequest>,
    stop: Arc<AtomicBool>,
    timeout: Duration,
) {
    while !stop.load(Ordering::SeqCst) {
        match stream.next_message(timeout) {
            Ok(Some(request)) => {
                if tx.send(request).is_err() {
                    return;
                }
            }
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "Backend stream read failed");
                thread::sleep(timeout);
            }
        }
    }
}
