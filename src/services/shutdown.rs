//! Coordinated shutdown.
//!
//! On trigger the coordinator flips its stop signal, so long-running loops
//! subscribed to it wind down, then starts every registered handler at once
//! and joins them under one shared deadline. Handlers still running at the
//! deadline are aborted and reported as timed out.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{error, info, warn};

type ShutdownFn = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<()>> + Send>;

/// What happened to each registered handler.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub completed: Vec<String>,
    pub failed: Vec<(String, String)>,
    pub timed_out: Vec<String>,
    pub elapsed: Duration,
}

impl ShutdownReport {
    /// Every handler finished without error before the deadline.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.timed_out.is_empty()
    }

    pub fn attempted(&self) -> usize {
        self.completed.len() + self.failed.len() + self.timed_out.len()
    }
}

pub struct ShutdownCoordinator {
    timeout: Duration,
    initiated: AtomicBool,
    signal_tx: watch::Sender<bool>,
    handlers: Mutex<Vec<(String, ShutdownFn)>>,
}

impl ShutdownCoordinator {
    pub fn new(timeout: Duration) -> Self {
        let (signal_tx, _) = watch::channel(false);
        Self {
            timeout,
            initiated: AtomicBool::new(false),
            signal_tx,
            handlers: Mutex::new(Vec::new()),
        }
    }

    /// Register a handler to run once on shutdown.
    pub fn register<F, Fut>(&self, name: impl Into<String>, handler: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let boxed: ShutdownFn = Box::new(move || handler().boxed());
        self.lock_handlers().push((name.into(), boxed));
    }

    pub fn handler_count(&self) -> usize {
        self.lock_handlers().len()
    }

    /// Receiver that turns `true` when shutdown starts.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.signal_tx.subscribe()
    }

    pub fn is_shutdown_initiated(&self) -> bool {
        self.initiated.load(Ordering::SeqCst)
    }

    /// Wait for SIGINT or SIGTERM, or for shutdown to be started elsewhere.
    pub async fn wait_for_signal(&self) -> std::io::Result<()> {
        let mut started = self.subscribe();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            let mut sigint = signal(SignalKind::interrupt())?;
            let mut sigterm = signal(SignalKind::terminate())?;

            tokio::select! {
                _ = sigint.recv() => info!("Received SIGINT"),
                _ = sigterm.recv() => info!("Received SIGTERM"),
                _ = started.wait_for(|initiated| *initiated) => {}
            }
        }

        #[cfg(not(unix))]
        {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    result?;
                    info!("Received Ctrl+C");
                }
                _ = started.wait_for(|initiated| *initiated) => {}
            }
        }

        Ok(())
    }

    /// Signal stop and run every handler under the shared deadline.
    ///
    /// Only the first call runs handlers; later calls return an empty report.
    pub async fn shutdown(&self) -> ShutdownReport {
        if self
            .initiated
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return ShutdownReport::default();
        }

        info!(timeout_secs = self.timeout.as_secs(), "Shutdown initiated");
        self.signal_tx.send_replace(true);

        let handlers = std::mem::take(&mut *self.lock_handlers());
        let started = Instant::now();
        let deadline = started + self.timeout;

        let mut pending: Vec<String> = handlers.iter().map(|(name, _)| name.clone()).collect();
        let mut tasks = JoinSet::new();
        for (name, handler) in handlers {
            tasks.spawn(async move {
                let outcome = AssertUnwindSafe(async move { handler().await })
                    .catch_unwind()
                    .await;
                (name, outcome)
            });
        }

        let mut report = ShutdownReport::default();
        loop {
            match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(Ok((name, outcome)))) => {
                    if let Some(index) = pending.iter().position(|p| *p == name) {
                        pending.remove(index);
                    }
                    match outcome {
                        Ok(Ok(())) => {
                            info!(handler = %name, "Shutdown handler completed");
                            report.completed.push(name);
                        }
                        Ok(Err(e)) => {
                            error!(handler = %name, error = %e, "Shutdown handler failed");
                            report.failed.push((name, e.to_string()));
                        }
                        Err(_) => {
                            error!(handler = %name, "Shutdown handler panicked");
                            report.failed.push((name, "panicked".to_string()));
                        }
                    }
                }
                Ok(Some(Err(e))) => {
                    error!(error = %e, "Shutdown task could not be joined");
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        pending = ?pending,
                        timeout_secs = self.timeout.as_secs(),
                        "Shutdown deadline reached; abandoning remaining handlers"
                    );
                    tasks.abort_all();
                    report.timed_out = std::mem::take(&mut pending);
                    break;
                }
            }
        }

        report.elapsed = started.elapsed();
        info!(
            completed = report.completed.len(),
            failed = report.failed.len(),
            timed_out = report.timed_out.len(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Shutdown finished"
        );
        report
    }

    fn lock_handlers(&self) -> std::sync::MutexGuard<'_, Vec<(String, ShutdownFn)>> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
