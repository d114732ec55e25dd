//! Shutdown signals and listener draining.

use crate::error::Result;
use std::time::{Duration, Instant};
use tokio::signal;
use tokio::task::{JoinError, JoinSet};
use tokio::time::timeout;
use tracing::{error, info, warn};

/// Outcome of draining the listeners.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Listeners that stopped cleanly
    pub stopped: usize,
    /// Listeners that stopped with an error or panicked
    pub failed: usize,
    /// Listeners aborted when the deadline elapsed
    pub aborted: usize,
    /// Time spent draining
    pub elapsed: Duration,
}

impl ShutdownReport {
    /// Whether the deadline forced any listener down
    #[must_use]
    pub const fn forced(&self) -> bool {
        self.aborted > 0
    }
}

/// Log how a listener task ended. Returns `true` if it ended cleanly.
pub(crate) fn log_exit(joined: std::result::Result<Result<()>, JoinError>) -> bool {
    match joined {
        Ok(Ok(())) => true,
        Ok(Err(err)) => {
            error!(error = %err, "Listener stopped with error");
            false
        }
        Err(err) if err.is_cancelled() => false,
        Err(err) => {
            error!(error = %err, "Listener task panicked");
            false
        }
    }
}

/// Wait for every listener task, aborting the rest once `deadline` elapses.
pub(crate) async fn drain_listeners(
    tasks: &mut JoinSet<Result<()>>,
    deadline: Duration,
) -> ShutdownReport {
    let started = Instant::now();
    let mut report = ShutdownReport::default();

    let drained = timeout(deadline, async {
        while let Some(joined) = tasks.join_next().await {
            if log_exit(joined) {
                report.stopped += 1;
            } else {
                report.failed += 1;
            }
        }
    })
    .await;

    if drained.is_err() {
        report.aborted = tasks.len();
        warn!(
            remaining = report.aborted,
            deadline_ms = deadline.as_millis() as u64,
            "Graceful shutdown timeout, forcing exit"
        );
        tasks.abort_all();
        while tasks.join_next().await.is_some() {}
    } else {
        info!("All servers shutdown gracefully");
    }

    report.elapsed = started.elapsed();
    report
}

/// Wait for Ctrl+C, SIGINT, SIGTERM or SIGQUIT. Returns the signal name.
pub async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
        "ctrl+c"
    };

    #[cfg(unix)]
    let sigterm = unix_signal(signal::unix::SignalKind::terminate(), "sigterm");
    #[cfg(unix)]
    let sigint = unix_signal(signal::unix::SignalKind::interrupt(), "sigint");
    #[cfg(unix)]
    let sigquit = unix_signal(signal::unix::SignalKind::quit(), "sigquit");

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<&'static str>();
    #[cfg(not(unix))]
    let sigint = std::future::pending::<&'static str>();
    #[cfg(not(unix))]
    let sigquit = std::future::pending::<&'static str>();

    let signal_name = tokio::select! {
        name = ctrl_c => name,
        name = sigterm => name,
        name = sigint => name,
        name = sigquit => name,
    };

    info!(signal = signal_name, "Shutdown signal received, starting graceful shutdown");
    signal_name
}

#[cfg(unix)]
async fn unix_signal(kind: signal::unix::SignalKind, name: &'static str) -> &'static str {
    match signal::unix::signal(kind) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(err) => {
            error!(signal = name, error = %err, "Failed to install signal handler");
            std::future::pending::<()>().await;
        }
    }
    name
}
