//! Shutdown coordination.
//!
//! A single root [`CancellationToken`] ties the process together: acceptor
//! loops stop on it, and every admitted session holds a child of it, so
//! cancelling the root releases every blocked push and pop.
//!
//! [`ShutdownCoordinator::shutdown`] is idempotent; signal handlers, the
//! panic hook and fatal errors can all call it and only the first call acts.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::shared::SharedState;

#[derive(Debug)]
struct Inner {
    token: CancellationToken,
    fired: AtomicBool,
    state: SharedState,
}

/// Cloneable handle that stops the server.
#[derive(Debug, Clone)]
pub struct ShutdownCoordinator {
    inner: Arc<Inner>,
}

impl ShutdownCoordinator {
    /// Create a coordinator reporting on `state` when it fires.
    pub fn new(state: SharedState) -> Self {
        Self {
            inner: Arc::new(Inner {
                token: CancellationToken::new(),
                fired: AtomicBool::new(false),
                state,
            }),
        }
    }

    /// Root token. Sessions should hold children of it.
    pub fn token(&self) -> &CancellationToken {
        &self.inner.token
    }

    /// Check if shutdown has started.
    pub fn is_shutdown(&self) -> bool {
        self.inner.fired.load(Ordering::Acquire)
    }

    /// Resolve once shutdown has started.
    pub async fn wait(&self) {
        self.inner.token.cancelled().await
    }

    /// Stop accepting, cancel every waiter and close every session.
    ///
    /// Returns `false` if shutdown had already been requested.
    pub fn shutdown(&self, reason: &str) -> bool {
        self.run(reason, Locking::Wait)
    }

    /// Same sequence as [`shutdown`](Self::shutdown), but never waits on
    /// the registry or stack locks. For fault paths, where the faulting
    /// thread may already hold one of them.
    pub fn shutdown_from_fault(&self, reason: &str) -> bool {
        self.run(reason, Locking::Try)
    }

    fn run(&self, reason: &str, locking: Locking) -> bool {
        if self.inner.fired.swap(true, Ordering::AcqRel) {
            debug!("Shutdown already in progress, ignoring {}", reason);
            return false;
        }

        warn!("{} captured, shutting down...", reason);
        self.inner.token.cancel();

        let state = &self.inner.state;
        // Sessions registered outside admission may not descend from the root token
        let sessions = match locking {
            Locking::Wait => Some(state.registry.cancel_all()),
            Locking::Try => state.registry.try_cancel_all(),
        };
        debug!(?sessions, "Cancelled open sessions");

        let snapshot = match locking {
            Locking::Wait => Some(state.snapshot()),
            Locking::Try => state.try_snapshot(),
        };
        match snapshot.map(|snapshot| snapshot.to_json()) {
            Some(Ok(json)) => info!("Final tallies: {}", json),
            Some(Err(e)) => error!("Final tallies unavailable: {}", e),
            None => warn!("Final tallies unavailable: state is locked"),
        }
        true
    }
}

#[derive(Debug, Clone, Copy)]
enum Locking {
    Wait,
    Try,
}

/// Termination signal that requested shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationSignal {
    /// SIGTERM.
    Terminate,
    /// SIGINT / Ctrl-C.
    Interrupt,
}

impl fmt::Display for TerminationSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationSignal::Terminate => f.write_str("SIGTERM"),
            TerminationSignal::Interrupt => f.write_str("SIGINT"),
        }
    }
}

/// Wait for SIGTERM or SIGINT.
#[cfg(unix)]
pub async fn wait_for_signal() -> std::io::Result<TerminationSignal> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => Ok(TerminationSignal::Terminate),
        _ = sigint.recv() => Ok(TerminationSignal::Interrupt),
    }
}

/// Wait for Ctrl-C.
#[cfg(not(unix))]
pub async fn wait_for_signal() -> std::io::Result<TerminationSignal> {
    tokio::signal::ctrl_c().await?;
    Ok(TerminationSignal::Interrupt)
}

/// Run the shutdown sequence when any thread panics, then defer to the
/// previously installed hook.
pub fn install_panic_hook(coordinator: ShutdownCoordinator) {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        error!("Uncaught fault: {}", info);
        coordinator.shutdown_from_fault("uncaughtException");
        previous(info);
    }));
}
