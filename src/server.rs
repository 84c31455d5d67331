//! Server builder and accept loops.
//!
//! The [`ServerBuilder`] collects limits and addresses and binds both
//! listeners. [`LifoServer::run`] then:
//! 1. Accepts stack connections and passes each through admission control
//! 2. Serves diagnostics snapshots on the second port
//! 3. On shutdown, stops both acceptors and waits for every session task
//!
//! # Example
//!
//! ```ignore
//! use lifo_server::LifoServer;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = LifoServer::builder()
//!         .bind_address("127.0.0.1")
//!         .server_port(8080)
//!         .diagnostic_port(8081)
//!         .max_stack_size(100)
//!         .bind()
//!         .await?;
//!
//!     let shutdown = server.shutdown_handle();
//!     tokio::spawn(async move {
//!         let _ = tokio::signal::ctrl_c().await;
//!         shutdown.shutdown("SIGINT");
//!     });
//!
//!     server.run().await;
//!     Ok(())
//! }
//! ```

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::diagnostics::run_diagnostic_listener;
use crate::error::Result;
use crate::session::{
    reject_busy, run_session, Admission, AdmissionController, AdmissionPolicy, SessionContext,
    SessionHandle,
};
use crate::shared::SharedState;
use crate::shutdown::ShutdownCoordinator;
use crate::stack::DEFAULT_MAX_STACK_SIZE;
use crate::transport::{StackListener, ACCEPT_ERROR_BACKOFF};

/// Builder for configuring and binding a [`LifoServer`].
#[derive(Debug, Clone)]
pub struct ServerBuilder {
    bind_address: String,
    server_port: u16,
    diagnostic_port: u16,
    max_stack_size: usize,
    policy: AdmissionPolicy,
    session_timeout: Option<Duration>,
}

impl ServerBuilder {
    /// Defaults: all interfaces, ephemeral ports, default limits, no timeout.
    pub fn new() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            server_port: 0,
            diagnostic_port: 0,
            max_stack_size: DEFAULT_MAX_STACK_SIZE,
            policy: AdmissionPolicy::default(),
            session_timeout: None,
        }
    }

    /// Start from a loaded configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            bind_address: config.bind_address.clone(),
            server_port: config.server_port,
            diagnostic_port: config.diagnostic_port,
            max_stack_size: config.max_stack_size,
            policy: config.admission_policy(),
            session_timeout: config.session_timeout(),
        }
    }

    pub fn bind_address(mut self, address: impl Into<String>) -> Self {
        self.bind_address = address.into();
        self
    }

    /// Stack protocol port. 0 picks an ephemeral port.
    pub fn server_port(mut self, port: u16) -> Self {
        self.server_port = port;
        self
    }

    /// Diagnostics port. 0 picks an ephemeral port.
    pub fn diagnostic_port(mut self, port: u16) -> Self {
        self.diagnostic_port = port;
        self
    }

    pub fn max_stack_size(mut self, size: usize) -> Self {
        self.max_stack_size = size;
        self
    }

    /// Maximum admitted sessions, including the one being admitted.
    pub fn max_connections(mut self, limit: usize) -> Self {
        self.policy.max_connections = limit;
        self
    }

    /// Age after which the oldest session may be evicted for a newcomer.
    pub fn stale_connection_period(mut self, period: Duration) -> Self {
        self.policy.stale_period = period;
        self
    }

    /// Hard lifetime of one session. `None` disables it.
    pub fn session_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.session_timeout = timeout;
        self
    }

    /// Bind both listeners.
    pub async fn bind(self) -> Result<LifoServer> {
        let app = StackListener::bind(&self.bind_address, self.server_port).await?;
        let diagnostics = StackListener::bind(&self.bind_address, self.diagnostic_port).await?;

        let state = SharedState::new(self.max_stack_size);
        let admission = AdmissionController::new(state.registry.clone(), self.policy);
        let shutdown = ShutdownCoordinator::new(state.clone());

        debug!(
            app = %app.local_addr(),
            diagnostics = %diagnostics.local_addr(),
            max_stack_size = self.max_stack_size,
            max_connections = self.policy.max_connections,
            "Listeners bound"
        );

        Ok(LifoServer {
            app,
            diagnostics,
            state,
            admission,
            shutdown,
            tracker: TaskTracker::new(),
            session_timeout: self.session_timeout,
        })
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound server, ready to run.
pub struct LifoServer {
    app: StackListener,
    diagnostics: StackListener,
    state: SharedState,
    admission: AdmissionController,
    shutdown: ShutdownCoordinator,
    tracker: TaskTracker,
    session_timeout: Option<Duration>,
}

impl LifoServer {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Bound stack protocol address.
    pub fn local_addr(&self) -> SocketAddr {
        self.app.local_addr()
    }

    /// Bound diagnostics address.
    pub fn diagnostic_addr(&self) -> SocketAddr {
        self.diagnostics.local_addr()
    }

    /// Handle that stops [`run`](Self::run) from elsewhere.
    pub fn shutdown_handle(&self) -> ShutdownCoordinator {
        self.shutdown.clone()
    }

    /// Shared stack and registry.
    pub fn state(&self) -> &SharedState {
        &self.state
    }

    /// Serve until shutdown, then wait for every session to finish.
    ///
    /// Both listeners are closed when this returns.
    pub async fn run(self) {
        let LifoServer {
            app,
            diagnostics,
            state,
            admission,
            shutdown,
            tracker,
            session_timeout,
        } = self;
        let root = shutdown.token().clone();

        let acceptor = Acceptor {
            listener: app,
            admission,
            state: state.clone(),
            root: root.clone(),
            tracker: tracker.clone(),
            session_timeout,
        };
        tokio::join!(
            acceptor.run(),
            run_diagnostic_listener(diagnostics, state.clone(), root, tracker.clone()),
        );

        tracker.close();
        tracker.wait().await;
        info!(
            connections = state.registry.len(),
            stack = state.stack.len(),
            "Server stopped"
        );
    }
}

struct Acceptor {
    listener: StackListener,
    admission: AdmissionController,
    state: SharedState,
    root: CancellationToken,
    tracker: TaskTracker,
    session_timeout: Option<Duration>,
}

impl Acceptor {
    async fn run(self) {
        info!("App server started: {}", self.listener.local_addr());

        loop {
            let accepted = tokio::select! {
                biased;
                _ = self.root.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };

            let (stream, peer) = match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("App server error: {}", e);
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    continue;
                }
            };

            match self.admission.admit(Some(peer), &self.root, Instant::now()) {
                Admission::Admitted(session) => self.spawn_session(stream, session),
                Admission::AdmittedAfterEviction {
                    session,
                    evicted,
                    evicted_ordinal,
                } => {
                    info!(
                        %peer,
                        %evicted,
                        evicted_ordinal,
                        "Evicted stale session to admit new client"
                    );
                    self.spawn_session(stream, session);
                }
                Admission::Rejected { connections } => {
                    debug!(%peer, connections, "Rejecting client");
                    self.tracker.spawn(reject_busy(stream));
                }
            }
        }

        info!("App server closed.");
    }

    fn spawn_session(&self, stream: tokio::net::TcpStream, handle: SessionHandle) {
        let ctx = SessionContext {
            handle,
            stack: self.state.stack.clone(),
            registry: self.state.registry.clone(),
            timeout: self.session_timeout,
        };
        self.tracker.spawn(run_session(stream, ctx));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    #[test]
    fn test_builder_from_config() {
        let config = Config::from_toml(
            "serverPort = 7000\ndiagnosticPort = 7001\nmaxConnections = 3\n\
             staleConnectionPeriodSeconds = 5\nsessionTimeoutSeconds = 9\n",
        )
        .unwrap();
        let builder = ServerBuilder::from_config(&config).server_port(0);

        assert_eq!(builder.server_port, 0);
        assert_eq!(builder.diagnostic_port, 7001);
        assert_eq!(builder.policy.max_connections, 3);
        assert_eq!(builder.policy.stale_period, Duration::from_secs(5));
        assert_eq!(builder.session_timeout, Some(Duration::from_secs(9)));
    }

    #[tokio::test]
    async fn test_bind_and_serve_one_push() {
        let server = LifoServer::builder()
            .bind_address("127.0.0.1")
            .bind()
            .await
            .unwrap();
        let addr = server.local_addr();
        let state = server.state().clone();
        let shutdown = server.shutdown_handle();
        let running = tokio::spawn(server.run());

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(&[0x02, b'h', b'i']).await.unwrap();
        let mut ack = Vec::new();
        stream.read_to_end(&mut ack).await.unwrap();
        assert_eq!(ack, vec![0x00]);
        assert_eq!(state.stack.len(), 1);

        shutdown.shutdown("test");
        running.await.unwrap();
    }

    #[tokio::test]
    async fn test_run_returns_after_shutdown() {
        let server = LifoServer::builder()
            .bind_address("127.0.0.1")
            .bind()
            .await
            .unwrap();
        let shutdown = server.shutdown_handle();
        shutdown.shutdown("test");

        tokio::time::timeout(Duration::from_secs(2), server.run())
            .await
            .unwrap();
    }
}
