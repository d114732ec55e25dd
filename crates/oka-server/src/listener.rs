//! One bound socket serving one listener router.

use crate::conn::{ConnectionTimeouts, IdleTimeoutAcceptor};
use crate::error::{Result, ServerError};
use axum::Router;
use axum_server::tls_rustls::{RustlsAcceptor, RustlsConfig};
use axum_server::Handle;
use hyper_util::rt::TokioTimer;
use oka_config::ServerSpec;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

/// Bound on reading a request head.
pub const HEADER_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Bound on completing a TLS handshake.
pub const TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Lifecycle of a listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerPhase {
    /// Created, nothing bound yet
    Configured,
    /// Binding the socket and loading TLS material
    Binding,
    /// Accepting connections
    Serving,
    /// No longer accepting; draining in-flight connections
    ShuttingDown,
    /// Accept loop has returned
    Stopped,
}

impl fmt::Display for ListenerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configured => write!(f, "configured"),
            Self::Binding => write!(f, "binding"),
            Self::Serving => write!(f, "serving"),
            Self::ShuttingDown => write!(f, "shutting_down"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// A bound listener ready to serve.
pub struct Listener {
    name: String,
    local_addr: SocketAddr,
    socket: std::net::TcpListener,
    tls: Option<RustlsConfig>,
    router: Router,
    handle: Handle,
    timeouts: ConnectionTimeouts,
    phase: Arc<watch::Sender<ListenerPhase>>,
}

impl Listener {
    /// Bind the socket for `spec` and load its certificate, if any.
    ///
    /// # Errors
    /// Returns error if the address cannot be bound or TLS material cannot be
    /// loaded.
    pub async fn bind(spec: &ServerSpec, router: Router) -> Result<Self> {
        let (phase, _) = watch::channel(ListenerPhase::Configured);
        let phase = Arc::new(phase);
        phase.send_replace(ListenerPhase::Binding);

        let addr = spec.socket_addr();
        let bind_error = |source| ServerError::Bind {
            name: spec.name.clone(),
            addr,
            source,
        };

        let socket = std::net::TcpListener::bind(addr).map_err(bind_error)?;
        socket.set_nonblocking(true).map_err(bind_error)?;
        let local_addr = socket.local_addr().map_err(bind_error)?;

        let tls = if spec.tls_enabled() {
            Some(load_tls(spec).await?)
        } else {
            None
        };

        debug!(server = %spec.name, addr = %local_addr, tls = tls.is_some(), "Listener bound");

        Ok(Self {
            name: spec.name.clone(),
            local_addr,
            socket,
            tls,
            router,
            handle: Handle::new(),
            timeouts: ConnectionTimeouts::default(),
            phase,
        })
    }

    /// Replace the client connection inactivity limits
    #[must_use]
    pub fn with_connection_timeouts(mut self, timeouts: ConnectionTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Handle used to observe and stop this listener once it is serving.
    #[must_use]
    pub fn control(&self) -> ListenerControl {
        ListenerControl {
            name: self.name.clone(),
            local_addr: self.local_addr,
            tls: self.tls.is_some(),
            handle: self.handle.clone(),
            phase: Arc::clone(&self.phase),
        }
    }

    /// Serve until shut down through a [`ListenerControl`].
    ///
    /// # Errors
    /// Returns error if the accept loop fails.
    pub async fn serve(self) -> Result<()> {
        let Self {
            name,
            local_addr,
            socket,
            tls,
            router,
            handle,
            timeouts,
            phase,
        } = self;

        let app = router.into_make_service_with_connect_info::<SocketAddr>();
        phase.send_if_modified(|current| {
            let starting = *current == ListenerPhase::Binding;
            if starting {
                *current = ListenerPhase::Serving;
            }
            starting
        });

        let acceptor = IdleTimeoutAcceptor::new(timeouts);
        let result = if let Some(config) = tls {
            info!(server = %name, addr = %local_addr, "Starting HTTPS proxy server");
            let mut server = axum_server::from_tcp(socket)
                .acceptor(
                    RustlsAcceptor::new(config)
                        .handshake_timeout(TLS_HANDSHAKE_TIMEOUT)
                        .acceptor(acceptor),
                )
                .handle(handle);
            server
                .http_builder()
                .http1()
                .timer(TokioTimer::new())
                .header_read_timeout(HEADER_READ_TIMEOUT);
            server.serve(app).await
        } else {
            info!(server = %name, addr = %local_addr, "Starting HTTP proxy server");
            let mut server = axum_server::from_tcp(socket)
                .acceptor(acceptor)
                .handle(handle);
            server
                .http_builder()
                .http1()
                .timer(TokioTimer::new())
                .header_read_timeout(HEADER_READ_TIMEOUT);
            server.serve(app).await
        };

        phase.send_replace(ListenerPhase::Stopped);
        info!(server = %name, "Listener stopped");
        result.map_err(|source| ServerError::Serve { name, source })
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("name", &self.name)
            .field("local_addr", &self.local_addr)
            .field("tls", &self.tls.is_some())
            .finish_non_exhaustive()
    }
}

async fn load_tls(spec: &ServerSpec) -> Result<RustlsConfig> {
    let (Some(cert), Some(key)) = (&spec.https.cert_path, &spec.https.key_path) else {
        return Err(ServerError::tls(
            &spec.name,
            "https.cert_path and https.key_path are required",
        ));
    };

    RustlsConfig::from_pem_file(cert, key)
        .await
        .map_err(|e| ServerError::tls(&spec.name, e))
}

/// Observes and stops a serving listener.
#[derive(Clone)]
pub struct ListenerControl {
    name: String,
    local_addr: SocketAddr,
    tls: bool,
    handle: Handle,
    phase: Arc<watch::Sender<ListenerPhase>>,
}

impl ListenerControl {
    /// Listener name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Address the socket is bound to
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Whether the listener terminates TLS
    #[must_use]
    pub const fn is_tls(&self) -> bool {
        self.tls
    }

    /// Current phase
    #[must_use]
    pub fn phase(&self) -> ListenerPhase {
        *self.phase.borrow()
    }

    /// Watch phase changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ListenerPhase> {
        self.phase.subscribe()
    }

    /// Open connections
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.handle.connection_count()
    }

    /// Stop accepting and let open connections finish within `grace`.
    pub fn begin_shutdown(&self, grace: Duration) {
        self.phase.send_if_modified(|current| {
            let running = matches!(*current, ListenerPhase::Binding | ListenerPhase::Serving);
            if running {
                *current = ListenerPhase::ShuttingDown;
            }
            running
        });
        debug!(
            server = %self.name,
            connections = self.handle.connection_count(),
            "Listener draining"
        );
        self.handle.graceful_shutdown(Some(grace));
    }
}

impl fmt::Debug for ListenerControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerControl")
            .field("name", &self.name)
            .field("local_addr", &self.local_addr)
            .field("tls", &self.tls)
            .field("phase", &self.phase())
            .finish()
    }
}
