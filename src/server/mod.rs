//! Dual-listener TCP server using Tokio.
//!
//! Accepts client connections on the primary port and dispatches each to the
//! supplied handler in its own task. A second listener on `port + 1` waits
//! for the one-line `stop` command and flips the shared stop flag; the accept
//! loop observes the flag at least once per poll interval, stops accepting,
//! and lets in-flight handlers drain.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tracing::{debug, error, info, trace};

use crate::config::{ConfigError, ServerConfig};
use crate::conn::{self, ConnReader, ConnWriter, HandlerError};
use crate::control::{ControlListener, ControlMode, ServerState};

/// Errors produced by the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to bind {role} listener to {addr}: {source}")]
    Bind {
        role: &'static str,
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// How long the accept loop waits for a pending connection before re-checking
/// the stop flag. This is the shutdown-latency bound.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// The tcpskel server.
///
/// Binds both listeners up front, then runs the accept/dispatch loop until a
/// `stop` command arrives on the control port. The per-connection protocol is
/// entirely defined by the handler passed to [`run`](Self::run).
///
/// # Examples
///
/// ```rust,no_run
/// use tcpskel::{Server, ServerConfig};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = ServerConfig::new("echo", 7007);
///     let server = Server::bind(&config).await?;
///     server
///         .run(|mut reader, mut writer| async move {
///             while let Some(line) = reader.read_line().await? {
///                 writer.write_line(&line).await?;
///             }
///             Ok(())
///         })
///         .await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    control_listener: TcpListener,
    local_addr: SocketAddr,
    control_addr: SocketAddr,
    state: Arc<ServerState>,
    name: String,
    poll_interval: Duration,
    control_mode: ControlMode,
}

impl Server {
    /// Validates the configuration and binds the primary listener on
    /// `(host, port)` and the control listener on all interfaces at
    /// `port + 1`.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Config`] for an invalid configuration, or
    /// [`ServerError::Bind`] if either port is unavailable. A fixed port is a
    /// prerequisite, not a transient condition — there is no retry.
    pub async fn bind(config: &ServerConfig) -> Result<Self, ServerError> {
        config.validate()?;

        let primary_addr = config.primary_addr();
        let listener = TcpListener::bind(primary_addr)
            .await
            .map_err(|e| ServerError::Bind {
                role: "primary",
                addr: primary_addr,
                source: e,
            })?;

        let control_target = config.control_addr();
        let control_listener =
            TcpListener::bind(control_target)
                .await
                .map_err(|e| ServerError::Bind {
                    role: "control",
                    addr: control_target,
                    source: e,
                })?;

        let local_addr = listener.local_addr()?;
        let control_addr = control_listener.local_addr()?;

        Ok(Self {
            listener,
            control_listener,
            local_addr,
            control_addr,
            state: ServerState::new(),
            name: config.name.clone(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            control_mode: ControlMode::default(),
        })
    }

    /// Returns the local address the primary listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns the local address the control listener is bound to.
    pub fn control_addr(&self) -> SocketAddr {
        self.control_addr
    }

    /// Returns a handle to the shared lifecycle state.
    ///
    /// Holders can observe shutdown progress or request a stop directly,
    /// bypassing the control port.
    pub fn state(&self) -> Arc<ServerState> {
        Arc::clone(&self.state)
    }

    /// Sets how long the accept loop waits for a pending connection before
    /// re-checking the stop flag. Shutdown may lag the stop command by up to
    /// one interval. Defaults to 1 second.
    #[must_use]
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Selects the control-channel accept behavior. Defaults to
    /// [`ControlMode::SingleShot`].
    #[must_use]
    pub fn control_mode(mut self, mode: ControlMode) -> Self {
        self.control_mode = mode;
        self
    }

    /// Starts the control listener and runs the accept/dispatch loop until
    /// shutdown is requested.
    ///
    /// The handler is invoked once per accepted connection with that
    /// connection's [`ConnReader`] and [`ConnWriter`]; it is wrapped in an
    /// [`Arc`] and shared across all spawned tasks, so it must be
    /// `Send + Sync + 'static`. Handler outcomes never affect the loop: an
    /// error return is logged as a handler fault and the connection's
    /// resources are released either way.
    ///
    /// Returns once the stop flag has been observed. The primary listener is
    /// closed at that point; handlers still in flight are not cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Io`] only for listener-level failures outside
    /// the accept path; transient accept errors are logged and polling
    /// continues.
    pub async fn run<H, F>(self, handler: H) -> Result<(), ServerError>
    where
        H: Fn(ConnReader, ConnWriter) -> F + Send + Sync + 'static,
        F: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        self.state.set_running();
        info!(name = %self.name, port = self.local_addr.port(), "server started");

        let control = ControlListener::new(
            self.control_listener,
            Arc::clone(&self.state),
            self.control_mode,
        );
        info!(port = self.control_addr.port(), "control listener started");
        tokio::spawn(control.run());

        while !self.state.stop_requested() {
            match timeout(self.poll_interval, self.listener.accept()).await {
                Ok(Ok((stream, peer_addr))) => {
                    debug!(peer = %peer_addr, "client connection accepted");
                    let handler = Arc::clone(&handler);
                    tokio::spawn(conn::dispatch(stream, peer_addr, handler));
                }
                Ok(Err(e)) => {
                    error!(error = %e, "failed to accept connection");
                }
                Err(_elapsed) => {
                    trace!("no pending connections; re-polling");
                }
            }
        }

        self.state.set_stopped();
        // Closing the listener refuses new connections immediately; spawned
        // handlers keep running until they finish on their own.
        drop(self.listener);
        info!(name = %self.name, "server stopped accepting connections");
        Ok(())
    }
}
