//! Shutdown coordination.
//!
//! A [`ServerState`] is the only state shared between the server's tasks: a
//! pair of atomic flags handed out as an `Arc` at construction time. The
//! [`ControlListener`] owns the control-port socket (`primary port + 1`),
//! accepts a connection, reads one command line, and sets the stop flag if
//! the command is the shutdown keyword.
//!
//! The default mode accepts exactly one connection for the entire server
//! lifetime. Once that slot is consumed — by a valid command, a garbage
//! command, or a client that closes silently — the socket is released and
//! every later connection attempt to the control port is refused. A
//! malformed first command therefore permanently forfeits graceful shutdown
//! over this channel; [`ControlMode::Rearming`] opts out of that behavior.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info, warn};

/// The command a control client sends to request shutdown. Matched against
/// the received line trimmed and case-insensitively.
const SHUTDOWN_KEYWORD: &str = "stop";

/// Shared lifecycle state observed by the accept loop and written by the
/// control listener.
///
/// The stop flag is monotonic: once set it can never be cleared, and
/// `running` drops to `false` only after the accept loop has observed the
/// stop request and exited.
#[derive(Debug, Default)]
pub struct ServerState {
    running: AtomicBool,
    stop_requested: AtomicBool,
}

impl ServerState {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Returns `true` while the accept loop is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Returns `true` once shutdown has been requested.
    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    /// Requests shutdown. The accept loop observes the flag within one poll
    /// interval and stops accepting new connections; in-flight handlers run
    /// to completion.
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
    }

    pub(crate) fn set_running(&self) {
        self.running.store(true, Ordering::Release);
    }

    pub(crate) fn set_stopped(&self) {
        debug_assert!(self.stop_requested());
        self.running.store(false, Ordering::Release);
    }
}

/// How the control listener treats its accept slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControlMode {
    /// Accept exactly one connection, ever. Any further connection attempt
    /// to the control port is refused, even if the first command was not the
    /// shutdown keyword.
    #[default]
    SingleShot,
    /// Re-accept after each non-shutdown command until the shutdown keyword
    /// arrives.
    Rearming,
}

/// What one control connection produced.
enum ControlOutcome {
    Stop,
    Ignored,
    Failed,
}

/// Listener for the dedicated shutdown channel.
///
/// The socket is bound by [`Server::bind`](crate::server::Server::bind) so a
/// port conflict is a startup failure; the listener itself runs as a
/// detached task for the rest of the server's life.
pub(crate) struct ControlListener {
    listener: TcpListener,
    state: Arc<ServerState>,
    mode: ControlMode,
}

impl ControlListener {
    pub(crate) fn new(listener: TcpListener, state: Arc<ServerState>, mode: ControlMode) -> Self {
        Self {
            listener,
            state,
            mode,
        }
    }

    /// Serves the control channel, then releases its socket.
    ///
    /// The server never writes on a control connection.
    pub(crate) async fn run(self) {
        match self.mode {
            ControlMode::SingleShot => {
                self.serve_one().await;
            }
            ControlMode::Rearming => loop {
                match self.serve_one().await {
                    ControlOutcome::Stop | ControlOutcome::Failed => break,
                    ControlOutcome::Ignored => continue,
                }
            },
        }
        // self.listener drops here; later connection attempts are refused.
    }

    async fn serve_one(&self) -> ControlOutcome {
        let (stream, peer_addr) = match self.listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                error!(error = %e, "control accept failed; graceful shutdown unavailable");
                return ControlOutcome::Failed;
            }
        };
        info!(peer = %peer_addr, "control connection accepted");

        match read_command(stream).await {
            Ok(Some(command)) if is_shutdown_command(&command) => {
                self.state.request_stop();
                warn!(peer = %peer_addr, "shutdown triggered via control port");
                ControlOutcome::Stop
            }
            Ok(Some(command)) => {
                info!(
                    peer = %peer_addr,
                    command = command.trim(),
                    "ignoring unrecognized control command"
                );
                ControlOutcome::Ignored
            }
            Ok(None) => {
                info!(peer = %peer_addr, "control connection closed without a command");
                ControlOutcome::Ignored
            }
            Err(e) => {
                info!(peer = %peer_addr, error = %e, "failed to read control command");
                ControlOutcome::Ignored
            }
        }
    }
}

/// Reads the single command line from a control connection.
///
/// Returns `Ok(None)` if the peer closed without sending anything.
async fn read_command(stream: TcpStream) -> io::Result<Option<String>> {
    let mut line = String::new();
    let n = BufReader::new(stream).read_line(&mut line).await?;
    Ok((n > 0).then_some(line))
}

fn is_shutdown_command(line: &str) -> bool {
    line.trim().eq_ignore_ascii_case(SHUTDOWN_KEYWORD)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[test]
    fn shutdown_keyword_matching() {
        assert!(is_shutdown_command("stop"));
        assert!(is_shutdown_command("STOP"));
        assert!(is_shutdown_command("  StOp \r\n"));
        assert!(!is_shutdown_command("stops"));
        assert!(!is_shutdown_command("halt"));
        assert!(!is_shutdown_command(""));
    }

    #[test]
    fn stop_flag_is_monotonic() {
        let state = ServerState::new();
        assert!(!state.stop_requested());
        state.request_stop();
        assert!(state.stop_requested());
        state.request_stop(); // idempotent
        assert!(state.stop_requested());
    }

    #[test]
    fn running_follows_lifecycle() {
        let state = ServerState::new();
        assert!(!state.is_running());
        state.set_running();
        assert!(state.is_running());
        state.request_stop();
        state.set_stopped();
        assert!(!state.is_running());
        assert!(state.stop_requested());
    }

    async fn spawn_listener(mode: ControlMode) -> (std::net::SocketAddr, Arc<ServerState>, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = ServerState::new();
        let task = tokio::spawn(ControlListener::new(listener, Arc::clone(&state), mode).run());
        (addr, state, task)
    }

    #[tokio::test]
    async fn stop_command_sets_the_flag() {
        let (addr, state, task) = spawn_listener(ControlMode::SingleShot).await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"  StOp \r\n").await.unwrap();
        drop(client);

        task.await.unwrap();
        assert!(state.stop_requested());
    }

    #[tokio::test]
    async fn garbage_command_consumes_the_single_shot_slot() {
        let (addr, state, task) = spawn_listener(ControlMode::SingleShot).await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"halt\n").await.unwrap();
        drop(client);

        // Once the task finishes the listener socket is gone.
        task.await.unwrap();
        assert!(!state.stop_requested());
        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn silent_close_consumes_the_single_shot_slot() {
        let (addr, state, task) = spawn_listener(ControlMode::SingleShot).await;

        let client = TcpStream::connect(addr).await.unwrap();
        drop(client);

        task.await.unwrap();
        assert!(!state.stop_requested());
        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn rearming_mode_survives_garbage_until_stop() {
        let (addr, state, task) = spawn_listener(ControlMode::Rearming).await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"halt\n").await.unwrap();
        drop(client);

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"stop\n").await.unwrap();
        drop(client);

        task.await.unwrap();
        assert!(state.stop_requested());
        assert!(TcpStream::connect(addr).await.is_err());
    }
}
