//! # tcpskel
//!
//! A minimal extensible async TCP server skeleton: accept connections on a
//! primary port, hand each one to your handler, and shut the whole thing down
//! gracefully with a one-line `stop` command on a dedicated control port at
//! `port + 1`.
//!
//! The per-connection protocol is yours; the crate only owns the
//! dual-listener lifecycle. Diagnostics are emitted as [`tracing`] events —
//! wire up whatever subscriber suits your deployment.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tcpskel::{Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::new("echo", 7007);
//!     let server = Server::bind(&config).await?;
//!     println!("Listening on {}", server.local_addr());
//!     server
//!         .run(|mut reader, mut writer| async move {
//!             while let Some(line) = reader.read_line().await? {
//!                 writer.write_line(&line).await?;
//!             }
//!             Ok(())
//!         })
//!         .await?;
//!     Ok(())
//! }
//! ```
//!
//! To stop the server from a shell: `echo stop | nc <host> 7008`. The control
//! listener accepts a single connection per server lifetime by default; see
//! [`ControlMode`] for the re-arming variant.

pub mod config;
pub mod conn;
pub mod control;
pub mod server;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use config::{ConfigError, ServerConfig};
pub use conn::{ConnReader, ConnWriter, HandlerError};
pub use control::{ControlMode, ServerState};
pub use server::{Server, ServerError};
