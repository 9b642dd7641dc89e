//! Line-echo server.
//!
//! Run with:
//!
//! ```bash
//! cargo run --example echo_server
//! ```
//!
//! Then, from another terminal:
//!
//! ```bash
//! nc localhost 7007               # type lines, get them echoed back
//! echo stop | nc localhost 7008   # graceful shutdown
//! ```

use tcpskel::{Server, ServerConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ServerConfig::new("echo", 7007);
    let server = Server::bind(&config).await?;
    println!(
        "Echo server on {} (control on {})",
        server.local_addr(),
        server.control_addr()
    );

    server
        .run(|mut reader, mut writer| async move {
            while let Some(line) = reader.read_line().await? {
                writer.write_line(&line).await?;
            }
            Ok(())
        })
        .await?;

    println!("Server stopped");
    Ok(())
}
