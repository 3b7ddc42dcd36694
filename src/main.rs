use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tftpd::server::{DEFAULT_RETRIES, DEFAULT_TIMEOUT};
use tftpd::Server;

/// Serves a single file over TFTP to any client that asks for it.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Listen address.
    #[arg(short, long, default_value = "127.0.0.1:69")]
    address: SocketAddr,

    /// File to serve to clients.
    #[arg(short, long, default_value = "payload.svg")]
    payload: PathBuf,

    /// Retransmissions allowed per block.
    #[arg(short, long, default_value_t = DEFAULT_RETRIES)]
    retries: u8,

    /// How long to wait for each acknowledgment, in milliseconds.
    #[arg(short, long, default_value_t = DEFAULT_TIMEOUT.as_millis() as u64)]
    timeout_ms: u64,
}

async fn read_payload(path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .with_context(|| format!("reading payload {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let dir = std::env::current_dir().context("resolving working directory")?;
    log::info!("Start. Working directory: {}", dir.display());

    let payload = read_payload(&args.payload).await?;
    let server = Server::new(payload)
        .with_retries(args.retries)
        .with_timeout(Duration::from_millis(args.timeout_ms));

    // Dropping the serving future closes the listening socket.
    tokio::select! {
        res = server.run(args.address) => {
            if let Err(e) = res {
                log::error!("Server finished with error: {e}");
            }
        }
        _ = tokio::signal::ctrl_c() => log::info!("Shutting down"),
    }

    Ok(())
}
