use crate::srv_conn::{ServerRequestHandler, SessionError};
use crate::tftp::{SocketError, TftpSocket};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// Retransmissions allowed per block unless configured otherwise.
pub const DEFAULT_RETRIES: u8 = 10;

/// How long a session waits for each acknowledgment unless configured otherwise.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(6);

/// Serves one fixed payload to every client that asks for a file.
#[derive(Debug, Clone)]
pub struct Server {
    payload: Arc<[u8]>,
    retries: u8,
    timeout: Duration,
}

impl Server {
    pub fn new(payload: impl Into<Arc<[u8]>>) -> Server {
        Server {
            payload: payload.into(),
            retries: DEFAULT_RETRIES,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_retries(self, retries: u8) -> Server {
        Server { retries, ..self }
    }

    pub fn with_timeout(self, timeout: Duration) -> Server {
        Server { timeout, ..self }
    }

    /// Binds a socket at `addr` and serves requests arriving on it.
    ///
    /// Only returns if the listening socket fails.
    pub async fn run(&self, addr: SocketAddr) -> Result<(), SocketError> {
        let sock = TftpSocket::bind(addr)?;
        log::info!("Listening on {} ...", sock.local_addr()?);
        self.serve(sock).await
    }

    /// Waits for requests on `sock` and starts an independent session for each one.
    ///
    /// Only returns if reading from `sock` fails.
    pub async fn serve(&self, sock: TftpSocket) -> Result<(), SocketError> {
        loop {
            let (msg, src) = sock.recv_from().await?;
            log::debug!("Got {} bytes from {src}", msg.len());

            tokio::spawn(run_session(self.clone(), msg, src));
        }
    }
}

async fn run_session(server: Server, msg: Vec<u8>, src: SocketAddr) {
    match serve_client(server, &msg, src).await {
        Ok(()) => log::info!("[{src}] session ended"),
        Err(e) => log::warn!("{e}"),
    }
}

async fn serve_client(server: Server, msg: &[u8], src: SocketAddr) -> Result<(), SessionError> {
    ServerRequestHandler::new(server.payload, msg, src, server.retries, server.timeout)
        .await?
        .handle()
        .await
}
