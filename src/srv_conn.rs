// This module contains the server-side session handler.
//
// A session starts when the dispatch loop hands over a datagram and the address it came from.
// The ServerRequestHandler then works in roughly the following stages:
//
// 1. Open an endpoint on a fresh port that only talks to the requesting client, and check that
//    the datagram is a read request we can serve. If it isn't, the client gets one error packet
//    and the session ends there.
// 2. Enter a cycle of send and wait. Each DATA block is sent and the handler waits for the
//    matching ACK. On timeout the very same bytes are sent again until the retry budget for the
//    block is spent.
// 3. The session completes once the final (short) block is acknowledged. Any unexpected reply
//    ends it immediately without sending anything else.
//
// The endpoint is owned by the handler, so it is closed whichever way the session ends.

use crate::processor::{ReadProcessor, ResultAction};
use crate::session::SessionState;
use crate::tftp;
use std::error;
use std::fmt;
use std::io::Cursor;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// An object responsible for handling a request.
pub struct ServerRequestHandler {
    /// The endpoint connected to the client.
    sock: tftp::TftpSocket,

    /// Where the session starts off.
    state: SessionState,

    /// The packet processor.
    processor: ReadProcessor<Cursor<Arc<[u8]>>>,
}

async fn send_error_packet(sock: &tftp::TftpSocket, code: tftp::ErrorCode, message: String) {
    // Error packet is sent as a courtesy, we don't care how it goes.
    if let Err(e) = sock.send_packet(&tftp::Packet::Error { code, message }).await {
        log::debug!("Unable to send error packet: {e}");
    }
}

impl ServerRequestHandler {
    /// Validates the initial request from `src` and prepares to serve it `payload`.
    pub async fn new(
        payload: Arc<[u8]>,
        initial_request: &[u8],
        src: SocketAddr,
        retries: u8,
        timeout: Duration,
    ) -> Result<ServerRequestHandler, SessionError> {
        let client = src.to_string();
        let sock = tftp::TftpSocket::connect(src)?;

        match tftp::Packet::decode_read_req(initial_request) {
            Ok(tftp::Packet::ReadReq { path, .. }) => {
                log::info!("[{client}] requested file: {path}");
            }
            Ok(other) => {
                return Err(SessionError::Internal(format!("decoded {:?} as a read request", other.op_code())));
            }
            Err(e) => {
                log::warn!("[{client}] invalid request: {e}");
                send_error_packet(&sock, tftp::ErrorCode::IllegalOperation, e.to_string()).await;
                return Err(SessionError::BadRequest { client, source: e });
            }
        }

        Ok(ServerRequestHandler {
            sock,
            state: SessionState::new(client, retries, timeout),
            processor: ReadProcessor::new(Cursor::new(payload)),
        })
    }

    /// Does the work of sending blocks and receiving acknowledgments until the session ends.
    pub async fn handle(mut self) -> Result<(), SessionError> {
        let mut state = self.state.clone();

        loop {
            let out_packet = self.processor.next_block(state.block).await?;

            // Retransmissions spend from a copy, so every block starts with the full budget.
            let mut attempt = state.clone();
            loop {
                self.sock.send(&out_packet).await?;

                match self.sock.recv_with_timeout(attempt.timeout).await {
                    Ok(reply) => match self.processor.process_reply(&state.client_id, state.block, &reply) {
                        ResultAction::SendNextBlock => break,
                        ResultAction::CloseConnection => return Ok(()),
                        ResultAction::Abort(e) => return Err(e),
                    },
                    Err(tftp::SocketError::Timeout(_)) => {
                        log::debug!(
                            "[{}] timed out waiting for ack of block {}, {} retries left",
                            state.client_id,
                            state.block,
                            attempt.retries
                        );
                        attempt = attempt.consume_retry()?;
                    }
                    Err(e) => return Err(e.into()),
                }
            }

            state = state.advance_block();
        }
    }
}

/// Why a session ended before the client had the whole payload.
#[derive(Debug)]
pub enum SessionError {
    /// The initial datagram was not a read request we can serve.
    BadRequest { client: String, source: tftp::PacketError },
    RetriesExhausted { client: String, block: u16 },
    UnexpectedAck { client: String, expected: u16, got: u16 },
    /// The client sent an error packet.
    PeerError { client: String, code: tftp::ErrorCode, message: String },
    /// The client sent something that is neither an ACK nor an ERROR.
    BadPacket { client: String, len: usize },
    Socket(tftp::SocketError),
    Io(std::io::Error),
    Internal(String),
}

impl error::Error for SessionError {}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::BadRequest { client, source } => write!(f, "[{client}] invalid request: {source}"),
            Self::RetriesExhausted { client, block } => {
                write!(f, "[{client}] retries exhausted sending block {block}")
            }
            Self::UnexpectedAck { client, expected, got } => {
                write!(f, "[{client}] unexpected block acked: {got} instead of {expected}")
            }
            Self::PeerError { client, code, message } => {
                write!(f, "[{client}] received error message: {code:?}: {message}")
            }
            Self::BadPacket { client, len } => write!(f, "[{client}] bad packet of {len} bytes"),
            Self::Socket(e) => write!(f, "{e}"),
            Self::Io(e) => write!(f, "Payload IO error: {e}"),
            Self::Internal(msg) => write!(f, "Internal error: {msg}"),
        }
    }
}

impl From<tftp::SocketError> for SessionError {
    fn from(e: tftp::SocketError) -> SessionError {
        SessionError::Socket(e)
    }
}

impl From<std::io::Error> for SessionError {
    fn from(e: std::io::Error) -> SessionError {
        SessionError::Io(e)
    }
}
