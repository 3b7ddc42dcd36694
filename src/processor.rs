use crate::srv_conn::SessionError;
use crate::tftp;
use tokio::io::{self, AsyncRead};

/// Represents an action that the caller of ReadProcessor should take in
/// response to processing a reply from the client.
#[derive(Debug)]
pub enum ResultAction {
    /// The block in flight was acknowledged and there is more to send.
    SendNextBlock,

    /// The final block was acknowledged. Nothing more to send.
    CloseConnection,

    /// The session must end without sending anything else.
    Abort(SessionError),
}

/// Produces the DATA packets for one transfer and decides what each reply from the client
/// means for it.
#[derive(Debug)]
pub struct ReadProcessor<R> {
    src: R,
    awaiting_final_ack: bool,
}

impl<R: AsyncRead + Unpin> ReadProcessor<R> {
    pub fn new(src: R) -> ReadProcessor<R> {
        ReadProcessor {
            src,
            awaiting_final_ack: false,
        }
    }

    /// Encodes the DATA packet for `block` from the next chunk of the source.
    pub async fn next_block(&mut self, block: u16) -> Result<Vec<u8>, io::Error> {
        let (packet, last) = tftp::encode_data(block, &mut self.src).await?;
        self.awaiting_final_ack = last;
        Ok(packet)
    }

    /// Whether the most recently encoded block was the last one.
    pub fn awaiting_final_ack(&self) -> bool {
        self.awaiting_final_ack
    }

    /// Given the raw reply to the DATA packet for `block`, describes the action the caller
    /// should take.
    pub fn process_reply(&self, client: &str, block: u16, buf: &[u8]) -> ResultAction {
        if let Ok(tftp::Packet::Ack { block: acked }) = tftp::Packet::decode_ack(buf) {
            return if acked != block {
                ResultAction::Abort(SessionError::UnexpectedAck {
                    client: client.to_string(),
                    expected: block,
                    got: acked,
                })
            } else if self.awaiting_final_ack {
                ResultAction::CloseConnection
            } else {
                ResultAction::SendNextBlock
            };
        }

        if let Ok(tftp::Packet::Error { code, message }) = tftp::Packet::decode_error(buf) {
            return ResultAction::Abort(SessionError::PeerError {
                client: client.to_string(),
                code,
                message,
            });
        }

        ResultAction::Abort(SessionError::BadPacket {
            client: client.to_string(),
            len: buf.len(),
        })
    }
}
