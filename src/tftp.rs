use async_io::Async;
use std::error;
use std::fmt;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::error::Elapsed;
use tokio::time::timeout;

/// Maximum number of payload bytes carried by a single DATA packet.
pub const BLOCK_SIZE: usize = 512;

/// Maximum size of any datagram exchanged by the server: a DATA header plus a full block.
pub const DATAGRAM_SIZE: usize = BLOCK_SIZE + 4;

/// The only transfer mode this server speaks.
pub const OCTET_MODE: &str = "octet";

///////////////////////////////////////////////////////////////
// Error-handling objects

/// Describes why a buffer could not be decoded as the packet kind that was expected.
#[derive(Debug, PartialEq)]
pub enum PacketError {
    InvalidRequest(String),
    InvalidData(String),
    InvalidAck(String),
    InvalidError(String),
    /// The opcode is unknown or names an operation this server never accepts.
    Unsupported(u16),
}

impl error::Error for PacketError {}

impl fmt::Display for PacketError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PacketError::InvalidRequest(msg) => write!(f, "invalid RRQ: {msg}"),
            PacketError::InvalidData(msg) => write!(f, "invalid DATA: {msg}"),
            PacketError::InvalidAck(msg) => write!(f, "invalid ACK: {msg}"),
            PacketError::InvalidError(msg) => write!(f, "invalid ERROR: {msg}"),
            PacketError::Unsupported(code) => write!(f, "unsupported opcode: {code}"),
        }
    }
}

/// Represents an error returned from the TFTP Socket handler
#[derive(Debug)]
pub enum SocketError {
    IO(io::Error),
    Timeout(Elapsed),
}

impl error::Error for SocketError {}

impl fmt::Display for SocketError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SocketError::IO(e) => write!(f, "Socket IO error: {e}"),
            SocketError::Timeout(e) => write!(f, "Socket IO timeout: {e}"),
        }
    }
}

impl From<io::Error> for SocketError {
    fn from(e: io::Error) -> Self {
        SocketError::IO(e)
    }
}

impl From<Elapsed> for SocketError {
    fn from(e: Elapsed) -> Self {
        SocketError::Timeout(e)
    }
}

pub type TftpResult<T> = Result<T, SocketError>;

/// The operation carried in the first two bytes of every packet.
#[derive(Debug, Clone, Copy, PartialEq)]
#[repr(u16)]
pub enum OpCode {
    Rrq = 1,
    /// Reserved. Never produced, and rejected wherever it is seen.
    Wrq = 2,
    Data = 3,
    Ack = 4,
    Error = 5,
}

/// Utility function for obtaining the TFTP OpCode from the start of a buffer
fn retrieve_op_code(buf: &[u8]) -> Result<OpCode, PacketError> {
    let rawcode = u16_from_buffer(buf);
    match rawcode {
        1 => Ok(OpCode::Rrq),
        2 => Ok(OpCode::Wrq),
        3 => Ok(OpCode::Data),
        4 => Ok(OpCode::Ack),
        5 => Ok(OpCode::Error),
        _ => Err(PacketError::Unsupported(rawcode)),
    }
}

/// Represents a TFTP Error code surfaced by a TFTP Error packet
#[derive(Debug, Clone, Copy, PartialEq)]
#[repr(u16)]
pub enum ErrorCode {
    Undefined = 0,
    FileNotFound = 1,
    AccessViolation = 2,
    DiskFull = 3,
    IllegalOperation = 4,
    UnknownTid = 5,
    FileAlreadyExists = 6,
    NoSuchUser = 7,
}

impl From<u16> for ErrorCode {
    fn from(raw: u16) -> ErrorCode {
        match raw {
            1 => ErrorCode::FileNotFound,
            2 => ErrorCode::AccessViolation,
            3 => ErrorCode::DiskFull,
            4 => ErrorCode::IllegalOperation,
            5 => ErrorCode::UnknownTid,
            6 => ErrorCode::FileAlreadyExists,
            7 => ErrorCode::NoSuchUser,
            _ => ErrorCode::Undefined,
        }
    }
}

/// An enum representing a TFTP packet and its associated data.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    /// A read request packet
    ReadReq {
        /// The file the client asked for. Only logged; every client gets the same payload.
        path: String,

        /// The transfer mode, lower-cased once decoded.
        mode: String,
    },

    /// A data packet
    Data {
        /// The block number for this data packet.
        block: u16,

        /// The contents of the data itself.
        data: Vec<u8>,
    },

    /// An acknowledgment packet
    Ack {
        /// The block being acknowledged.
        block: u16,
    },

    /// An error packet.
    Error {
        code: ErrorCode,
        message: String,
    },
}

fn u16_from_buffer(buf: &[u8]) -> u16 {
    u16::from_be_bytes([buf[0], buf[1]])
}

/// Given a buffer, assumes the string begins at the beginning of the buffer and runs until a 0
/// byte.
///
/// Returns the string and the position of its terminator, or `None` if the buffer holds no
/// terminator at all.
fn string_from_buffer(buf: &[u8]) -> Option<(String, usize)> {
    let end = buf.iter().position(|&c| c == 0x00)?;
    Some((String::from_utf8_lossy(&buf[..end]).into_owned(), end))
}

fn push_string(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(s.as_bytes());
    buf.push(0x00);
}

impl Packet {
    pub fn op_code(&self) -> OpCode {
        match self {
            Packet::ReadReq { .. } => OpCode::Rrq,
            Packet::Data { .. } => OpCode::Data,
            Packet::Ack { .. } => OpCode::Ack,
            Packet::Error { .. } => OpCode::Error,
        }
    }

    /// Serializes the packet into its big-endian wire layout.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(DATAGRAM_SIZE);
        buf.extend_from_slice(&(self.op_code() as u16).to_be_bytes());

        match self {
            Packet::ReadReq { path, mode } => {
                push_string(&mut buf, path);
                push_string(&mut buf, if mode.is_empty() { OCTET_MODE } else { mode.as_str() });
            }
            Packet::Data { block, data } => {
                buf.extend_from_slice(&block.to_be_bytes());
                buf.extend_from_slice(data);
            }
            Packet::Ack { block } => buf.extend_from_slice(&block.to_be_bytes()),
            Packet::Error { code, message } => {
                buf.extend_from_slice(&(*code as u16).to_be_bytes());
                push_string(&mut buf, message);
            }
        }

        buf
    }

    pub fn decode_read_req(buf: &[u8]) -> Result<Packet, PacketError> {
        let invalid = |msg: &str| PacketError::InvalidRequest(msg.to_string());

        if buf.len() < 2 || u16_from_buffer(buf) != OpCode::Rrq as u16 {
            return Err(invalid("not a read request"));
        }

        let (path, path_end) = string_from_buffer(&buf[2..])
            .ok_or_else(|| invalid("filename must be terminated with a null byte"))?;
        if path.is_empty() {
            return Err(invalid("filename is empty"));
        }

        let (raw_mode, _) = string_from_buffer(&buf[2 + path_end + 1..])
            .ok_or_else(|| invalid("mode must be terminated with a null byte"))?;

        let mode = raw_mode.to_lowercase();
        if mode != OCTET_MODE {
            return Err(invalid(&format!("only binary transfers supported, got mode '{raw_mode}'")));
        }

        Ok(Packet::ReadReq { path, mode })
    }

    pub fn decode_data(buf: &[u8]) -> Result<Packet, PacketError> {
        if buf.len() < 4 || buf.len() > DATAGRAM_SIZE {
            return Err(PacketError::InvalidData(format!("bad length {}", buf.len())));
        }
        if u16_from_buffer(buf) != OpCode::Data as u16 {
            return Err(PacketError::InvalidData("not a data packet".to_string()));
        }

        Ok(Packet::Data { block: u16_from_buffer(&buf[2..4]), data: Vec::from(&buf[4..]) })
    }

    pub fn decode_ack(buf: &[u8]) -> Result<Packet, PacketError> {
        if buf.len() != 4 {
            return Err(PacketError::InvalidAck(format!("bad length {}", buf.len())));
        }
        if u16_from_buffer(buf) != OpCode::Ack as u16 {
            return Err(PacketError::InvalidAck("not an ack packet".to_string()));
        }

        Ok(Packet::Ack { block: u16_from_buffer(&buf[2..4]) })
    }

    pub fn decode_error(buf: &[u8]) -> Result<Packet, PacketError> {
        if buf.len() < 4 || u16_from_buffer(buf) != OpCode::Error as u16 {
            return Err(PacketError::InvalidError("not an error packet".to_string()));
        }

        let code = ErrorCode::from(u16_from_buffer(&buf[2..4]));
        let (message, _) = string_from_buffer(&buf[4..])
            .ok_or_else(|| PacketError::InvalidError("message must be terminated with a null byte".to_string()))?;

        Ok(Packet::Error { code, message })
    }

    /// Decodes any packet kind by looking at its opcode first.
    pub fn parse_from_buf(buf: &[u8]) -> Result<Packet, PacketError> {
        if buf.len() < 2 {
            return Err(PacketError::Unsupported(0));
        }

        match retrieve_op_code(buf)? {
            OpCode::Rrq => Packet::decode_read_req(buf),
            OpCode::Wrq => Err(PacketError::Unsupported(OpCode::Wrq as u16)),
            OpCode::Data => Packet::decode_data(buf),
            OpCode::Ack => Packet::decode_ack(buf),
            OpCode::Error => Packet::decode_error(buf),
        }
    }
}

/// Reads one block from the source.
///
/// A single call to read may return fewer bytes than asked for without the source being
/// exhausted, so this keeps reading into the remainder of the buffer until it is full or the
/// source reports EOF.
async fn read_block<R: AsyncRead + Unpin>(src: &mut R) -> io::Result<Vec<u8>> {
    let mut buf = vec![0_u8; BLOCK_SIZE];
    let mut cursor = 0;

    while cursor < buf.len() {
        match src.read(&mut buf[cursor..]).await? {
            0 => break,
            s => cursor += s,
        }
    }

    buf.truncate(cursor);
    Ok(buf)
}

/// Encodes the DATA packet for `block` using the next block of `src`.
///
/// Returns the encoded packet and whether it is the final block of the transfer, i.e. the
/// source ran dry before a whole block could be read. A source whose length is an exact
/// multiple of the block size therefore ends with an empty final block.
pub async fn encode_data<R: AsyncRead + Unpin>(block: u16, src: &mut R) -> io::Result<(Vec<u8>, bool)> {
    let data = read_block(src).await?;
    let last = data.len() < BLOCK_SIZE;
    Ok((Packet::Data { block, data }.encode(), last))
}

///////////////////////////////////////////////////////////////
/// Wrapper around a UDP socket that sends and receives TFTP datagrams.
///
/// A socket is either a listener, receiving requests from anyone with `recv_from`, or a
/// session endpoint created with `connect`, which only exchanges datagrams with one peer.
pub struct TftpSocket {
    sock: Async<UdpSocket>,
}

impl TftpSocket {
    pub fn bind(addr: SocketAddr) -> TftpResult<TftpSocket> {
        Ok(TftpSocket {
            sock: Async::<UdpSocket>::bind(addr)?,
        })
    }

    /// Opens an endpoint on an ephemeral local port that is scoped to `peer`.
    pub fn connect(peer: SocketAddr) -> TftpResult<TftpSocket> {
        let local: SocketAddr = match peer {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        let sock = UdpSocket::bind(local)?;
        sock.connect(peer)?;

        Ok(TftpSocket { sock: Async::new(sock)? })
    }

    pub fn local_addr(&self) -> TftpResult<SocketAddr> {
        Ok(self.sock.get_ref().local_addr()?)
    }

    /// Waits for the next datagram from any sender.
    pub async fn recv_from(&self) -> TftpResult<(Vec<u8>, SocketAddr)> {
        let mut buf = [0; DATAGRAM_SIZE];
        let (n, src) = self.sock.recv_from(&mut buf).await?;
        Ok((buf[..n].to_vec(), src))
    }

    /// Sends raw bytes to the connected peer.
    pub async fn send(&self, buf: &[u8]) -> TftpResult<()> {
        self.sock.send(buf).await?;
        Ok(())
    }

    pub async fn send_packet(&self, packet: &Packet) -> TftpResult<()> {
        self.send(&packet.encode()).await
    }

    /// Waits at most `ttl` for the next datagram from the connected peer.
    pub async fn recv_with_timeout(&self, ttl: Duration) -> TftpResult<Vec<u8>> {
        let mut buf = [0; DATAGRAM_SIZE];
        let n = timeout(ttl, self.sock.recv(&mut buf)).await??;
        Ok(buf[..n].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_read_req() {
        let buf = vec![
            // opcode
            0x00, 0x01,
            // path: /path/to/data.txt with terminating nullchar
            0x2F, 0x70, 0x61, 0x74, 0x68, 0x2F, 0x74, 0x6F, 0x2F, 0x64, 0x61, 0x74, 0x61, 0x2E, 0x74, 0x78, 0x74, 0x00,
            // mode: OcTeT
            0x4F, 0x63, 0x54, 0x65, 0x54, 0x00];

        assert_eq!(
            Packet::decode_read_req(&buf),
            Ok(Packet::ReadReq { path: "/path/to/data.txt".to_string(), mode: "octet".to_string() })
        );
    }

    #[test]
    fn test_read_req_encoding_defaults_to_octet() {
        let packet = Packet::ReadReq { path: "a.svg".to_string(), mode: String::new() };
        assert_eq!(packet.encode(), b"\x00\x01a.svg\x00octet\x00".to_vec());
    }

    #[test]
    fn test_read_req_failures() {
        // Write requests are never accepted
        assert!(Packet::decode_read_req(b"\x00\x02a.svg\x00octet\x00").is_err());
        // Empty filename
        assert!(Packet::decode_read_req(b"\x00\x01\x00octet\x00").is_err());
        // Missing mode string
        assert!(Packet::decode_read_req(b"\x00\x01hi\x00").is_err());
        // Mode not terminated
        assert!(Packet::decode_read_req(b"\x00\x01hi\x00octet").is_err());
        // Text transfers are not supported
        assert_eq!(
            Packet::decode_read_req(b"\x00\x01hi\x00netascii\x00"),
            Err(PacketError::InvalidRequest("only binary transfers supported, got mode 'netascii'".to_string()))
        );
    }

    #[test]
    fn test_packet_parses_data() {
        let buf = vec![
            // opcode
            0x00, 0x03,
            // block number
            0x12, 0x34,
            // data
            0xDE, 0xAD, 0xBE, 0xEF];

        assert_eq!(
            Packet::decode_data(&buf),
            Ok(Packet::Data { block: 0x1234, data: vec![0xDE, 0xAD, 0xBE, 0xEF] })
        );
    }

    #[test]
    fn test_data_failures() {
        assert!(Packet::decode_data(&[0x00, 0x03, 0x00]).is_err());
        assert!(Packet::decode_data(&[0x00, 0x04, 0x00, 0x01]).is_err());

        let mut oversized = vec![0x00, 0x03, 0x00, 0x01];
        oversized.extend_from_slice(&[0xAA; BLOCK_SIZE + 1]);
        assert!(matches!(Packet::decode_data(&oversized), Err(PacketError::InvalidData(_))));
    }

    #[test]
    fn test_packet_parses_ack() {
        let buf = vec![0x00, 0x04, 0x10, 0x2f];
        assert_eq!(Packet::decode_ack(&buf), Ok(Packet::Ack { block: 0x102f }));
    }

    #[test]
    fn test_ack_failures() {
        assert!(Packet::decode_ack(&[0x00, 0x04, 0x00]).is_err());
        assert!(Packet::decode_ack(&[0x00, 0x04, 0x00, 0x01, 0x00]).is_err());
        assert!(matches!(Packet::decode_ack(&[0x00, 0x03, 0x00, 0x01]), Err(PacketError::InvalidAck(_))));
    }

    #[test]
    fn test_packet_parses_error() {
        let buf = vec![
            // opcode
            0x00, 0x05,
            // Error code
            0x00, 0x04,
            // Error message: Illegal!
            0x49, 0x6C, 0x6C, 0x65, 0x67, 0x61, 0x6C, 0x21, 0x00];

        assert_eq!(
            Packet::decode_error(&buf),
            Ok(Packet::Error { code: ErrorCode::IllegalOperation, message: "Illegal!".to_string() })
        );
        assert!(matches!(Packet::decode_error(&buf[..buf.len() - 1]), Err(PacketError::InvalidError(_))));
        assert!(matches!(Packet::decode_error(&[0x00, 0x04, 0x00, 0x01]), Err(PacketError::InvalidError(_))));
    }

    #[test]
    fn test_round_trips() {
        let packets = vec![
            Packet::ReadReq { path: "payload.svg".to_string(), mode: "octet".to_string() },
            Packet::Data { block: 65535, data: vec![0x42; BLOCK_SIZE] },
            Packet::Data { block: 7, data: vec![] },
            Packet::Ack { block: 513 },
            Packet::Error { code: ErrorCode::NoSuchUser, message: "who?".to_string() },
        ];

        for packet in packets {
            assert_eq!(Packet::parse_from_buf(&packet.encode()), Ok(packet));
        }
    }

    #[test]
    fn test_packet_parse_failures() {
        // Invalid opcodes
        assert!(Packet::parse_from_buf(&[0x10]).is_err());
        assert!(Packet::parse_from_buf(&[0x10, 0x00]).is_err());
        assert!(Packet::parse_from_buf(&[0x00, 0x09]).is_err());
        assert_eq!(
            Packet::parse_from_buf(b"\x00\x02a.svg\x00octet\x00"),
            Err(PacketError::Unsupported(2))
        );
    }

    #[tokio::test]
    async fn test_encode_data_final_block() {
        let mut src: &[u8] = b"testing";
        let (packet, last) = encode_data(1, &mut src).await.unwrap();
        assert!(last);
        assert_eq!(packet, b"\x00\x03\x00\x01testing".to_vec());
    }

    #[tokio::test]
    async fn test_encode_data_exact_multiple_ends_with_empty_block() {
        let payload = vec![0x78; BLOCK_SIZE];
        let mut src: &[u8] = &payload;

        let (first, last) = encode_data(1, &mut src).await.unwrap();
        assert!(!last);
        assert_eq!(first.len(), DATAGRAM_SIZE);

        let (second, last) = encode_data(2, &mut src).await.unwrap();
        assert!(last);
        assert_eq!(second, vec![0x00, 0x03, 0x00, 0x02]);
    }

    #[tokio::test]
    async fn test_encode_data_continues_short_reads() {
        let mut src = tokio_test::io::Builder::new()
            .read(&[0x61; 100])
            .read(&[0x62; 300])
            .read(&[0x63; 200])
            .build();

        let (packet, last) = encode_data(1, &mut src).await.unwrap();
        assert!(!last);
        assert_eq!(packet.len(), DATAGRAM_SIZE);
        assert_eq!(&packet[4..104], &[0x61; 100][..]);
        assert_eq!(&packet[404..], &[0x63; 112][..]);

        let (packet, last) = encode_data(2, &mut src).await.unwrap();
        assert!(last);
        assert_eq!(&packet[4..], &[0x63; 88][..]);
    }
}
