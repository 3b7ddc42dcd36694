// A read-only TFTP server (RFC 1350) that hands the same payload to every client.
//
// A transfer begins with a read request (RRQ) sent to the server's well-known port. The server
// answers from a fresh port chosen for that client alone, and every later packet of the transfer
// travels between those two ports. Write requests are not supported.
//
// The payload is sent in blocks of 512 bytes. Each DATA packet carries one block and must be
// acknowledged before the next one is sent (stop-and-wait). A DATA packet shorter than 512 bytes
// ends the transfer, so a payload whose size is a multiple of 512 ends with an empty block.
//
// When an ACK does not arrive in time the server resends the block it is holding, byte for byte,
// until the retry budget runs out. Any ACK for a block other than the one in flight, an ERROR
// packet, or anything undecodable ends the transfer immediately.
//
// -------------------------------
// TFTP Packets (all integers big-endian)
//
// opcode   operation
// 1        Read req (RRQ)
// 2        Write req (WRQ), always rejected
// 3        Data (DATA)
// 4        ACK
// 5        ERROR
//
// RRQ:    0x01 | Filename | 0x00 | Mode | 0x00      mode must be "octet", in any case
// DATA:   0x03 | Block # (2 bytes) | Data (0-512 bytes)
// ACK:    0x04 | Block # (2 bytes)
// ERROR:  0x05 | ErrorCode (2 bytes) | ErrMsg | 0x00
//
// ----------------------------
// Error codes
//
// 0    Not defined, see msg
// 1    File not found
// 2    Access violation
// 3    Disk full / alloc exceeded
// 4    Illegal TFTP op
// 5    Unknown TID
// 6    File already exists
// 7    No such user

pub mod processor;
pub mod server;
pub mod session;
pub mod srv_conn;
pub mod tftp;

pub use server::Server;
