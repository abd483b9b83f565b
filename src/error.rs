use std::io;

use thiserror::Error;

/// Everything that can go wrong while probing a server.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// A fixed-size read needed more bytes than the buffer had left.
    #[error("out of bounds: need {needed} bytes, have {available}")]
    OutOfBounds { needed: usize, available: usize },

    #[error("VarInt is too big")]
    VarIntTooLarge,

    /// The server answered with something the protocol does not allow here.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("invalid header: expected 0x{expected:02X}, got 0x{found:02X}")]
    InvalidHeader { expected: u8, found: u8 },

    #[error("invalid packet id: {0}")]
    InvalidPacketId(i32),

    #[error("challenge loop detected after {0} attempts")]
    ChallengeLoopDetected(usize),

    /// A request is already pending on this transport.
    #[error("socket busy")]
    SocketBusy,

    #[error("TCP timeout {0}")]
    TcpTimeout(String),

    #[error("timeout waiting for response from {0}")]
    TimeoutWaitingForResponse(String),

    #[error("failed to send packet to {addr}: {source}")]
    SendFailed {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("TCP write failed: {0}")]
    WriteFailed(#[source] io::Error),

    #[error("failed to bind local port: {0}")]
    FailedPortBind(#[source] io::Error),

    #[error("unreachable host: {0}")]
    UnreachableHost(#[source] io::Error),

    #[error("failed to receive: {0}")]
    ReceiveError(#[source] io::Error),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("malformed status JSON: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ProbeError>;
