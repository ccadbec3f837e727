//! Error types for the WebSocket endpoint core.
//!
//! The variants map one-to-one onto the close-code policy of RFC 6455:
//! protocol violations answer with 1002, invalid UTF-8 with 1007, oversized
//! messages with 1009, and unexpected runtime failures with 1011. The state
//! machine decides the semantic; the codec only reports what it saw.

use thiserror::Error;

/// Result type alias for WebSocket operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during WebSocket operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Violation of the framing or fragmentation rules of RFC 6455.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// Frame opcode outside {0, 1, 2, 8, 9, 10}.
    #[error("invalid opcode: {0:#x}")]
    InvalidOpcode(u8),

    /// Client frame arrived without a masking key.
    #[error("client frame is missing the masking key")]
    MissingMaskingKey,

    /// Text payload or close reason is not valid UTF-8.
    #[error("invalid UTF-8 in text payload")]
    InvalidUtf8,

    /// Peer close code outside the allowed set.
    #[error("close code {0} is not allowed on the wire")]
    WrongClosingCode(u16),

    /// The buffer ended before the frame did. Recoverable: read more bytes
    /// and decode again.
    #[error("unexpected end of packet: need {needed} more bytes")]
    UnexpectedEndOfPacket {
        /// Number of additional bytes needed.
        needed: usize,
    },

    /// Assembled message exceeds the configured maximum.
    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge {
        /// Actual message size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Handshake data exceeds the configured maximum.
    #[error("handshake too large: {size} bytes (max: {max})")]
    HandshakeTooLarge {
        /// Actual handshake size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// The connection has started its close handshake.
    #[error("connection is closing")]
    ConnectionClosing,

    /// The transport has been released.
    #[error("connection is closed")]
    ConnectionClosed,

    /// HTTP-level rejection during the upgrade handshake.
    #[error("handshake rejected ({status}): {reason}")]
    Handshake {
        /// HTTP status sent to the client.
        status: u16,
        /// Plain-text reason sent to the client.
        reason: String,
    },

    /// Compression or decompression failure.
    #[error("deflate error: {0}")]
    Deflate(String),

    /// Transport-level failure, including deadline expiry.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Uncaught runtime failure inside a manager loop.
    #[error("unexpected failure in connection loop: {0}")]
    Unexpected(String),
}

impl Error {
    /// Whether this error means the decoder ran out of bytes and the caller
    /// may read more and retry.
    #[must_use]
    pub const fn is_unexpected_end_of_packet(&self) -> bool {
        matches!(self, Error::UnexpectedEndOfPacket { .. })
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(_: std::str::Utf8Error) -> Self {
        Error::InvalidUtf8
    }
}
