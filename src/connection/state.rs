//! Connection lifecycle states (RFC 6455 Section 4 and 7).

/// WebSocket connection state.
///
/// Moves strictly forward: `Connecting → Open → Closing → Closed`. A
/// connection is created `Connecting`, enters `Open` when it is initialized
/// with a fresh transport after the handshake, enters `Closing` when a
/// close frame is sent or received, and enters `Closed` when the transport
/// is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum ConnectionState {
    /// Handshake in progress; no transport installed yet.
    #[default]
    Connecting,
    /// Open for data transfer.
    Open,
    /// Close handshake started.
    Closing,
    /// Transport released. The connection must not be read or written again.
    Closed,
}

impl ConnectionState {
    /// Whether data transfer is allowed.
    #[inline]
    #[must_use]
    pub const fn is_open(&self) -> bool {
        matches!(self, ConnectionState::Open)
    }

    /// Whether the transport has been released.
    #[inline]
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self, ConnectionState::Closed)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Open => "Open",
            ConnectionState::Closing => "Closing",
            ConnectionState::Closed => "Closed",
        };
        write!(f, "{name}")
    }
}
