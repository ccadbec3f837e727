//! Configuration and limits for WebSocket connections.

use std::time::Duration;

/// Resource limits for a connection.
///
/// These bound memory usage during reassembly and handshake parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    /// Maximum size of a complete message in bytes, measured after
    /// reassembling all fragments (and after inflation when compressed).
    ///
    /// Default: 64 MB (64 * 1024 * 1024)
    pub max_message_size: usize,

    /// Maximum size of handshake data in bytes.
    ///
    /// Default: 8 KB (8192)
    pub max_handshake_size: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_message_size: 64 * 1024 * 1024,
            max_handshake_size: 8192,
        }
    }
}

impl Limits {
    /// Create new limits with custom values.
    #[must_use]
    pub const fn new(max_message_size: usize, max_handshake_size: usize) -> Self {
        Self {
            max_message_size,
            max_handshake_size,
        }
    }

    /// Validate that a message size is within limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MessageTooLarge`](crate::Error::MessageTooLarge) if
    /// `size` exceeds the configured maximum.
    pub const fn check_message_size(&self, size: usize) -> Result<(), crate::Error> {
        if size > self.max_message_size {
            Err(crate::Error::MessageTooLarge {
                size,
                max: self.max_message_size,
            })
        } else {
            Ok(())
        }
    }

    /// Validate that a handshake size is within limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HandshakeTooLarge`](crate::Error::HandshakeTooLarge)
    /// if `size` exceeds the configured maximum.
    pub const fn check_handshake_size(&self, size: usize) -> Result<(), crate::Error> {
        if size > self.max_handshake_size {
            Err(crate::Error::HandshakeTooLarge {
                size,
                max: self.max_handshake_size,
            })
        } else {
            Ok(())
        }
    }
}

/// WebSocket connection configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Resource limits.
    pub limits: Limits,

    /// Read buffer size in bytes. Also the growth increment when a frame
    /// spans more than one transport read.
    ///
    /// Default: 8 KB (8192)
    pub read_buffer_size: usize,

    /// Deadline for writing the pong reply to an incoming ping.
    ///
    /// Default: 10 ms
    pub pong_write_timeout: Duration,

    /// Deadline applied by the listenable manager to each message read.
    /// `None` disables the deadline.
    ///
    /// Default: None
    pub read_timeout: Option<Duration>,

    /// Accept unmasked frames from clients.
    ///
    /// RFC 6455 requires clients to mask all frames. Setting this to `true`
    /// violates the RFC but is useful for testing with canned byte
    /// sequences.
    ///
    /// Default: false
    pub accept_unmasked_frames: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            limits: Limits::default(),
            read_buffer_size: 8192,
            pong_write_timeout: Duration::from_millis(10),
            read_timeout: None,
            accept_unmasked_frames: false,
        }
    }
}

impl Config {
    /// Create a new configuration with default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set custom limits.
    #[must_use]
    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Set the read buffer size.
    #[must_use]
    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    /// Set the per-read deadline used by the listenable manager.
    #[must_use]
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    /// Accept unmasked client frames (testing only).
    #[must_use]
    pub fn with_accept_unmasked_frames(mut self, accept: bool) -> Self {
        self.accept_unmasked_frames = accept;
        self
    }
}
