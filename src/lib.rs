//! # wscore - Server-side WebSocket endpoint core
//!
//! `wscore` implements the server half of RFC 6455: a zero-frills frame
//! codec, the connection state machine that reassembles frames into
//! messages while enforcing protocol conformance, and the HTTP handshake
//! upgrader that moves a byte stream from HTTP to WebSocket. A thin
//! permessage-deflate transform (RFC 7692) is wired into the RSV1 frame
//! bit.
//!
//! ## Features
//!
//! - **Strict conformance**: every protocol violation is answered with the
//!   matching close code (1002/1007/1009/1011) before the transport goes.
//! - **Message-boundary UTF-8 validation** for text, so multi-byte
//!   sequences may straddle fragment boundaries.
//! - **Pooled connections**: managers recycle connection objects, and the
//!   deflate transform recycles its scratch buffers.
//! - **Runtime-agnostic transports**: anything `AsyncRead + AsyncWrite`.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use wscore::{ListenableManager, Upgrader, UpgradeRequest};
//!
//! let manager = ListenableManager::new()
//!     .on_message(Box::new(|conn, msg| Box::pin(async move {
//!         println!("got {} bytes", msg.len());
//!         Ok(())
//!     })));
//! let upgrader = Upgrader::new(manager);
//!
//! // From your HTTP server, once you hold the raw stream:
//! let request = UpgradeRequest::parse(&head)?;
//! upgrader.upgrade(&request, stream).await?;
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod extensions;
pub mod manager;
pub mod message;
pub mod pool;
pub mod protocol;
pub mod upgrade;

pub use config::{Config, Limits};
pub use connection::{Connection, ConnectionContext, ConnectionState};
pub use error::{Error, Result};
pub use manager::{
    ConnectionHandler, ListenableManager, Manager, MessageErrorHandler, MessageHandler,
    SimpleManager,
};
pub use message::{CloseReason, Message};
pub use protocol::{apply_mask, apply_mask_fast, Frame, OpCode};
pub use upgrade::{compute_accept_key, visit_header, UpgradeRequest, Upgrader, WS_GUID};
