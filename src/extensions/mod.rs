//! Frame-level extensions negotiated during the upgrade handshake.
//!
//! Only permessage-deflate is supported; it is wired into the RSV1 frame
//! bit and negotiated with `server_no_context_takeover;
//! client_no_context_takeover` on both sides.

pub mod deflate;

pub use deflate::{deflate, inflate};
