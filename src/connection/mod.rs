//! Connection state machine and lifecycle.
//!
//! A connection is created by the upgrader (or retrieved from a manager
//! pool), initialized with a fresh transport, driven by either the user or
//! a manager loop, and on close is reset and returned to the pool.

#[allow(clippy::module_inception)]
mod connection;
mod state;

pub use connection::{Connection, ConnectionContext};
pub use state::ConnectionState;
