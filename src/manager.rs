//! Connection managers: the component that owns a connection's lifecycle
//! after the upgrade.
//!
//! Two variants, mirroring how much control the embedder wants:
//!
//! - [`SimpleManager`] hands the initialized connection to a single handler
//!   which owns the read loop.
//! - [`ListenableManager`] drives the read loop itself and fans events out
//!   to `on_connect` / `on_message` / `on_close` / `on_message_error`
//!   callbacks, converting any panic in the loop into a 1011 close.
//!
//! Both acquire connection objects from a pool and return them after a
//! reset, so steady-state accepts allocate nothing.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

use crate::config::Config;
use crate::connection::{Connection, ConnectionContext};
use crate::error::{Error, Result};
use crate::message::{CloseReason, Message};
use crate::pool::Pool;

/// Callback invoked with the connection itself: the simple-manager handler
/// and the listenable `on_connect` / `on_close` events.
pub type ConnectionHandler<T> =
    Box<dyn for<'a> Fn(&'a mut Connection<T>) -> BoxFuture<'a, Result<()>> + Send + Sync>;

/// Callback invoked for every complete data message with a non-empty
/// payload.
pub type MessageHandler<T> = Box<
    dyn for<'a> Fn(&'a mut Connection<T>, &'a Message) -> BoxFuture<'a, Result<()>> + Send + Sync,
>;

/// Callback invoked when a message handler returns an error.
pub type MessageErrorHandler<T> = Box<
    dyn for<'a> Fn(&'a mut Connection<T>, &'a Error) -> BoxFuture<'a, Result<()>> + Send + Sync,
>;

/// Accepts upgraded transports and owns the connection lifecycle.
pub trait Manager<T>: Send + Sync {
    /// Take ownership of an upgraded transport.
    fn accept(&self, ctx: ConnectionContext<T>) -> impl Future<Output = Result<()>> + Send;
}

/// A manager that lets the handler own all reading and writing.
pub struct SimpleManager<T> {
    config: Config,
    pool: Pool<Connection<T>>,
    handler: ConnectionHandler<T>,
}

impl<T> SimpleManager<T> {
    /// Create a manager delegating each connection to `handler`.
    pub fn new(handler: ConnectionHandler<T>) -> Self {
        Self::with_config(handler, Config::default())
    }

    /// Create a manager with a custom connection configuration.
    pub fn with_config(handler: ConnectionHandler<T>, config: Config) -> Self {
        Self {
            config,
            pool: Pool::new(),
            handler,
        }
    }
}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Manager<T> for SimpleManager<T> {
    fn accept(&self, ctx: ConnectionContext<T>) -> impl Future<Output = Result<()>> + Send {
        async move {
            let mut conn = self
                .pool
                .acquire_or_else(|| Connection::new(self.config.clone()));
            conn.init(ctx);
            let result = (self.handler)(&mut conn).await;
            conn.reset();
            self.pool.release(conn);
            result
        }
    }
}

/// A manager that drives the read loop and fans events out to callbacks.
pub struct ListenableManager<T> {
    config: Config,
    pool: Pool<Connection<T>>,
    on_connect: Option<ConnectionHandler<T>>,
    on_message: Option<MessageHandler<T>>,
    on_message_error: Option<MessageErrorHandler<T>>,
    on_close: Option<ConnectionHandler<T>>,
}

impl<T> ListenableManager<T> {
    /// Create a manager with no callbacks installed.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Create a manager with a custom connection configuration. The
    /// config's `read_timeout` bounds every message read in the loop.
    #[must_use]
    pub fn with_config(config: Config) -> Self {
        Self {
            config,
            pool: Pool::new(),
            on_connect: None,
            on_message: None,
            on_message_error: None,
            on_close: None,
        }
    }

    /// Install the connect callback. An error here closes the transport
    /// before the read loop starts.
    #[must_use]
    pub fn on_connect(mut self, handler: ConnectionHandler<T>) -> Self {
        self.on_connect = Some(handler);
        self
    }

    /// Install the message callback.
    #[must_use]
    pub fn on_message(mut self, handler: MessageHandler<T>) -> Self {
        self.on_message = Some(handler);
        self
    }

    /// Install the message-error callback; message-handler errors are
    /// routed here instead of ending the loop.
    #[must_use]
    pub fn on_message_error(mut self, handler: MessageErrorHandler<T>) -> Self {
        self.on_message_error = Some(handler);
        self
    }

    /// Install the close callback, invoked when the loop exits.
    #[must_use]
    pub fn on_close(mut self, handler: ConnectionHandler<T>) -> Self {
        self.on_close = Some(handler);
        self
    }
}

impl<T> Default for ListenableManager<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> ListenableManager<T> {
    /// One loop iteration under the failure boundary: read a message and
    /// dispatch it.
    async fn dispatch(&self, conn: &mut Connection<T>) -> Result<()> {
        let message = match self.config.read_timeout {
            Some(timeout) => conn.read_message_timeout(timeout).await?,
            None => conn.read_message().await?,
        };
        let Some(message) = message else {
            return Ok(());
        };
        if message.is_empty() {
            return Ok(());
        }
        if let Some(on_message) = &self.on_message {
            if let Err(err) = on_message(conn, &message).await {
                if let Some(on_message_error) = &self.on_message_error {
                    let _ = on_message_error(conn, &err).await;
                }
            }
        }
        Ok(())
    }

    async fn run_loop(&self, conn: &mut Connection<T>) -> Result<()> {
        while !conn.is_closed() {
            match AssertUnwindSafe(self.dispatch(conn)).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    if !conn.is_closed() {
                        let _ = conn.terminate().await;
                    }
                    return Err(err);
                }
                Err(panic) => {
                    eprintln!("DEBUG inline is &str = {}", panic.is::<&str>());
                    eprintln!("DEBUG deref is &str = {}", (*panic).is::<&str>());
                    eprintln!("DEBUG asref is &str = {}", panic.as_ref().is::<&str>());
                    warn!("connection loop panicked, closing with 1011");
                    let _ = conn.close_with_reason(CloseReason::Unexpected).await;
                    let _ = conn.terminate().await;
                    return Err(Error::Unexpected(panic_message(&panic)));
                }
            }
        }
        Ok(())
    }
}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Manager<T> for ListenableManager<T> {
    fn accept(&self, ctx: ConnectionContext<T>) -> impl Future<Output = Result<()>> + Send {
        async move {
            let mut conn = self
                .pool
                .acquire_or_else(|| Connection::new(self.config.clone()));
            conn.init(ctx);

            if let Some(on_connect) = &self.on_connect {
                if let Err(err) = on_connect(&mut conn).await {
                    debug!(%err, "connect callback rejected the connection");
                    let _ = conn.terminate().await;
                    conn.reset();
                    self.pool.release(conn);
                    return Err(err);
                }
            }

            let mut result = self.run_loop(&mut conn).await;

            if let Some(on_close) = &self.on_close {
                let close_result = on_close(&mut conn).await;
                if result.is_ok() {
                    result = close_result;
                }
            }

            conn.reset();
            self.pool.release(conn);
            result
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    eprintln!("DEBUG panic type_id = {:?}", panic.type_id());
    eprintln!("DEBUG &str type_id = {:?}", std::any::TypeId::of::<&str>());
    eprintln!("DEBUG String type_id = {:?}", std::any::TypeId::of::<String>());
    eprintln!("DEBUG is &str = {}", panic.is::<&str>());
    eprintln!("DEBUG is String = {}", panic.is::<String>());
    eprintln!("DEBUG is Box<Error> = {}", panic.is::<crate::error::Error>());
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
