use std::net::SocketAddr;

use async_trait::async_trait;
use thiserror::Error;

use crate::core::Server;

/// Error type for server engine operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ServerPortError {
    /// The listener could not be bound (address in use, permission denied, ...)
    #[error("Failed to bind {address}: {source}")]
    Bind {
        address: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// TLS material could not be loaded or is unusable
    #[error("TLS error: {0}")]
    Tls(String),

    /// `startup` was called while a listener is active
    #[error("Engine is already started")]
    AlreadyStarted,

    /// An operation that needs a bound listener was called before `startup`
    #[error("Engine is not started")]
    NotStarted,

    /// Resources could not be released cleanly
    #[error("Shutdown error: {0}")]
    Shutdown(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for server engine operations
pub type ServerPortResult<T> = Result<T, ServerPortError>;

/// ServerPort defines the port (interface) implemented by every server engine.
///
/// An engine binds a listener for a [`Server`] and dispatches the incoming requests to
/// the server's context router. The [`Server`] is the only caller of `startup` and
/// `shutdown`, and it serializes them.
#[async_trait]
pub trait ServerPort: Send + Sync + 'static {
    /// Bind a listener at `server.settings()` and start serving `server.context_router()`.
    ///
    /// Must not return `Ok` before the socket is bound: `started()` is expected to be
    /// true as soon as this resolves successfully.
    async fn startup(&self, server: &Server) -> ServerPortResult<()>;

    /// Stop accepting connections and release the socket.
    ///
    /// Returns once the port can be bound again. In-flight requests are drained or
    /// aborted at the engine's discretion.
    async fn shutdown(&self) -> ServerPortResult<()>;

    /// Live state of the underlying listener.
    fn started(&self) -> bool;

    /// Port the listener is actually bound to, resolving ephemeral port requests.
    ///
    /// # Errors
    /// [`ServerPortError::NotStarted`] when no listener is active.
    fn runtime_port(&self) -> ServerPortResult<u16>;

    /// Engine identity shown in the startup report
    fn name(&self) -> &str;

    /// Whether `startup` may be called again after `shutdown`
    fn supports_restart(&self) -> bool {
        false
    }
}
