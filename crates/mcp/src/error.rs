//! MCP error types.

use crate::protocol::JsonRpcError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Transport or handshake failure, tagged with the server name.
    #[error("failed to initialize session with server '{server}': {source}")]
    Connection {
        server: String,
        #[source]
        source: Box<Error>,
    },

    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport is closed")]
    TransportClosed,

    #[error("server exited unexpectedly")]
    ServerExited,

    #[error("timeout waiting for response")]
    Timeout,

    #[error("failed to serialize request: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("JSON-RPC error: {0}")]
    JsonRpc(#[from] JsonRpcError),

    #[error("capability '{name}' not available on server '{server}'")]
    CapabilityNotFound { server: String, name: String },

    #[error("capability invocation failed: {0}")]
    InvocationFailed(String),

    #[error("output too large: {size} bytes (max {max})")]
    OutputTooLarge { size: usize, max: usize },

    #[error("session for server '{0}' is stopping")]
    Stopping(String),
}

impl Error {
    /// Whether this is a connectivity-class failure that a reconnect could
    /// plausibly recover from.
    ///
    /// Registry misuse, missing capabilities, and failed-but-executed
    /// invocations are never connectivity failures; retrying those would
    /// just repeat a logic error.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            Error::Connection { .. }
                | Error::Io(_)
                | Error::TransportClosed
                | Error::ServerExited
                | Error::Timeout
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
