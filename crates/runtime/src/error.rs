//! Runtime error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("network error: {0}")]
    Network(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("server '{0}' is already registered")]
    DuplicateServer(String),

    #[error("no server named '{0}' is registered")]
    UnknownServer(String),

    #[error("tool-call loop exceeded {0} rounds")]
    ToolLoopExceeded(usize),

    #[error(transparent)]
    Mcp(#[from] mcp::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
