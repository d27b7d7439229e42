//! CLI error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The Anthropic API key is required before any server is launched.
    #[error("ANTHROPIC_API_KEY environment variable not set")]
    MissingApiKey,

    /// The server arguments could not be parsed.
    #[error("invalid server specification: {0}")]
    InvalidServerSpec(String),

    /// An error occurred in the runtime layer.
    #[error(transparent)]
    Runtime(#[from] runtime::Error),

    /// An I/O error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
