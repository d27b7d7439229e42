//! MCP (Model Context Protocol) client library.
//!
//! This crate provides the per-server half of a tool host: a child-process
//! [`Transport`] carrying line-delimited JSON-RPC, and a [`Session`] that
//! performs the handshake, caches the server's capability list, and recovers
//! from connectivity failures.
//!
//! # Example
//!
//! ```no_run
//! use mcp::{Session, Transport};
//! use std::collections::HashMap;
//!
//! # async fn example() -> mcp::Result<()> {
//! let transport = Transport::new(
//!     "mcp-filesystem",
//!     vec!["--root".to_string(), "./workspace".to_string()],
//!     HashMap::new(),
//! );
//! let session = Session::new("filesystem", transport);
//! session.start().await?;
//!
//! for capability in session.capabilities().await {
//!     println!("Capability: {}", capability.name);
//! }
//!
//! let result = session
//!     .call_capability("read_file", Some(serde_json::json!({"path": "./README.md"})))
//!     .await?;
//! println!("{}", result.render_text());
//!
//! session.stop().await;
//! # Ok(())
//! # }
//! ```

mod error;
mod protocol;
mod session;
mod transport;

pub use error::{Error, Result};
pub use protocol::{
    CallParams, CallResult, Capability, ContentBlock, InitializeParams, InitializeResult,
    JsonRpcError, JsonRpcRequest, JsonRpcResponse, ListCapabilitiesResult, RequestId,
    ServerCapabilities, ServerInfo,
};
pub use session::{ConnectionState, DEFAULT_TIMEOUT, Session};
pub use transport::{MAX_OUTPUT_SIZE, Transport};
