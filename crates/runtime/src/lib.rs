//! Runtime for hosting MCP tool servers behind a streaming model loop.
//!
//! The [`Host`] facade owns a [`ConnectionRegistry`] of tool-server sessions
//! and a [`ConversationOrchestrator`] that streams model responses,
//! dispatching tool calls through the aggregated [`ToolCatalog`] as they
//! arrive.

mod catalog;
mod error;
mod host;
pub mod llm;
mod orchestrator;
mod providers;
mod registry;

pub use mcp::{CallResult, Capability};

pub use catalog::{CompositeKey, ToolCatalog};
pub use error::{Error, Result};
pub use host::Host;
pub use llm::{EventStream, ModelBackend, Role, StreamEvent, ToolSpec, Turn};
pub use orchestrator::{ConversationOrchestrator, FnSink, NullSink, ProgressSink, MAX_TOOL_ROUNDS};
pub use providers::{AnthropicBackend, AnthropicBackendBuilder};
pub use registry::{ConnectionRegistry, ServerDescriptor};
