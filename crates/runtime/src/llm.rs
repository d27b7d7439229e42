//! Model-facing conversation types and the streaming backend abstraction.
//!
//! These types represent the universal concepts shared across model
//! providers. Provider-specific wire details belong in adapter modules
//! under `providers`.

use crate::Result;
use futures::Stream;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;

/// Role of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One turn in the conversation driving a query.
#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    /// Create a user turn.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Create an assistant turn.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Tool definition exposed to the model.
#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    /// Model-facing identifier.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// JSON Schema for input parameters.
    pub input_schema: Value,
}

/// One event from a streamed model response, in arrival order.
///
/// The variants form a closed set so a new event kind cannot be introduced
/// without every consumer handling it.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    MessageStart,
    BlockStart,
    TextDelta(String),
    BlockStop,
    MessageStop,
    /// A complete tool invocation request, with its arguments assembled.
    ToolCall { name: String, arguments: Value },
}

/// Ordered stream of model response events.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

/// Trait for streaming model backends.
///
/// Implementations handle the specifics of communicating with different
/// model providers.
pub trait ModelBackend: Send + Sync {
    /// Open a streamed response for the given turn sequence and tool list.
    fn open_stream(
        &self,
        turns: &[Turn],
        tools: &[ToolSpec],
    ) -> impl Future<Output = Result<EventStream>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turn_constructors() {
        let user = Turn::user("hello");
        assert_eq!(user.role, Role::User);
        assert_eq!(user.content, "hello");

        let assistant = Turn::assistant("hi");
        assert_eq!(assistant.role, Role::Assistant);
    }

    #[test]
    fn role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::User).unwrap(), "\"user\"");
        assert_eq!(
            serde_json::to_string(&Role::Assistant).unwrap(),
            "\"assistant\""
        );
    }
}
