//! Top-level facade tying the registry and orchestrator together.

use std::collections::HashMap;
use std::sync::Arc;

use mcp::Capability;

use crate::llm::ModelBackend;
use crate::orchestrator::{ConversationOrchestrator, ProgressSink};
use crate::registry::{ConnectionRegistry, ServerDescriptor};
use crate::Result;

/// Multi-server host: add tool servers, run queries, shut everything down.
pub struct Host<B> {
    registry: Arc<ConnectionRegistry>,
    orchestrator: ConversationOrchestrator<B>,
}

impl<B: ModelBackend> Host<B> {
    pub fn new(backend: B) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let orchestrator = ConversationOrchestrator::new(backend, Arc::clone(&registry));
        Self {
            registry,
            orchestrator,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Launch a server from a script path and register it under `name`.
    ///
    /// Returns the capabilities the server advertised during its handshake.
    pub async fn add_server(
        &self,
        name: &str,
        path: &str,
        env: HashMap<String, String>,
    ) -> Result<Vec<Capability>> {
        let (command, args) = classify_launch_target(path);
        let session = self
            .registry
            .add_connection(ServerDescriptor {
                name: name.to_string(),
                command,
                args,
                env,
            })
            .await?;
        Ok(session.capabilities().await)
    }

    /// Stop and unregister a server.
    pub async fn remove_server(&self, name: &str) -> Result<()> {
        self.registry.remove_connection(name).await
    }

    /// Run one query through the conversation loop.
    pub async fn run_query(&self, query: &str, sink: &mut dyn ProgressSink) -> Result<String> {
        self.orchestrator.process_query(query, sink).await
    }

    /// Stop every server session.
    pub async fn shutdown(&self) {
        self.registry.cleanup_all().await;
    }
}

/// Pick the interpreter for a server script by file extension. Anything
/// without a known extension is launched directly.
fn classify_launch_target(path: &str) -> (String, Vec<String>) {
    if path.ends_with(".py") {
        ("python3".to_string(), vec![path.to_string()])
    } else if path.ends_with(".js") {
        ("node".to_string(), vec![path.to_string()])
    } else {
        (path.to_string(), vec![])
    }
}
