//! Registry of connected tool servers.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use mcp::{Capability, Session, Transport};

use crate::{Error, Result};

/// Launch description for one tool server.
#[derive(Debug, Clone)]
pub struct ServerDescriptor {
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
}

struct Connection {
    descriptor: ServerDescriptor,
    session: Arc<Session>,
}

/// Shared table of live server connections, keyed by server name.
///
/// Reads (lookups, capability snapshots) take the map lock only, so they
/// never wait behind a slow server launch. Mutations serialize on a
/// separate lock and do the subprocess work outside the map lock, inserting
/// or removing the entry only once the session operation has finished.
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<String, Connection>>,
    mutate: Mutex<()>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            mutate: Mutex::new(()),
        }
    }

    /// Launch and register a new server, returning its session.
    ///
    /// The entry becomes visible only after the session has connected and
    /// completed its handshake. A failed launch leaves the registry
    /// unchanged.
    pub async fn add_connection(&self, descriptor: ServerDescriptor) -> Result<Arc<Session>> {
        let _guard = self.mutate.lock().await;

        if self
            .connections
            .read()
            .await
            .contains_key(&descriptor.name)
        {
            return Err(Error::DuplicateServer(descriptor.name));
        }

        let transport = Transport::new(
            &descriptor.command,
            descriptor.args.clone(),
            descriptor.env.clone(),
        );
        let session = Arc::new(Session::new(&descriptor.name, transport));
        session.start().await?;

        info!(server = %descriptor.name, "registered tool server");
        let connection = Connection {
            descriptor: descriptor.clone(),
            session: Arc::clone(&session),
        };
        self.connections
            .write()
            .await
            .insert(descriptor.name, connection);

        Ok(session)
    }

    /// Stop and remove a registered server.
    pub async fn remove_connection(&self, name: &str) -> Result<()> {
        let _guard = self.mutate.lock().await;

        let session = {
            let connections = self.connections.read().await;
            let connection = connections
                .get(name)
                .ok_or_else(|| Error::UnknownServer(name.to_string()))?;
            Arc::clone(&connection.session)
        };

        session.stop().await;
        self.connections.write().await.remove(name);
        info!(server = name, "removed tool server");
        Ok(())
    }

    /// Look up the session for a registered server.
    pub async fn get_session(&self, name: &str) -> Result<Arc<Session>> {
        let connections = self.connections.read().await;
        connections
            .get(name)
            .map(|c| Arc::clone(&c.session))
            .ok_or_else(|| Error::UnknownServer(name.to_string()))
    }

    /// Names of all registered servers, sorted.
    pub async fn server_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.connections.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Launch description of a registered server.
    pub async fn descriptor(&self, name: &str) -> Result<ServerDescriptor> {
        let connections = self.connections.read().await;
        connections
            .get(name)
            .map(|c| c.descriptor.clone())
            .ok_or_else(|| Error::UnknownServer(name.to_string()))
    }

    /// Snapshot of every server's cached capabilities, sorted by server name.
    ///
    /// Reads the caches only; no server round trips.
    pub async fn snapshot_capabilities(&self) -> Vec<(String, Vec<Capability>)> {
        let sessions: Vec<(String, Arc<Session>)> = {
            let connections = self.connections.read().await;
            connections
                .iter()
                .map(|(name, c)| (name.clone(), Arc::clone(&c.session)))
                .collect()
        };

        let mut snapshot = Vec::with_capacity(sessions.len());
        for (name, session) in sessions {
            snapshot.push((name, session.capabilities().await));
        }
        snapshot.sort_by(|a, b| a.0.cmp(&b.0));
        snapshot
    }

    /// Stop every session and clear the registry.
    pub async fn cleanup_all(&self) {
        let _guard = self.mutate.lock().await;

        let drained: Vec<(String, Connection)> =
            self.connections.write().await.drain().collect();
        for (name, connection) in drained {
            warn!(server = %name, "stopping tool server");
            connection.session.stop().await;
        }
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    const INIT_LINE: &str = r#"{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"stub"}}}"#;
    const LIST_LINE: &str = r#"{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"forecast","description":"Get a forecast","inputSchema":{"type":"object"}}]}}"#;

    fn stub_descriptor(name: &str) -> ServerDescriptor {
        let script = format!("echo '{INIT_LINE}'; echo '{LIST_LINE}'; sleep 30");
        ServerDescriptor {
            name: name.to_string(),
            command: "sh".to_string(),
            args: vec!["-c".to_string(), script],
            env: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn add_and_lookup() {
        let registry = ConnectionRegistry::new();
        let session = registry
            .add_connection(stub_descriptor("weather"))
            .await
            .unwrap();
        assert_eq!(session.server_name(), "weather");

        let looked_up = registry.get_session("weather").await.unwrap();
        assert_eq!(looked_up.capabilities().await.len(), 1);

        registry.cleanup_all().await;
    }

    #[tokio::test]
    async fn duplicate_add_leaves_original_untouched() {
        let registry = ConnectionRegistry::new();
        let original = registry
            .add_connection(stub_descriptor("weather"))
            .await
            .unwrap();

        let err = registry
            .add_connection(stub_descriptor("weather"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateServer(name) if name == "weather"));

        assert!(original.is_connected().await);
        registry.cleanup_all().await;
    }

    #[tokio::test]
    async fn failed_launch_leaves_registry_empty() {
        let registry = ConnectionRegistry::new();
        let descriptor = ServerDescriptor {
            name: "ghost".to_string(),
            command: "/nonexistent/binary".to_string(),
            args: vec![],
            env: HashMap::new(),
        };
        assert!(registry.add_connection(descriptor).await.is_err());
        assert!(registry.server_names().await.is_empty());
    }

    #[tokio::test]
    async fn remove_unknown_server_fails() {
        let registry = ConnectionRegistry::new();
        let err = registry.remove_connection("ghost").await.unwrap_err();
        assert!(matches!(err, Error::UnknownServer(name) if name == "ghost"));
    }

    #[tokio::test]
    async fn snapshot_is_sorted_by_server_name() {
        let registry = ConnectionRegistry::new();
        registry
            .add_connection(stub_descriptor("weather"))
            .await
            .unwrap();
        registry
            .add_connection(stub_descriptor("calendar"))
            .await
            .unwrap();

        let snapshot = registry.snapshot_capabilities().await;
        let names: Vec<&str> = snapshot.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["calendar", "weather"]);
        assert_eq!(snapshot[0].1[0].name, "forecast");

        registry.cleanup_all().await;
    }

    #[tokio::test]
    async fn remove_then_lookup_fails() {
        let registry = ConnectionRegistry::new();
        registry
            .add_connection(stub_descriptor("weather"))
            .await
            .unwrap();
        registry.remove_connection("weather").await.unwrap();
        assert!(registry.get_session("weather").await.is_err());
    }
}
