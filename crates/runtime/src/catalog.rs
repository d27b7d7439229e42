//! Aggregated tool catalog across all registered servers.

use std::sync::Arc;

use serde_json::Value;

use mcp::CallResult;

use crate::llm::ToolSpec;
use crate::registry::ConnectionRegistry;
use crate::{Error, Result};

/// Resolved address of one capability: which server, which tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositeKey {
    pub server: String,
    pub capability: String,
}

impl std::fmt::Display for CompositeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.server, self.capability)
    }
}

/// Model-facing view of every capability in the registry.
///
/// Capabilities are flattened into one namespace using `<server>_<name>`
/// composite names. Server names may themselves contain underscores, so
/// resolution matches the longest registered server name that prefixes the
/// composite, never a blind split on the first underscore.
pub struct ToolCatalog {
    registry: Arc<ConnectionRegistry>,
}

impl ToolCatalog {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Build the flattened tool list to hand to the model.
    ///
    /// Descriptions are prefixed with the server name so the model can tell
    /// same-named tools apart. Input schemas pass through unmodified.
    pub async fn build_model_tools(&self) -> Vec<ToolSpec> {
        let mut specs = Vec::new();
        for (server, capabilities) in self.registry.snapshot_capabilities().await {
            for capability in capabilities {
                specs.push(ToolSpec {
                    name: format!("{server}_{}", capability.name),
                    description: format!(
                        "[{server}] {}",
                        capability.description.as_deref().unwrap_or("")
                    ),
                    input_schema: capability.input_schema,
                });
            }
        }
        specs
    }

    /// Map a composite tool name back to its server and capability.
    pub async fn resolve(&self, composite: &str) -> Result<CompositeKey> {
        let mut names = self.registry.server_names().await;
        names.sort_by_key(|n| std::cmp::Reverse(n.len()));

        for name in names {
            if let Some(rest) = composite
                .strip_prefix(name.as_str())
                .and_then(|r| r.strip_prefix('_'))
            {
                if !rest.is_empty() {
                    return Ok(CompositeKey {
                        server: name,
                        capability: rest.to_string(),
                    });
                }
            }
        }

        // No registered server matches; report the naive split so the
        // message names something recognizable.
        let (server, _) = composite.split_once('_').unwrap_or((composite, ""));
        Err(Error::UnknownServer(server.to_string()))
    }

    /// Invoke an already-resolved capability.
    pub async fn invoke(&self, key: &CompositeKey, arguments: Option<Value>) -> Result<CallResult> {
        let session = self.registry.get_session(&key.server).await?;
        let result = session.call_capability(&key.capability, arguments).await?;
        Ok(result)
    }

    /// Resolve a composite name and invoke it in one step.
    pub async fn resolve_and_invoke(
        &self,
        composite: &str,
        arguments: Option<Value>,
    ) -> Result<CallResult> {
        let key = self.resolve(composite).await?;
        self.invoke(&key, arguments).await
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::registry::ServerDescriptor;
    use std::collections::HashMap;

    const INIT_LINE: &str = r#"{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"stub"}}}"#;

    fn stub_descriptor(name: &str, list_line: &str, extra: &[&str]) -> ServerDescriptor {
        let mut script = format!("echo '{INIT_LINE}'\necho '{list_line}'\n");
        for line in extra {
            script.push_str(&format!("echo '{line}'\n"));
        }
        script.push_str("sleep 30\n");
        ServerDescriptor {
            name: name.to_string(),
            command: "sh".to_string(),
            args: vec!["-c".to_string(), script],
            env: HashMap::new(),
        }
    }

    async fn weather_registry() -> Arc<ConnectionRegistry> {
        let list = r#"{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"forecast","description":"Get a forecast","inputSchema":{"type":"object"}}]}}"#;
        let call = r#"{"jsonrpc":"2.0","id":3,"result":{"content":[{"type":"text","text":"72F and sunny"}]}}"#;
        let registry = Arc::new(ConnectionRegistry::new());
        registry
            .add_connection(stub_descriptor("weather", list, &[call]))
            .await
            .unwrap();
        registry
    }

    #[tokio::test]
    async fn model_tools_carry_composite_names() {
        let registry = weather_registry().await;
        let catalog = ToolCatalog::new(Arc::clone(&registry));

        let tools = catalog.build_model_tools().await;
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "weather_forecast");
        assert_eq!(tools[0].description, "[weather] Get a forecast");

        registry.cleanup_all().await;
    }

    #[tokio::test]
    async fn resolve_and_invoke_round_trip() {
        let registry = weather_registry().await;
        let catalog = ToolCatalog::new(Arc::clone(&registry));

        let key = catalog.resolve("weather_forecast").await.unwrap();
        assert_eq!(key.server, "weather");
        assert_eq!(key.capability, "forecast");
        assert_eq!(key.to_string(), "weather.forecast");

        let result = catalog
            .invoke(&key, Some(serde_json::json!({"city": "Boston"})))
            .await
            .unwrap();
        assert_eq!(result.render_text(), "72F and sunny");

        registry.cleanup_all().await;
    }

    #[tokio::test]
    async fn resolution_prefers_longest_server_prefix() {
        let list = r#"{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"gust","description":"Gust speed","inputSchema":{"type":"object"}}]}}"#;
        let registry = Arc::new(ConnectionRegistry::new());
        registry
            .add_connection(stub_descriptor("north", list, &[]))
            .await
            .unwrap();
        registry
            .add_connection(stub_descriptor("north_wind", list, &[]))
            .await
            .unwrap();

        let catalog = ToolCatalog::new(Arc::clone(&registry));
        let key = catalog.resolve("north_wind_gust").await.unwrap();
        assert_eq!(key.server, "north_wind");
        assert_eq!(key.capability, "gust");

        registry.cleanup_all().await;
    }

    #[tokio::test]
    async fn unknown_composite_name_fails() {
        let registry = weather_registry().await;
        let catalog = ToolCatalog::new(Arc::clone(&registry));

        let err = catalog.resolve("news_headlines").await.unwrap_err();
        assert!(matches!(err, Error::UnknownServer(name) if name == "news"));

        registry.cleanup_all().await;
    }
}
