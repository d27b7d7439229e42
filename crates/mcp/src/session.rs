//! Per-server protocol session (handshake, capability cache, recovery).

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::protocol::{
    CallParams, CallResult, Capability, InitializeParams, InitializeResult, JsonRpcRequest,
    JsonRpcResponse, ListCapabilitiesResult, RequestId,
};
use crate::transport::Transport;

/// Default timeout for one protocol round trip.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Connectivity state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Stopping,
}

/// Protocol client for one tool server.
///
/// A session exclusively owns its transport, tracks the connection state
/// machine, and caches the capability list from the last successful
/// `tools/list`. Connect attempts are single-flight: concurrent callers
/// await the same in-flight attempt instead of racing separate reconnects.
#[derive(Debug)]
pub struct Session {
    server_name: String,
    transport: Mutex<Transport>,
    state: Mutex<ConnectionState>,
    capabilities: RwLock<Vec<Capability>>,
    reconnect: Mutex<()>,
    stopping: AtomicBool,
    next_id: AtomicI64,
}

impl Session {
    /// Create a session over the given transport. No connection is made
    /// until `start` is called.
    pub fn new(server_name: impl Into<String>, transport: Transport) -> Self {
        Self {
            server_name: server_name.into(),
            transport: Mutex::new(transport),
            state: Mutex::new(ConnectionState::Disconnected),
            capabilities: RwLock::new(Vec::new()),
            reconnect: Mutex::new(()),
            stopping: AtomicBool::new(false),
            next_id: AtomicI64::new(1),
        }
    }

    /// Name of the server this session talks to.
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// Current connection state. Reports `Stopping` while a stop is in
    /// progress regardless of the underlying state.
    pub async fn state(&self) -> ConnectionState {
        if self.stopping.load(Ordering::SeqCst) {
            return ConnectionState::Stopping;
        }
        *self.state.lock().await
    }

    /// Whether the session currently has an established connection.
    pub async fn is_connected(&self) -> bool {
        self.state().await == ConnectionState::Connected
    }

    /// Capability list from the last successful listing. Never touches the
    /// network.
    pub async fn capabilities(&self) -> Vec<Capability> {
        self.capabilities.read().await.clone()
    }

    /// Connect, handshake, and fetch the capability list.
    ///
    /// No-op if already connected. On any failure the session is cleaned up
    /// and a `Connection` error naming the server is returned.
    pub async fn start(&self) -> Result<()> {
        if self.is_connected().await {
            return Ok(());
        }

        let _flight = self.reconnect.lock().await;

        // A concurrent caller may have finished the connect while we waited.
        if self.is_connected().await {
            return Ok(());
        }
        if self.stopping.load(Ordering::SeqCst) {
            return Err(Error::Stopping(self.server_name.clone()));
        }

        *self.state.lock().await = ConnectionState::Connecting;

        match self.connect_and_handshake().await {
            Ok(capabilities) => {
                info!(
                    server = %self.server_name,
                    capabilities = capabilities.len(),
                    "session connected"
                );
                *self.capabilities.write().await = capabilities;
                *self.state.lock().await = ConnectionState::Connected;
                Ok(())
            }
            Err(e) => {
                self.cleanup().await;
                Err(Error::Connection {
                    server: self.server_name.clone(),
                    source: Box::new(e),
                })
            }
        }
    }

    /// Connect only if not currently connected.
    pub async fn ensure_connected(&self) -> Result<()> {
        if self.is_connected().await {
            Ok(())
        } else {
            self.start().await
        }
    }

    /// Invoke a capability by name.
    ///
    /// The name is checked against the cached capability list before any
    /// round trip. A connectivity-class failure during the invocation
    /// triggers exactly one recovery cycle (cleanup, reconnect, retry); a
    /// second failure propagates as-is.
    pub async fn call_capability(
        &self,
        name: &str,
        arguments: Option<Value>,
    ) -> Result<CallResult> {
        self.ensure_connected().await?;

        let known = self.capabilities.read().await.iter().any(|c| c.name == name);
        if !known {
            return Err(Error::CapabilityNotFound {
                server: self.server_name.clone(),
                name: name.to_string(),
            });
        }

        match self.invoke(name, arguments.clone()).await {
            Err(e) if e.is_connectivity() => {
                warn!(
                    server = %self.server_name,
                    capability = name,
                    error = %e,
                    "invocation hit connectivity failure, reconnecting once"
                );
                self.cleanup().await;
                self.ensure_connected().await?;
                self.invoke(name, arguments).await
            }
            other => other,
        }
    }

    /// Stop the session gracefully. While stopping, `is_connected` reports
    /// false so concurrent `start` calls cannot revive it mid-shutdown.
    pub async fn stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        self.cleanup().await;
        self.stopping.store(false, Ordering::SeqCst);
    }

    /// Drop the capability cache and release the transport.
    pub async fn cleanup(&self) {
        self.capabilities.write().await.clear();
        self.transport.lock().await.cleanup().await;
        *self.state.lock().await = ConnectionState::Disconnected;
        debug!(server = %self.server_name, "session cleaned up");
    }

    // --- Internal methods ---

    async fn connect_and_handshake(&self) -> Result<Vec<Capability>> {
        let mut transport = self.transport.lock().await;
        transport.connect().await?;

        // Request ids restart with each connection.
        self.next_id.store(1, Ordering::SeqCst);

        let _init: InitializeResult = self
            .request(&mut transport, "initialize", Some(InitializeParams::default()))
            .await?;
        self.notify(&mut transport, "notifications/initialized", None::<()>)
            .await?;

        let listed: ListCapabilitiesResult =
            self.request(&mut transport, "tools/list", None::<()>).await?;
        Ok(listed.capabilities)
    }

    async fn invoke(&self, name: &str, arguments: Option<Value>) -> Result<CallResult> {
        let mut transport = self.transport.lock().await;
        let params = CallParams {
            name: name.to_string(),
            arguments,
        };
        let result: CallResult = self.request(&mut transport, "tools/call", Some(params)).await?;

        if result.is_error {
            return Err(Error::InvocationFailed(result.render_text()));
        }

        Ok(result)
    }

    async fn request<P, R>(
        &self,
        transport: &mut Transport,
        method: &str,
        params: Option<P>,
    ) -> Result<R>
    where
        P: serde::Serialize,
        R: serde::de::DeserializeOwned,
    {
        let id = RequestId::Number(self.next_id.fetch_add(1, Ordering::SeqCst));
        let mut request = JsonRpcRequest::new(id.clone(), method);
        if let Some(p) = params {
            request = request.with_params(p);
        }

        let request_json = serde_json::to_string(&request)?;
        transport.send_line(&request_json).await?;

        let line = timeout(DEFAULT_TIMEOUT, transport.read_line())
            .await
            .map_err(|_| Error::Timeout)??;

        let response: JsonRpcResponse = serde_json::from_str(&line)?;
        if response.id != id {
            return Err(Error::InvalidResponse(format!(
                "response ID mismatch: expected {id:?}, got {:?}",
                response.id
            )));
        }

        let result_value = response.into_result()?;
        let result: R = serde_json::from_value(result_value)?;
        Ok(result)
    }

    async fn notify<P>(&self, transport: &mut Transport, method: &str, params: Option<P>) -> Result<()>
    where
        P: serde::Serialize,
    {
        // Notifications have no ID
        let notification = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params.and_then(|p| serde_json::to_value(p).ok())
        });

        let notification_json = serde_json::to_string(&notification)?;
        transport.send_line(&notification_json).await?;
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::PathBuf;

    const INIT_LINE: &str = r#"{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"stub"}}}"#;
    const LIST_LINE: &str = r#"{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"forecast","description":"Get a forecast","inputSchema":{"type":"object"}}]}}"#;
    const CALL_LINE: &str = r#"{"jsonrpc":"2.0","id":3,"result":{"content":[{"type":"text","text":"sunny"}]}}"#;
    const CALL_ERR_LINE: &str = r#"{"jsonrpc":"2.0","id":3,"result":{"content":[{"type":"text","text":"boom"}],"isError":true}}"#;

    /// Stub servers are `sh` scripts that emit canned responses in request
    /// order; the client's per-connection ids make that deterministic.
    fn stub_session(script: String) -> Session {
        let transport = Transport::new("sh", vec!["-c".to_string(), script], HashMap::new());
        Session::new("weather", transport)
    }

    fn marker_path(test: &str) -> PathBuf {
        let path =
            std::env::temp_dir().join(format!("mcp-session-{test}-{}", std::process::id()));
        let _ = std::fs::remove_file(&path);
        path
    }

    fn marker_count(path: &PathBuf) -> usize {
        std::fs::read_to_string(path)
            .map(|s| s.lines().count())
            .unwrap_or(0)
    }

    fn serve_forever(lines: &[&str]) -> String {
        let mut script = String::new();
        for line in lines {
            script.push_str(&format!("echo '{line}'\n"));
        }
        script.push_str("sleep 30\n");
        script
    }

    #[tokio::test]
    async fn start_connects_and_caches_capabilities() {
        let session = stub_session(serve_forever(&[INIT_LINE, LIST_LINE]));

        session.start().await.unwrap();
        assert!(session.is_connected().await);
        assert_eq!(session.state().await, ConnectionState::Connected);

        let capabilities = session.capabilities().await;
        assert_eq!(capabilities.len(), 1);
        assert_eq!(capabilities[0].name, "forecast");

        // start is a no-op when already connected
        session.start().await.unwrap();

        session.stop().await;
        assert!(!session.is_connected().await);
        assert_eq!(session.state().await, ConnectionState::Disconnected);
        assert!(session.capabilities().await.is_empty());
    }

    #[tokio::test]
    async fn start_failure_reports_server_name() {
        let transport = Transport::new(
            "definitely-not-a-real-binary-4d2a",
            vec![],
            HashMap::new(),
        );
        let session = Session::new("weather", transport);

        let err = session.start().await.unwrap_err();
        assert!(err.to_string().contains("weather"));
        assert!(!session.is_connected().await);
    }

    #[tokio::test]
    async fn unknown_capability_fails_without_round_trip() {
        let session = stub_session(serve_forever(&[INIT_LINE, LIST_LINE]));
        session.start().await.unwrap();

        // The stub has no response for a call, so anything that reached the
        // wire would block until the timeout; this must return immediately.
        let err = session.call_capability("nope", None).await.unwrap_err();
        assert!(matches!(err, Error::CapabilityNotFound { .. }));

        session.stop().await;
    }

    #[tokio::test]
    async fn concurrent_ensure_connected_is_single_flight() {
        let marker = marker_path("single-flight");
        let script = format!(
            "echo connect >> '{}'\n{}",
            marker.display(),
            serve_forever(&[INIT_LINE, LIST_LINE])
        );
        let session = stub_session(script);

        let (a, b) = tokio::join!(session.ensure_connected(), session.ensure_connected());
        a.unwrap();
        b.unwrap();

        assert_eq!(marker_count(&marker), 1);

        session.stop().await;
        let _ = std::fs::remove_file(&marker);
    }

    #[tokio::test]
    async fn call_recovers_once_from_connectivity_failure() {
        let marker = marker_path("retry-once");
        // First run: handshake, then exit (the call will hit a dead server).
        // Second run: handshake plus a call response.
        // The first run reads the three handshake writes before exiting so
        // the client never races an EPIPE against the shell's exit.
        let script = format!(
            "if [ -f '{m}' ]; then\necho '{init}'\necho '{list}'\necho '{call}'\nsleep 30\nelse\n: > '{m}'\necho '{init}'\necho '{list}'\nread _a\nread _b\nread _c\nfi",
            m = marker.display(),
            init = INIT_LINE,
            list = LIST_LINE,
            call = CALL_LINE,
        );
        let session = stub_session(script);
        session.start().await.unwrap();

        let result = session.call_capability("forecast", None).await.unwrap();
        assert_eq!(result.render_text(), "sunny");

        session.stop().await;
        let _ = std::fs::remove_file(&marker);
    }

    #[tokio::test]
    async fn second_connectivity_failure_propagates() {
        let marker = marker_path("retry-twice");
        // Every run handshakes and then exits, so the retry fails too. Each
        // run reads the three handshake writes before exiting so the client
        // never races an EPIPE against the shell's exit.
        let script = format!(
            "echo connect >> '{m}'\necho '{init}'\necho '{list}'\nread _a\nread _b\nread _c",
            m = marker.display(),
            init = INIT_LINE,
            list = LIST_LINE,
        );
        let session = stub_session(script);
        session.start().await.unwrap();

        let err = session.call_capability("forecast", None).await.unwrap_err();
        assert!(err.is_connectivity());

        // One initial connect plus exactly one recovery attempt.
        assert_eq!(marker_count(&marker), 2);

        session.stop().await;
        let _ = std::fs::remove_file(&marker);
    }

    #[tokio::test]
    async fn invocation_error_is_not_retried() {
        let marker = marker_path("no-retry");
        let script = format!(
            "echo connect >> '{m}'\n{serve}",
            m = marker.display(),
            serve = serve_forever(&[INIT_LINE, LIST_LINE, CALL_ERR_LINE]),
        );
        let session = stub_session(script);
        session.start().await.unwrap();

        let err = session.call_capability("forecast", None).await.unwrap_err();
        assert!(matches!(err, Error::InvocationFailed(_)));
        assert_eq!(marker_count(&marker), 1);

        session.stop().await;
        let _ = std::fs::remove_file(&marker);
    }
}
