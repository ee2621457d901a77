//! RPC front-end
//!
//! Newline-delimited JSON-RPC over the process's stdin/stdout. Inbound
//! requests dispatch to the tool executor (each `tools/call` on its own
//! task, so sessions proceed in parallel while the per-session ticket
//! serialises same-session work); inbound responses resolve the pending
//! table for outbound sampling calls; `notifications/cancelled` trips the
//! matching invocation's cancellation token.
//!
//! A run of consecutive unparseable frames beyond the configured tolerance
//! aborts the serve loop with a protocol-failure outcome (exit code 2).

pub mod peer;
pub mod protocol;

pub use peer::PeerHandle;

use crate::error::Result;
use crate::tools::registry::{InvokeOptions, ToolExecutor};
use crate::tools::PeerProgressSink;
use dashmap::DashMap;
use protocol::{Message, Notification, Request, Response, RpcError, to_frame};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// How the serve loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServeOutcome {
    /// Peer closed the stream; normal shutdown
    Clean,
    /// Unrecoverable wire protocol violation
    ProtocolFailure,
}

/// The stdio JSON-RPC server.
pub struct RpcServer {
    executor: Arc<ToolExecutor>,
    peer: Arc<PeerHandle>,
    outbound: mpsc::UnboundedSender<String>,
    max_protocol_errors: u32,
    /// request-id (stringified) -> cancellation token for in-flight calls
    invocations: DashMap<String, CancellationToken>,
}

impl RpcServer {
    pub fn new(
        executor: Arc<ToolExecutor>,
        peer: Arc<PeerHandle>,
        outbound: mpsc::UnboundedSender<String>,
        max_protocol_errors: u32,
    ) -> Arc<Self> {
        Arc::new(Self {
            executor,
            peer,
            outbound,
            max_protocol_errors,
            invocations: DashMap::new(),
        })
    }

    /// Drain the outbound channel onto the writer. Run as its own task so
    /// responses, notifications, and peer calls share one ordered stream.
    pub async fn write_loop<W: tokio::io::AsyncWrite + Unpin>(
        mut writer: W,
        mut outbound: mpsc::UnboundedReceiver<String>,
    ) {
        while let Some(frame) = outbound.recv().await {
            if writer.write_all(frame.as_bytes()).await.is_err() {
                break;
            }
            if writer.flush().await.is_err() {
                break;
            }
        }
    }

    /// Read frames until EOF or an unrecoverable protocol failure.
    pub async fn read_loop<R: tokio::io::AsyncBufRead + Unpin>(
        self: &Arc<Self>,
        reader: R,
    ) -> Result<ServeOutcome> {
        let mut lines = reader.lines();
        let mut consecutive_errors = 0u32;

        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| crate::error::AssistError::io(format!("wire read failed: {}", e)))?
        {
            if line.trim().is_empty() {
                continue;
            }
            match Message::parse(&line) {
                Err(rpc_error) => {
                    consecutive_errors += 1;
                    log::warn!(
                        "malformed frame ({} consecutive): {}",
                        consecutive_errors,
                        rpc_error.message
                    );
                    self.send(&Response::failure(Value::Null, rpc_error));
                    if consecutive_errors >= self.max_protocol_errors {
                        log::error!("protocol failure: giving up after {} bad frames", consecutive_errors);
                        return Ok(ServeOutcome::ProtocolFailure);
                    }
                }
                Ok(message) => {
                    consecutive_errors = 0;
                    self.dispatch(message);
                }
            }
        }

        log::info!("stdin closed, shutting down");
        self.drain_invocations(Duration::from_secs(5)).await;
        Ok(ServeOutcome::Clean)
    }

    /// Let in-flight invocations finish, then cancel stragglers.
    async fn drain_invocations(&self, grace: Duration) {
        let deadline = tokio::time::Instant::now() + grace;
        while !self.invocations.is_empty() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        for entry in self.invocations.iter() {
            entry.value().cancel();
        }
    }

    fn send<T: serde::Serialize>(&self, message: &T) {
        let _ = self.outbound.send(to_frame(message));
    }

    fn dispatch(self: &Arc<Self>, message: Message) {
        match message {
            Message::Request(request) => self.handle_request(request),
            Message::Response(response) => {
                let result = match (response.result, response.error) {
                    (Some(result), _) => Ok(result),
                    (None, Some(error)) => Err(error),
                    (None, None) => Err(RpcError::new(
                        protocol::INVALID_REQUEST,
                        "response carries neither result nor error",
                    )),
                };
                self.peer.resolve(&response.id, result);
            }
            Message::Notification(notification) => self.handle_notification(notification),
        }
    }

    fn handle_request(self: &Arc<Self>, request: Request) {
        match request.method.as_str() {
            "initialize" => {
                self.send(&Response::success(
                    request.id,
                    json!({
                        "protocolVersion": "2024-11-05",
                        "serverInfo": {
                            "name": "containerization-assist",
                            "version": env!("CARGO_PKG_VERSION")
                        },
                        "capabilities": {
                            "tools": {},
                            "prompts": {},
                            "resources": {}
                        }
                    }),
                ));
            }
            "tools/list" => {
                let tools: Vec<Value> = self
                    .executor
                    .registry()
                    .list()
                    .iter()
                    .map(|def| {
                        json!({
                            "name": def.name,
                            "version": def.version,
                            "description": def.description,
                            "inputSchema": def.input_schema,
                            "sideEffects": def.side_effects,
                        })
                    })
                    .collect();
                self.send(&Response::success(request.id, json!({"tools": tools})));
            }
            "tools/call" => self.handle_tool_call(request),
            "prompts/get" => {
                let name = request.params["name"].as_str().unwrap_or_default();
                let templates = self.executor.sampling_templates();
                match templates.source(name) {
                    Some(source) => self.send(&Response::success(
                        request.id,
                        json!({"name": name, "template": source}),
                    )),
                    None => self.send(&Response::success(
                        request.id,
                        json!({"prompts": templates.names()}),
                    )),
                }
            }
            "resources/list" => {
                let mut resources = Vec::new();
                for session in self.executor.sessions().list() {
                    for stage in &session.stages {
                        resources.push(json!({
                            "uri": format!("session://{}/{}", session.session_id, stage),
                            "name": format!("{} ({})", stage, session.session_id),
                            "mimeType": "application/json"
                        }));
                    }
                }
                self.send(&Response::success(
                    request.id,
                    json!({"resources": resources}),
                ));
            }
            "resources/read" => {
                let uri = request.params["uri"].as_str().unwrap_or_default();
                match self.read_resource(uri) {
                    Ok(contents) => self.send(&Response::success(
                        request.id,
                        json!({"contents": [{"uri": uri, "mimeType": "application/json", "text": contents}]}),
                    )),
                    Err(err) => {
                        self.send(&Response::failure(request.id, RpcError::from(&err)));
                    }
                }
            }
            "server/status" => {
                self.send(&Response::success(
                    request.id,
                    json!({
                        "version": env!("CARGO_PKG_VERSION"),
                        "uptime_seconds": self.executor.uptime().as_secs(),
                        "active_sessions": self.executor.sessions().active_count(),
                        "pending_sampling": self.peer.pending_count(),
                        "tools": self.executor.registry().len()
                    }),
                ));
            }
            other => {
                self.send(&Response::failure(
                    request.id,
                    RpcError::method_not_found(other),
                ));
            }
        }
    }

    fn handle_tool_call(self: &Arc<Self>, request: Request) {
        let Some(name) = request.params["name"].as_str().map(String::from) else {
            self.send(&Response::failure(
                request.id,
                RpcError::new(protocol::INVALID_REQUEST, "tools/call requires params.name"),
            ));
            return;
        };
        let arguments = request.params.get("arguments").cloned().unwrap_or(json!({}));
        let session_id = request.params["session_id"].as_str().map(String::from);
        let timeout = request.params["timeout_seconds"]
            .as_u64()
            .map(Duration::from_secs);
        let progress_token = request.params["_meta"]["progressToken"]
            .as_str()
            .map(|t| json!(t))
            .unwrap_or_else(|| request.id.clone());

        let cancel = CancellationToken::new();
        let key = request.id.to_string();
        self.invocations.insert(key.clone(), cancel.clone());

        let server = Arc::clone(self);
        tokio::spawn(async move {
            let opts = InvokeOptions {
                session_id,
                progress_token: Some(progress_token),
                timeout,
                cancel,
                progress_sink: PeerProgressSink::new(Arc::clone(&server.peer)),
            };
            let response = match server.executor.invoke(&name, arguments, opts).await {
                Ok(result) => Response::success(request.id, result),
                Err(err) => {
                    log::info!("tool {} failed: {}: {}", name, err.kind, err.message);
                    Response::failure(request.id, RpcError::from(&err))
                }
            };
            server.invocations.remove(&key);
            server.send(&response);
        });
    }

    fn handle_notification(self: &Arc<Self>, notification: Notification) {
        match notification.method.as_str() {
            "notifications/cancelled" => {
                let id = &notification.params["requestId"];
                let key = id.to_string();
                if let Some((_, token)) = self.invocations.remove(&key) {
                    log::info!("cancelling request {}", key);
                    token.cancel();
                } else {
                    log::debug!("cancellation for unknown request {}", key);
                }
            }
            // the peer may stream token-level progress for a sampling call;
            // forward it so the invoking tool's caller sees it
            "notifications/progress" => {
                let sink = PeerProgressSink::new(Arc::clone(&self.peer));
                if let Ok(event) =
                    serde_json::from_value::<crate::tools::ProgressEvent>(notification.params.clone())
                {
                    sink.emit(event);
                }
            }
            "notifications/initialized" => {}
            other => log::debug!("ignoring notification {}", other),
        }
    }

    fn read_resource(&self, uri: &str) -> Result<String> {
        let rest = uri.strip_prefix("session://").ok_or_else(|| {
            crate::error::AssistError::invalid_argument(format!("unsupported resource uri {}", uri))
        })?;
        let (session_id, stage_name) = rest.split_once('/').ok_or_else(|| {
            crate::error::AssistError::invalid_argument("resource uri needs session and stage")
        })?;
        let stage = crate::session::Stage::parse(stage_name).ok_or_else(|| {
            crate::error::AssistError::invalid_argument(format!("unknown stage {}", stage_name))
        })?;
        let artifact = self
            .executor
            .sessions()
            .get_artifact(session_id, stage)?
            .ok_or_else(|| {
                crate::error::AssistError::not_found(format!(
                    "no {} artifact in session {}",
                    stage_name, session_id
                ))
            })?;
        serde_json::to_string_pretty(&artifact)
            .map_err(|e| crate::error::AssistError::internal(format!("serialising artifact: {}", e)))
    }
}

/// Serve stdin/stdout until EOF or protocol failure.
pub async fn serve_stdio(
    server: Arc<RpcServer>,
    outbound: mpsc::UnboundedReceiver<String>,
) -> Result<ServeOutcome> {
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let stdout = tokio::io::stdout();
    let writer = tokio::spawn(RpcServer::write_loop(stdout, outbound));
    let outcome = server.read_loop(stdin).await;
    writer.abort();
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::CommandRunner;
    use crate::config::{Config, SessionConfig};
    use crate::policy::PolicyEngine;
    use crate::sampling::SamplingClient;
    use crate::session::SessionManager;
    use crate::store::KvStore;
    use crate::tools::ops::PingTool;
    use crate::tools::registry::ToolRegistry;
    use std::time::Duration;
    use tempfile::TempDir;

    fn server(dir: &TempDir) -> (Arc<RpcServer>, mpsc::UnboundedReceiver<String>) {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(PingTool)).unwrap();
        let sessions = SessionManager::new(
            SessionConfig {
                workspace_root: dir.path().to_path_buf(),
                ..SessionConfig::default()
            },
            KvStore::temporary().unwrap(),
        )
        .unwrap();
        let executor = crate::tools::registry::ToolExecutor::new(
            registry,
            sessions,
            Arc::new(CommandRunner::new()),
            Arc::new(PolicyEngine::empty()),
            Arc::new(SamplingClient::disconnected()),
            Arc::new(Config::default()),
        );
        let (tx, rx) = mpsc::unbounded_channel();
        let peer = PeerHandle::new(tx.clone());
        (RpcServer::new(executor, peer, tx, 3), rx)
    }

    async fn next_json(rx: &mut mpsc::UnboundedReceiver<String>) -> Value {
        let frame = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("frame within deadline")
            .expect("channel open");
        serde_json::from_str(frame.trim()).unwrap()
    }

    #[tokio::test]
    async fn tools_list_roundtrip() {
        let dir = TempDir::new().unwrap();
        let (server, mut rx) = server(&dir);
        let input = r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#.to_string() + "\n";
        let outcome = server
            .read_loop(tokio::io::BufReader::new(input.as_bytes()))
            .await
            .unwrap();
        assert_eq!(outcome, ServeOutcome::Clean);
        let reply = next_json(&mut rx).await;
        assert_eq!(reply["id"], 1);
        assert_eq!(reply["result"]["tools"][0]["name"], "ping");
    }

    #[tokio::test]
    async fn tools_call_dispatches() {
        let dir = TempDir::new().unwrap();
        let (server, mut rx) = server(&dir);
        let input = r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"ping","arguments":{"payload":"x"}}}"#
            .to_string()
            + "\n";
        server
            .read_loop(tokio::io::BufReader::new(input.as_bytes()))
            .await
            .unwrap();
        let reply = next_json(&mut rx).await;
        assert_eq!(reply["id"], 2);
        assert_eq!(reply["result"]["pong"], true);
    }

    #[tokio::test]
    async fn unknown_method_errors() {
        let dir = TempDir::new().unwrap();
        let (server, mut rx) = server(&dir);
        let input = r#"{"jsonrpc":"2.0","id":3,"method":"bogus/method"}"#.to_string() + "\n";
        server
            .read_loop(tokio::io::BufReader::new(input.as_bytes()))
            .await
            .unwrap();
        let reply = next_json(&mut rx).await;
        assert_eq!(reply["error"]["code"], protocol::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn repeated_garbage_is_protocol_failure() {
        let dir = TempDir::new().unwrap();
        let (server, mut rx) = server(&dir);
        let input = "garbage\nmore garbage\nstill garbage\n";
        let outcome = server
            .read_loop(tokio::io::BufReader::new(input.as_bytes()))
            .await
            .unwrap();
        assert_eq!(outcome, ServeOutcome::ProtocolFailure);
        let reply = next_json(&mut rx).await;
        assert_eq!(reply["error"]["code"], protocol::PARSE_ERROR);
    }

    #[tokio::test]
    async fn garbage_then_valid_resets_counter() {
        let dir = TempDir::new().unwrap();
        let (server, _rx) = server(&dir);
        let input = "garbage\n".repeat(2)
            + r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#
            + "\n"
            + &"garbage\n".repeat(2);
        let outcome = server
            .read_loop(tokio::io::BufReader::new(input.as_bytes()))
            .await
            .unwrap();
        assert_eq!(outcome, ServeOutcome::Clean);
    }

    #[tokio::test]
    async fn server_status_inline() {
        let dir = TempDir::new().unwrap();
        let (server, mut rx) = server(&dir);
        let input = r#"{"jsonrpc":"2.0","id":9,"method":"server/status"}"#.to_string() + "\n";
        server
            .read_loop(tokio::io::BufReader::new(input.as_bytes()))
            .await
            .unwrap();
        let reply = next_json(&mut rx).await;
        assert_eq!(reply["result"]["active_sessions"], 0);
        assert_eq!(reply["result"]["tools"], 1);
    }
}
