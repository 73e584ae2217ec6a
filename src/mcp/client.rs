// ABOUTME: MCP connection seam plus a stdio JSON-RPC client that spawns the server process.
// ABOUTME: Newline-delimited JSON-RPC 2.0 with the initialize handshake and a reader task.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, bail};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex, oneshot};

use super::protocol::{
    ClientInfo, IncomingMessage, InitializeParams, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse, MCP_PROTOCOL_VERSION, METHOD_NOT_FOUND, McpToolCallResult,
    McpToolDefinition, RequestId, ToolCallParams, ToolsListResult,
};
use crate::config::McpServerConfig;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// A live session with one tool server.
#[async_trait]
pub trait McpConnection: Send + Sync {
    async fn list_tools(&self) -> anyhow::Result<Vec<McpToolDefinition>>;

    async fn call_tool(&self, name: &str, arguments: Value) -> anyhow::Result<McpToolCallResult>;

    async fn close(&self) -> anyhow::Result<()>;
}

/// Opens connections from server configs.
#[async_trait]
pub trait McpConnector: Send + Sync {
    async fn connect(
        &self,
        name: &str,
        config: &McpServerConfig,
    ) -> anyhow::Result<Arc<dyn McpConnection>>;
}

/// Spawns each server as a child process and speaks JSON-RPC over its stdio.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdioConnector;

#[async_trait]
impl McpConnector for StdioConnector {
    async fn connect(
        &self,
        name: &str,
        config: &McpServerConfig,
    ) -> anyhow::Result<Arc<dyn McpConnection>> {
        let client = StdioMcpClient::spawn(name, config)?;
        client
            .initialize()
            .await
            .with_context(|| format!("MCP server '{name}' failed to initialize"))?;
        Ok(Arc::new(client))
    }
}

type PendingMap = Arc<StdMutex<HashMap<RequestId, oneshot::Sender<JsonRpcResponse>>>>;
type SharedWriter = Arc<Mutex<Option<BufWriter<ChildStdin>>>>;

fn lock_pending(
    pending: &PendingMap,
) -> MutexGuard<'_, HashMap<RequestId, oneshot::Sender<JsonRpcResponse>>> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Removes a request's pending entry however the request ends, including
/// when the caller drops the future mid-wait.
struct PendingEntry<'a> {
    pending: &'a PendingMap,
    id: RequestId,
}

impl Drop for PendingEntry<'_> {
    fn drop(&mut self) {
        lock_pending(self.pending).remove(&self.id);
    }
}

async fn write_message<T: Serialize>(
    writer: &SharedWriter,
    server_name: &str,
    message: &T,
) -> anyhow::Result<()> {
    let json = serde_json::to_string(message)?;
    let mut guard = writer.lock().await;
    let writer = guard
        .as_mut()
        .with_context(|| format!("MCP server '{server_name}' is closed"))?;
    writer.write_all(json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

pub struct StdioMcpClient {
    server_name: String,
    next_id: AtomicU64,
    pending: PendingMap,
    writer: SharedWriter,
    child: Mutex<Option<Child>>,
    request_timeout: Duration,
}

impl StdioMcpClient {
    /// Spawn the server process and start reading its stdout.
    pub fn spawn(server_name: &str, config: &McpServerConfig) -> anyhow::Result<Self> {
        let mut child = Command::new(&config.command)
            .args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn MCP server: {}", config.command))?;

        let stdin = child.stdin.take().context("MCP server stdin unavailable")?;
        let stdout = child.stdout.take().context("MCP server stdout unavailable")?;

        let pending: PendingMap = Arc::new(StdMutex::new(HashMap::new()));
        let writer: SharedWriter = Arc::new(Mutex::new(Some(BufWriter::new(stdin))));
        tokio::spawn(read_server_output(
            server_name.to_string(),
            stdout,
            Arc::clone(&pending),
            Arc::clone(&writer),
        ));

        Ok(Self {
            server_name: server_name.to_string(),
            next_id: AtomicU64::new(1),
            pending,
            writer,
            child: Mutex::new(Some(child)),
            request_timeout: REQUEST_TIMEOUT,
        })
    }

    #[cfg(test)]
    fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Run the `initialize` handshake and send `notifications/initialized`.
    pub async fn initialize(&self) -> anyhow::Result<Value> {
        let params = InitializeParams {
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
            capabilities: json!({}),
            client_info: ClientInfo {
                name: "localclaw".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };
        let result = self
            .request("initialize", Some(serde_json::to_value(&params)?))
            .await?;
        self.write_line(&JsonRpcNotification::new("notifications/initialized"))
            .await?;
        tracing::info!(server = %self.server_name, "MCP server initialized");
        Ok(result)
    }

    async fn request(&self, method: &str, params: Option<Value>) -> anyhow::Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcRequest::new(method, params, id);

        let (tx, rx) = oneshot::channel();
        lock_pending(&self.pending).insert(request.id.clone(), tx);
        let _entry = PendingEntry {
            pending: &self.pending,
            id: request.id.clone(),
        };

        self.write_line(&request).await?;

        let response = match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => bail!("MCP server '{}' closed the connection", self.server_name),
            Err(_) => bail!("MCP request '{method}' timed out"),
        };

        if let Some(error) = response.error {
            bail!("JSON-RPC error {}: {}", error.code, error.message);
        }
        Ok(response.result.unwrap_or(Value::Null))
    }

    async fn write_line<T: Serialize>(&self, message: &T) -> anyhow::Result<()> {
        write_message(&self.writer, &self.server_name, message).await
    }
}

/// Reader task: resolves pending requests and answers the server's own requests.
async fn read_server_output(
    name: String,
    stdout: ChildStdout,
    pending: PendingMap,
    writer: SharedWriter,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(server = %name, error = %e, "MCP stdout read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match IncomingMessage::parse(&line) {
            Some(IncomingMessage::Response(response)) => {
                let sender = lock_pending(&pending).remove(&response.id);
                if let Some(sender) = sender {
                    let _ = sender.send(response);
                }
            }
            Some(IncomingMessage::Request { id, method }) => {
                let reply = if method == "ping" {
                    JsonRpcResponse::success(id, json!({}))
                } else {
                    JsonRpcResponse::failure(
                        id,
                        METHOD_NOT_FOUND,
                        format!("method not supported: {method}"),
                    )
                };
                if let Err(e) = write_message(&writer, &name, &reply).await {
                    tracing::debug!(server = %name, %method, error = %e, "failed to answer MCP server request");
                }
            }
            Some(IncomingMessage::Notification { method }) => {
                tracing::trace!(server = %name, %method, "MCP notification");
            }
            None => tracing::trace!(server = %name, "ignoring unrecognized MCP line"),
        }
    }
    // Dropping the senders fails every outstanding request.
    lock_pending(&pending).clear();
    tracing::debug!(server = %name, "MCP server output closed");
}

#[async_trait]
impl McpConnection for StdioMcpClient {
    async fn list_tools(&self) -> anyhow::Result<Vec<McpToolDefinition>> {
        let result = self.request("tools/list", None).await?;
        let list: ToolsListResult =
            serde_json::from_value(result).context("failed to parse tools/list response")?;
        Ok(list.tools)
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> anyhow::Result<McpToolCallResult> {
        let params = ToolCallParams {
            name: name.to_string(),
            arguments,
        };
        let result = self
            .request("tools/call", Some(serde_json::to_value(&params)?))
            .await?;
        serde_json::from_value(result).context("failed to parse tools/call response")
    }

    async fn close(&self) -> anyhow::Result<()> {
        // Closing stdin asks the server to exit; kill covers servers that don't.
        self.writer.lock().await.take();
        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(e) = child.kill().await {
                tracing::debug!(server = %self.server_name, error = %e, "MCP server kill failed");
            }
        }
        Ok(())
    }
}
