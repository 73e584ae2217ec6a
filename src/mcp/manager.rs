// ABOUTME: MCP manager — connects every configured server concurrently and collects their tools.
// ABOUTME: A failing server is recorded as errored and never affects the others.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;

use super::adapter::McpToolAdapter;
use super::client::{McpConnection, McpConnector, StdioConnector};
use crate::config::McpServerConfig;
use crate::tools::Tool;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerStatus {
    Connected,
    Disconnected,
    Error,
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ServerStatus::Connected => "connected",
            ServerStatus::Disconnected => "disconnected",
            ServerStatus::Error => "error",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct McpServerInfo {
    pub name: String,
    pub status: ServerStatus,
    pub tool_count: usize,
    pub error: Option<String>,
}

struct ManagedServer {
    connection: Option<Arc<dyn McpConnection>>,
    status: ServerStatus,
    tool_count: usize,
    error: Option<String>,
}

pub struct McpManager {
    connector: Arc<dyn McpConnector>,
    connect_timeout: Duration,
    servers: BTreeMap<String, ManagedServer>,
}

impl Default for McpManager {
    fn default() -> Self {
        Self::new(Arc::new(StdioConnector))
    }
}

impl McpManager {
    pub fn new(connector: Arc<dyn McpConnector>) -> Self {
        Self {
            connector,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            servers: BTreeMap::new(),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Connect all servers concurrently. Returns how many connected.
    pub async fn connect_all(&mut self, configs: &BTreeMap<String, McpServerConfig>) -> usize {
        let connector = &self.connector;
        let timeout = self.connect_timeout;
        let attempts = configs.iter().map(|(name, config)| async move {
            let outcome = match tokio::time::timeout(timeout, connector.connect(name, config)).await
            {
                Ok(Ok(connection)) => Ok(connection),
                Ok(Err(e)) => Err(format!("{e:#}")),
                Err(_) => Err(format!("connection timed out after {timeout:?}")),
            };
            (name.clone(), outcome)
        });

        let mut connected = 0;
        for (name, outcome) in join_all(attempts).await {
            let server = match outcome {
                Ok(connection) => {
                    connected += 1;
                    tracing::info!(server = %name, "MCP server connected");
                    ManagedServer {
                        connection: Some(connection),
                        status: ServerStatus::Connected,
                        tool_count: 0,
                        error: None,
                    }
                }
                Err(error) => {
                    tracing::warn!(server = %name, %error, "failed to connect MCP server");
                    ManagedServer {
                        connection: None,
                        status: ServerStatus::Error,
                        tool_count: 0,
                        error: Some(error),
                    }
                }
            };
            self.servers.insert(name, server);
        }
        connected
    }

    /// Tool adapters for every connected server. A server whose listing fails
    /// is demoted to `Error` and contributes nothing.
    pub async fn tools(&mut self) -> Vec<Arc<dyn Tool>> {
        let mut tools: Vec<Arc<dyn Tool>> = Vec::new();
        for (name, server) in self.servers.iter_mut() {
            if server.status != ServerStatus::Connected {
                continue;
            }
            let Some(connection) = server.connection.clone() else {
                continue;
            };
            match connection.list_tools().await {
                Ok(listed) => {
                    server.tool_count = listed.len();
                    tools.extend(listed.into_iter().map(|tool| {
                        Arc::new(McpToolAdapter::new(connection.clone(), name, tool))
                            as Arc<dyn Tool>
                    }));
                }
                Err(e) => {
                    tracing::warn!(server = %name, error = %e, "MCP tool listing failed");
                    server.status = ServerStatus::Error;
                    server.tool_count = 0;
                    server.error = Some(format!("{e:#}"));
                }
            }
        }
        tools
    }

    pub fn server_info(&self) -> Vec<McpServerInfo> {
        self.servers
            .iter()
            .map(|(name, server)| McpServerInfo {
                name: name.clone(),
                status: server.status,
                tool_count: server.tool_count,
                error: server.error.clone(),
            })
            .collect()
    }

    /// Close every open connection, ignoring individual failures. Servers that
    /// had a connection are left `Disconnected`.
    pub async fn shutdown(&mut self) {
        for (name, server) in self.servers.iter_mut() {
            let Some(connection) = server.connection.take() else {
                continue;
            };
            if let Err(e) = connection.close().await {
                tracing::warn!(server = %name, error = %e, "MCP server close failed");
            }
            server.status = ServerStatus::Disconnected;
            server.tool_count = 0;
        }
    }
}
