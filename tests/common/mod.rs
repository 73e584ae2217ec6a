// ABOUTME: Shared test doubles — scripted provider, recording executor, stub tools, fake MCP servers.
// ABOUTME: Included by integration tests via `mod common;`.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use localclaw::config::McpServerConfig;
use localclaw::mcp::protocol::{McpToolCallResult, McpToolDefinition};
use localclaw::mcp::{McpConnection, McpConnector};
use localclaw::permissions::PermissionLevel;
use localclaw::provider::{
    EventStream, Message, Provider, ProviderKind, ProviderOptions, StreamEvent, ToolCall,
    ToolDefinition,
};
use localclaw::tools::{Tool, ToolContext, ToolExecutor, ToolResult};

/// One scripted stream response.
pub enum Script {
    /// Emit the events, then end.
    Events(Vec<StreamEvent>),
    /// Emit the events, then never yield again.
    Hang(Vec<StreamEvent>),
}

/// A provider that replays canned streams in order and records every request.
pub struct ScriptedProvider {
    scripts: Mutex<VecDeque<Script>>,
    summary: Result<String, String>,
    pub stream_calls: Mutex<Vec<(Vec<Message>, ProviderOptions)>>,
    pub complete_calls: Mutex<Vec<(Vec<Message>, ProviderOptions)>>,
}

impl ScriptedProvider {
    pub fn new(scripts: Vec<Vec<StreamEvent>>) -> Self {
        Self::with_scripts(scripts.into_iter().map(Script::Events).collect())
    }

    pub fn with_scripts(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            summary: Ok("summary".to_string()),
            stream_calls: Mutex::new(Vec::new()),
            complete_calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_summary(mut self, summary: Result<&str, &str>) -> Self {
        self.summary = summary.map(str::to_string).map_err(str::to_string);
        self
    }

    pub fn stream_count(&self) -> usize {
        self.stream_calls.lock().unwrap().len()
    }

    pub fn last_stream_call(&self) -> (Vec<Message>, ProviderOptions) {
        self.stream_calls
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no stream calls recorded")
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    fn stream(&self, messages: &[Message], options: &ProviderOptions) -> EventStream {
        self.stream_calls
            .lock()
            .unwrap()
            .push((messages.to_vec(), options.clone()));
        match self.scripts.lock().unwrap().pop_front() {
            Some(Script::Events(events)) => Box::pin(futures::stream::iter(events)),
            Some(Script::Hang(events)) => {
                Box::pin(futures::stream::iter(events).chain(futures::stream::pending()))
            }
            None => Box::pin(futures::stream::iter(vec![StreamEvent::error(
                "no scripted response left",
            )])),
        }
    }

    async fn complete(
        &self,
        messages: &[Message],
        options: &ProviderOptions,
    ) -> anyhow::Result<Message> {
        self.complete_calls
            .lock()
            .unwrap()
            .push((messages.to_vec(), options.clone()));
        match &self.summary {
            Ok(text) => Ok(Message::assistant(text.clone())),
            Err(message) => Err(anyhow::anyhow!("{message}")),
        }
    }
}

pub fn text(text: &str) -> StreamEvent {
    StreamEvent::TextDelta {
        text: text.to_string(),
    }
}

/// A complete tool call as the provider streams it, with the input split in two.
pub fn tool_call(id: &str, name: &str, input: &str) -> Vec<StreamEvent> {
    let mid = input.len() / 2;
    let (head, tail) = input.split_at(mid);
    vec![
        StreamEvent::ToolCallStart {
            id: id.to_string(),
            name: name.to_string(),
        },
        StreamEvent::ToolCallDelta {
            id: id.to_string(),
            input_fragment: head.to_string(),
        },
        StreamEvent::ToolCallDelta {
            id: id.to_string(),
            input_fragment: tail.to_string(),
        },
        StreamEvent::ToolCallEnd {
            id: id.to_string(),
            name: name.to_string(),
        },
    ]
}

/// An executor that records calls and answers from canned results.
#[derive(Default)]
pub struct RecordingExecutor {
    pub calls: Mutex<Vec<ToolCall>>,
    results: HashMap<String, ToolResult>,
    /// Cancel this token while running the named tool.
    cancel_on: Option<(String, CancellationToken)>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_result(mut self, tool: &str, result: ToolResult) -> Self {
        self.results.insert(tool.to_string(), result);
        self
    }

    pub fn cancelling_on(mut self, tool: &str, token: CancellationToken) -> Self {
        self.cancel_on = Some((tool.to_string(), token));
        self
    }

    pub fn names(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.name.clone())
            .collect()
    }
}

#[async_trait]
impl ToolExecutor for RecordingExecutor {
    async fn execute(&self, call: &ToolCall, _cancel: &CancellationToken) -> ToolResult {
        self.calls.lock().unwrap().push(call.clone());
        if let Some((tool, token)) = &self.cancel_on {
            if *tool == call.name {
                token.cancel();
            }
        }
        self.results
            .get(&call.name)
            .cloned()
            .unwrap_or_else(|| ToolResult::ok(format!("ran {}", call.name)))
    }
}

/// A tool with a fixed level that echoes its input, or waits for cancellation.
pub struct StubTool {
    pub name: String,
    pub level: PermissionLevel,
    pub delay: Option<Duration>,
}

impl StubTool {
    pub fn new(name: &str, level: PermissionLevel) -> Self {
        Self {
            name: name.to_string(),
            level,
            delay: None,
        }
    }

    pub fn slow(name: &str, level: PermissionLevel, delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::new(name, level)
        }
    }
}

#[async_trait]
impl Tool for StubTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: format!("stub {}", self.name),
            input_schema: json!({"type": "object"}),
        }
    }

    fn permission_level(&self) -> PermissionLevel {
        self.level
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> anyhow::Result<ToolResult> {
        if let Some(delay) = self.delay {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = ctx.cancellation.cancelled() => return Ok(ToolResult::failure("stopped")),
            }
        }
        Ok(ToolResult::ok(format!("{} {}", self.name, input)))
    }
}

/// How a fake MCP server behaves.
#[derive(Clone)]
pub enum FakeServer {
    Tools(Vec<&'static str>),
    ConnectFails(&'static str),
    ConnectHangs,
    ListFails,
    CloseFails(Vec<&'static str>),
}

#[derive(Default)]
pub struct FakeConnector {
    servers: HashMap<String, FakeServer>,
    pub closed: Arc<Mutex<Vec<String>>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn server(mut self, name: &str, behaviour: FakeServer) -> Self {
        self.servers.insert(name.to_string(), behaviour);
        self
    }

    /// Matching config map for `McpManager::connect_all`.
    pub fn configs(&self) -> BTreeMap<String, McpServerConfig> {
        self.servers
            .keys()
            .map(|name| {
                (
                    name.clone(),
                    McpServerConfig {
                        command: format!("{name}-server"),
                        args: Vec::new(),
                        env: BTreeMap::new(),
                    },
                )
            })
            .collect()
    }
}

#[async_trait]
impl McpConnector for FakeConnector {
    async fn connect(
        &self,
        name: &str,
        _config: &McpServerConfig,
    ) -> anyhow::Result<Arc<dyn McpConnection>> {
        let behaviour = self
            .servers
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("unknown server {name}"))?;
        let (tools, list_fails, close_fails) = match behaviour {
            FakeServer::Tools(tools) => (tools, false, false),
            FakeServer::ConnectFails(message) => anyhow::bail!("{message}"),
            FakeServer::ConnectHangs => return futures::future::pending().await,
            FakeServer::ListFails => (Vec::new(), true, false),
            FakeServer::CloseFails(tools) => (tools, false, true),
        };
        Ok(Arc::new(FakeConnection {
            name: name.to_string(),
            tools,
            list_fails,
            close_fails,
            closed: self.closed.clone(),
        }))
    }
}

pub struct FakeConnection {
    name: String,
    tools: Vec<&'static str>,
    list_fails: bool,
    close_fails: bool,
    closed: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl McpConnection for FakeConnection {
    async fn list_tools(&self) -> anyhow::Result<Vec<McpToolDefinition>> {
        if self.list_fails {
            anyhow::bail!("tools/list failed");
        }
        Ok(self
            .tools
            .iter()
            .map(|name| McpToolDefinition {
                name: name.to_string(),
                description: Some(format!("{name} tool")),
                input_schema: Some(json!({"type": "object"})),
            })
            .collect())
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> anyhow::Result<McpToolCallResult> {
        Ok(McpToolCallResult::text(format!(
            "{}:{name} {arguments}",
            self.name
        )))
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.closed.lock().unwrap().push(self.name.clone());
        if self.close_fails {
            anyhow::bail!("close failed");
        }
        Ok(())
    }
}
