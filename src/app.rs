// ABOUTME: App orchestrator — wires providers, tools, MCP, permissions, sessions, and the agent loop.
// ABOUTME: Runs the agent in a background task and drives it from the line-mode REPL.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::mpsc;

use crate::agent::compaction::{self, ConversationCompressor};
use crate::agent::{AgentConfig, AgentEvent, AgentLoop, TurnOutcome, UserEvent};
use crate::config::Config;
use crate::mcp::{McpManager, McpServerInfo};
use crate::permissions::{ApprovalPrompt, PermissionChecker, PermissionGate};
use crate::prompt;
use crate::provider::ProviderRegistry;
use crate::repl::Repl;
use crate::session::{ConversationSession, SessionStore};
use crate::tools::ToolRegistry;

/// Startup choices from the command line.
#[derive(Debug, Clone, Default)]
pub struct AppOptions {
    pub model: Option<String>,
    pub resume: Option<String>,
    pub trust: bool,
    pub no_mcp: bool,
}

/// Top-level application that orchestrates all subsystems.
pub struct App {
    config: Config,
    options: AppOptions,
}

impl App {
    pub fn new(config: Config, options: AppOptions) -> Self {
        Self { config, options }
    }

    /// Set up subsystems, launch the agent task, and run the REPL until exit.
    pub async fn run(self) -> anyhow::Result<()> {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let providers = Arc::new(ProviderRegistry::from_config(&self.config.llm));

        let store = SessionStore::default();
        let session = match &self.options.resume {
            Some(id) => store
                .load(id)?
                .with_context(|| format!("no saved session named {id}"))?,
            None => {
                let model = self
                    .options
                    .model
                    .clone()
                    .unwrap_or_else(|| self.config.llm.default_model.clone());
                ConversationSession::new(model)
            }
        };
        let model = self
            .options
            .model
            .clone()
            .unwrap_or_else(|| session.model.clone());

        // Fails before any turn when no backend can serve the model.
        let provider = providers.for_model(&model)?;
        tracing::info!(%model, provider = %provider.kind(), "starting session {}", session.id);

        let mut tools = ToolRegistry::new();
        let mut mcp = McpManager::default();
        if !self.options.no_mcp {
            let servers = self.config.all_mcp_servers()?;
            if !servers.is_empty() {
                mcp.connect_all(&servers).await;
                for tool in mcp.tools().await {
                    tools.register(tool);
                }
            }
        }
        let tools = Arc::new(tools);

        let checker = Arc::new(PermissionChecker::new());
        if self.options.trust {
            checker.allow_all();
        }

        let (prompt_tx, prompt_rx) = mpsc::channel::<ApprovalPrompt>(4);
        let gate = PermissionGate::new(tools.clone(), checker.clone(), prompt_tx, cwd.clone())
            .with_approval_timeout(Duration::from_secs(
                self.config.permissions.approval_timeout_seconds,
            ))
            .with_tool_timeout(Duration::from_secs(
                self.config.permissions.tool_timeout_seconds,
            ));

        let agent = AgentLoop::new(
            provider,
            Arc::new(gate),
            AgentConfig {
                model: model.clone(),
                max_tokens: self.config.max_tokens_for(&model),
                temperature: self.config.llm.temperature,
                system_prompt: prompt::system_prompt_for(&cwd),
            },
        )
        .with_tools(tools.definitions())
        .with_history(session.messages.clone());

        let (user_tx, user_rx) = mpsc::channel::<UserEvent>(16);
        let (agent_tx, agent_rx) = mpsc::channel::<AgentEvent>(64);

        let task = AgentTask {
            agent,
            providers: providers.clone(),
            config: self.config.clone(),
            session,
            store,
            checker: checker.clone(),
            mcp_servers: mcp.server_info(),
        };
        let agent_handle = tokio::spawn(run_agent_task(task, user_rx, agent_tx));

        let repl = Repl {
            user_tx: user_tx.clone(),
            agent_rx,
            prompt_rx,
            checker,
            providers,
            model,
            tool_count: tools.len(),
        };
        let result = repl.run().await;

        // Signal agent to quit and wait for it.
        let _ = user_tx.send(UserEvent::Quit).await;
        drop(user_tx);
        if let Err(e) = agent_handle.await {
            tracing::error!(error = %e, "agent task failed");
        }

        mcp.shutdown().await;
        result
    }
}

/// Everything the background agent task owns.
pub struct AgentTask {
    pub agent: AgentLoop,
    pub providers: Arc<ProviderRegistry>,
    pub config: Config,
    pub session: ConversationSession,
    pub store: SessionStore,
    pub checker: Arc<PermissionChecker>,
    pub mcp_servers: Vec<McpServerInfo>,
}

/// Process user events until Quit or the channel closes.
///
/// Every handled event is followed by `AgentEvent::Ready`.
pub async fn run_agent_task(
    mut task: AgentTask,
    mut user_rx: mpsc::Receiver<UserEvent>,
    agent_tx: mpsc::Sender<AgentEvent>,
) {
    while let Some(event) = user_rx.recv().await {
        match event {
            UserEvent::Quit => break,
            UserEvent::Message { text, cancel } => {
                let outcome = task.agent.run_turn(&text, &agent_tx, &cancel).await;
                task.persist();
                if matches!(outcome, TurnOutcome::Completed { .. })
                    && compaction::needs_compaction(
                        task.agent.messages(),
                        task.agent.model(),
                        &task.config.compaction,
                    )
                {
                    task.compact(&agent_tx).await;
                }
            }
            UserEvent::SetModel(model) => {
                let reply = match task.switch_model(&model) {
                    Ok(notice) => AgentEvent::Notice(notice),
                    Err(e) => AgentEvent::Error(e.to_string()),
                };
                let _ = agent_tx.send(reply).await;
            }
            UserEvent::TogglePlan => {
                let enabled = task.agent.toggle_plan_mode();
                let notice = if enabled {
                    "Plan mode enabled. The assistant will propose a plan before acting."
                } else {
                    "Plan mode disabled."
                };
                let _ = agent_tx.send(AgentEvent::Notice(notice.to_string())).await;
            }
            UserEvent::Compact => task.compact(&agent_tx).await,
            UserEvent::Clear => {
                task.agent.clear_messages();
                task.session.clear();
                task.persist();
                let _ = agent_tx
                    .send(AgentEvent::Notice("Conversation cleared.".to_string()))
                    .await;
            }
            UserEvent::Status => {
                let _ = agent_tx.send(AgentEvent::Notice(task.status())).await;
            }
        }
        let _ = agent_tx.send(AgentEvent::Ready).await;
    }
    tracing::debug!("agent task exiting");
}

impl AgentTask {
    fn switch_model(&mut self, model: &str) -> anyhow::Result<String> {
        let provider = self.providers.for_model(model)?;
        let kind = provider.kind();
        self.agent.set_provider(provider);
        self.agent
            .set_model(model, Some(self.config.max_tokens_for(model)));
        self.session.model = model.to_string();
        Ok(format!("Model switched to: {model} ({kind})"))
    }

    async fn compact(&mut self, agent_tx: &mpsc::Sender<AgentEvent>) {
        let keep_recent = self.config.compaction.keep_recent;
        let before = self.agent.messages().len();
        if before <= keep_recent {
            let _ = agent_tx
                .send(AgentEvent::Notice("Nothing to compress yet.".to_string()))
                .await;
            return;
        }

        let compressor = ConversationCompressor::new(self.agent.provider().clone());
        match compressor
            .compress(self.agent.messages(), self.agent.model(), keep_recent)
            .await
        {
            Ok(compressed) => {
                let after = compressed.len();
                self.agent.replace_history(compressed);
                self.persist();
                let _ = agent_tx
                    .send(AgentEvent::Notice(format!(
                        "Conversation compressed ({before} -> {after} messages)."
                    )))
                    .await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "compression failed");
                let _ = agent_tx
                    .send(AgentEvent::Error(format!("Compression failed: {e:#}")))
                    .await;
            }
        }
    }

    fn status(&self) -> String {
        let mut lines = vec![
            format!("Session: {}", self.session.id),
            format!("Model: {}", self.agent.model()),
            format!("Provider: {}", self.agent.provider().kind()),
            format!("Messages: {}", self.agent.messages().len()),
            format!(
                "Plan mode: {}",
                if self.agent.plan_mode() { "on" } else { "off" }
            ),
        ];
        let allowed = self.checker.allowed();
        lines.push(if allowed.is_empty() {
            "Session allowances: none".to_string()
        } else {
            format!("Session allowances: {}", allowed.join(", "))
        });
        for server in &self.mcp_servers {
            let mut line = format!(
                "MCP {}: {} ({} tools)",
                server.name, server.status, server.tool_count
            );
            if let Some(error) = &server.error {
                line.push_str(&format!(" - {error}"));
            }
            lines.push(line);
        }
        lines.join("\n")
    }

    fn persist(&mut self) {
        self.session.set_messages(self.agent.messages().to_vec());
        self.session.model = self.agent.model().to_string();
        if let Err(e) = self.store.save(&self.session) {
            tracing::warn!(error = %e, "failed to save session");
        }
    }
}
