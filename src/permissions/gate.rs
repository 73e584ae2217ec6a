// ABOUTME: Permission gate — the agent loop's tool executor.
// ABOUTME: Looks up the tool, consults the checker, prompts the caller on Ask, runs with a timeout.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::{
    ApprovalDecision, ApprovalPrompt, PermissionChecker, PermissionDecision, PermissionRequest,
};
use crate::provider::ToolCall;
use crate::tools::registry::{run_guarded, unknown_tool};
use crate::tools::{ToolContext, ToolExecutor, ToolRegistry, ToolResult};

pub const PERMISSION_DENIED: &str = "Permission denied";

const DEFAULT_APPROVAL_TIMEOUT: Duration = Duration::from_secs(120);
const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(300);

/// How an approval wait ended.
#[derive(Debug, PartialEq, Eq)]
enum ApprovalWait {
    Decided(ApprovalDecision),
    TimedOut,
    Cancelled,
}

pub struct PermissionGate {
    registry: Arc<ToolRegistry>,
    checker: Arc<PermissionChecker>,
    prompts: mpsc::Sender<ApprovalPrompt>,
    working_directory: PathBuf,
    approval_timeout: Duration,
    tool_timeout: Duration,
}

impl PermissionGate {
    pub fn new(
        registry: Arc<ToolRegistry>,
        checker: Arc<PermissionChecker>,
        prompts: mpsc::Sender<ApprovalPrompt>,
        working_directory: impl Into<PathBuf>,
    ) -> Self {
        Self {
            registry,
            checker,
            prompts,
            working_directory: working_directory.into(),
            approval_timeout: DEFAULT_APPROVAL_TIMEOUT,
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    pub fn with_approval_timeout(mut self, timeout: Duration) -> Self {
        self.approval_timeout = timeout;
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    /// Ask the caller and wait for an answer, the approval timeout, or cancellation.
    async fn ask(&self, request: PermissionRequest, cancel: &CancellationToken) -> ApprovalWait {
        let (tx, rx) = oneshot::channel();
        let prompt = ApprovalPrompt {
            request,
            responder: tx,
        };
        if self.prompts.send(prompt).await.is_err() {
            tracing::warn!("approval channel closed, denying tool call");
            return ApprovalWait::Decided(ApprovalDecision::Deny);
        }

        tokio::select! {
            _ = cancel.cancelled() => ApprovalWait::Cancelled,
            answer = tokio::time::timeout(self.approval_timeout, rx) => match answer {
                Ok(Ok(decision)) => ApprovalWait::Decided(decision),
                // Responder dropped without answering.
                Ok(Err(_)) => ApprovalWait::Decided(ApprovalDecision::Deny),
                Err(_) => ApprovalWait::TimedOut,
            },
        }
    }

    fn record(&self, tool_name: &str, decision: ApprovalDecision) {
        match decision {
            ApprovalDecision::AllowForSession => self.checker.allow_for_session(tool_name),
            ApprovalDecision::AllowAll => self.checker.allow_all(),
            ApprovalDecision::AllowOnce | ApprovalDecision::Deny => {}
        }
    }
}

#[async_trait]
impl ToolExecutor for PermissionGate {
    async fn execute(&self, call: &ToolCall, cancel: &CancellationToken) -> ToolResult {
        let Some(tool) = self.registry.get(&call.name) else {
            return unknown_tool(&call.name);
        };

        let request = PermissionRequest {
            tool_name: call.name.clone(),
            input: call.input.clone(),
            permission_level: tool.permission_level(),
        };

        match self.checker.decide(&request) {
            PermissionDecision::Allow => {}
            PermissionDecision::Deny => return ToolResult::failure(PERMISSION_DENIED),
            PermissionDecision::Ask => match self.ask(request, cancel).await {
                ApprovalWait::Decided(decision) if decision.is_allowed() => {
                    self.record(&call.name, decision);
                }
                ApprovalWait::Decided(_) => return ToolResult::failure(PERMISSION_DENIED),
                ApprovalWait::TimedOut => {
                    tracing::info!(tool = %call.name, "approval timed out");
                    return ToolResult::failure(format!("{PERMISSION_DENIED}: approval timed out"));
                }
                ApprovalWait::Cancelled => return ToolResult::failure("Cancelled"),
            },
        }

        let child = cancel.child_token();
        let ctx = ToolContext::new(self.working_directory.clone()).with_cancellation(child.clone());

        tokio::select! {
            result = run_guarded(tool.as_ref(), call.input.clone(), &ctx) => result,
            _ = tokio::time::sleep(self.tool_timeout) => {
                child.cancel();
                tracing::warn!(tool = %call.name, timeout = ?self.tool_timeout, "tool timed out");
                ToolResult::failure(format!(
                    "Tool '{}' timed out after {:?}",
                    call.name, self.tool_timeout
                ))
            }
            _ = cancel.cancelled() => ToolResult::failure("Cancelled"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permissions::PermissionLevel;
    use crate::provider::ToolDefinition;
    use crate::tools::Tool;
    use serde_json::{Value, json};

    struct Fixed(PermissionLevel);

    #[async_trait]
    impl Tool for Fixed {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "write".into(),
                description: "write a file".into(),
                input_schema: json!({"type": "object"}),
            }
        }

        fn permission_level(&self) -> PermissionLevel {
            self.0
        }

        async fn execute(&self, _input: Value, _ctx: &ToolContext) -> anyhow::Result<ToolResult> {
            Ok(ToolResult::ok("written"))
        }
    }

    fn gate(level: PermissionLevel) -> (PermissionGate, mpsc::Receiver<ApprovalPrompt>) {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Fixed(level)));
        let (tx, rx) = mpsc::channel(4);
        let gate = PermissionGate::new(
            Arc::new(registry),
            Arc::new(PermissionChecker::new()),
            tx,
            ".",
        );
        (gate, rx)
    }

    fn call(name: &str) -> ToolCall {
        ToolCall {
            id: "t1".into(),
            name: name.into(),
            input: json!({"path": "a.txt"}),
        }
    }

    #[tokio::test]
    async fn unknown_tool_short_circuits() {
        let (gate, _rx) = gate(PermissionLevel::Safe);
        let result = gate.execute(&call("nope"), &CancellationToken::new()).await;
        assert_eq!(result.error.as_deref(), Some("Unknown tool: nope"));
    }

    #[tokio::test]
    async fn dangerous_tool_is_denied_without_prompting() {
        let (gate, mut rx) = gate(PermissionLevel::Dangerous);
        let result = gate.execute(&call("write"), &CancellationToken::new()).await;
        assert_eq!(result.error.as_deref(), Some(PERMISSION_DENIED));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn allow_for_session_stops_further_prompts() {
        let (gate, mut rx) = gate(PermissionLevel::Ask);
        let answer = tokio::spawn(async move {
            let prompt = rx.recv().await.unwrap();
            assert_eq!(prompt.request.tool_name, "write");
            prompt
                .responder
                .send(ApprovalDecision::AllowForSession)
                .unwrap();
            rx
        });

        let result = gate.execute(&call("write"), &CancellationToken::new()).await;
        assert!(result.success);
        let mut rx = answer.await.unwrap();

        let again = gate.execute(&call("write"), &CancellationToken::new()).await;
        assert!(again.success);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn approval_timeout_denies() {
        let (gate, _rx) = gate(PermissionLevel::Ask);
        let gate = gate.with_approval_timeout(Duration::from_millis(20));
        let result = gate.execute(&call("write"), &CancellationToken::new()).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("timed out"));
    }
}
