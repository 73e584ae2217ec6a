// ABOUTME: Core types for tool permission gating.
// ABOUTME: PermissionLevel, PermissionDecision, requests, and the user's approval answer.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;

/// How much scrutiny a tool needs before it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionLevel {
    /// Runs without asking.
    Safe,
    /// Needs a user decision unless allowed for the session.
    Ask,
    /// Refused unless allowed for the session.
    Dangerous,
}

impl fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PermissionLevel::Safe => "safe",
            PermissionLevel::Ask => "ask",
            PermissionLevel::Dangerous => "dangerous",
        })
    }
}

/// The checker's verdict for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionDecision {
    Allow,
    Deny,
    Ask,
}

/// A tool invocation awaiting a permission decision.
#[derive(Debug, Clone, PartialEq)]
pub struct PermissionRequest {
    pub tool_name: String,
    pub input: Value,
    pub permission_level: PermissionLevel,
}

impl PermissionRequest {
    /// One-line summary for prompts, with the input truncated.
    pub fn describe(&self) -> String {
        let params = self.input.to_string();
        let truncated = if params.chars().count() > 80 {
            let head: String = params.chars().take(80).collect();
            format!("{head}...")
        } else {
            params
        };
        format!("{}({})", self.tool_name, truncated)
    }
}

/// The user's answer to an approval prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalDecision {
    /// Run this one invocation.
    AllowOnce,
    /// Run it and stop asking about this tool for the session.
    AllowForSession,
    /// Run it and stop asking about any tool for the session.
    AllowAll,
    Deny,
}

impl ApprovalDecision {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, ApprovalDecision::Deny)
    }
}

/// Sent to the caller when a tool needs approval.
#[derive(Debug)]
pub struct ApprovalPrompt {
    pub request: PermissionRequest,
    pub responder: oneshot::Sender<ApprovalDecision>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn permission_level_serde_is_lowercase() {
        let json = serde_json::to_string(&PermissionLevel::Dangerous).unwrap();
        assert_eq!(json, "\"dangerous\"");
        let parsed: PermissionLevel = serde_json::from_str("\"ask\"").unwrap();
        assert_eq!(parsed, PermissionLevel::Ask);
    }

    #[test]
    fn describe_truncates_long_input() {
        let request = PermissionRequest {
            tool_name: "bash".into(),
            input: json!({"command": "x".repeat(200)}),
            permission_level: PermissionLevel::Dangerous,
        };
        let description = request.describe();
        assert!(description.starts_with("bash({\"command\""));
        assert!(description.ends_with("...)"));
        assert!(description.len() < 100);
    }

    #[test]
    fn only_deny_is_not_allowed() {
        assert!(ApprovalDecision::AllowOnce.is_allowed());
        assert!(ApprovalDecision::AllowAll.is_allowed());
        assert!(!ApprovalDecision::Deny.is_allowed());
    }
}
