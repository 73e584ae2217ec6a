// ABOUTME: Session-scoped permission checker with a mutex-guarded allow-list.
// ABOUTME: Entries are tool names, glob patterns over tool names, or the "*" wildcard.

use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard};

use super::policy::evaluate_permission;
use super::types::{PermissionDecision, PermissionRequest};

pub const ALLOW_ALL: &str = "*";

/// Decides whether a tool call may run. Never executes tools and never blocks
/// beyond the allow-list lock.
#[derive(Debug, Default)]
pub struct PermissionChecker {
    allowed: Mutex<BTreeSet<String>>,
}

impl PermissionChecker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decide(&self, request: &PermissionRequest) -> PermissionDecision {
        let allowed = self.lock();
        let all_allowed = allowed.contains(ALLOW_ALL);
        let tool_allowed = !all_allowed && matches_any(&allowed, &request.tool_name);
        drop(allowed);

        let decision = evaluate_permission(request.permission_level, all_allowed, tool_allowed);
        tracing::debug!(
            tool = %request.tool_name,
            level = %request.permission_level,
            ?decision,
            "permission decided"
        );
        decision
    }

    /// Allow a tool name or glob pattern for the rest of the session.
    pub fn allow_for_session(&self, tool: &str) {
        self.lock().insert(tool.to_string());
    }

    pub fn allow_all(&self) {
        self.lock().insert(ALLOW_ALL.to_string());
    }

    /// Remove one allow-list entry. Returns whether it was present.
    pub fn revoke_for_session(&self, tool: &str) -> bool {
        self.lock().remove(tool)
    }

    pub fn revoke_all(&self) {
        self.lock().clear();
    }

    pub fn is_all_allowed(&self) -> bool {
        self.lock().contains(ALLOW_ALL)
    }

    /// Current allow-list entries, sorted.
    pub fn allowed(&self) -> Vec<String> {
        self.lock().iter().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeSet<String>> {
        self.allowed.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn matches_any(entries: &BTreeSet<String>, tool_name: &str) -> bool {
    if entries.contains(tool_name) {
        return true;
    }
    entries
        .iter()
        .filter(|entry| entry.contains(['*', '?', '[']))
        .any(|entry| match glob::Pattern::new(entry) {
            Ok(pattern) => pattern.matches(tool_name),
            Err(e) => {
                tracing::debug!(entry = %entry, error = %e, "ignoring invalid allow-list pattern");
                false
            }
        })
}
