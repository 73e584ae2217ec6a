// ABOUTME: Permission policy decision logic for tool invocations.
// ABOUTME: Session allowances override the tool's level; otherwise the level decides.

use super::types::{PermissionDecision, PermissionLevel};

/// Evaluate the permission policy for a tool invocation.
///
/// `all_allowed` is the session-wide wildcard and `tool_allowed` whether this
/// tool matches a session allowance.
pub fn evaluate_permission(
    level: PermissionLevel,
    all_allowed: bool,
    tool_allowed: bool,
) -> PermissionDecision {
    // Rule 1: the wildcard allows everything.
    if all_allowed {
        return PermissionDecision::Allow;
    }

    // Rule 2: a per-tool allowance beats the tool's level.
    if tool_allowed {
        return PermissionDecision::Allow;
    }

    match level {
        PermissionLevel::Safe => PermissionDecision::Allow,
        PermissionLevel::Ask => PermissionDecision::Ask,
        PermissionLevel::Dangerous => PermissionDecision::Deny,
    }
}
