// ABOUTME: Name-keyed tool dispatch table, insertion-ordered.
// ABOUTME: Unknown names, tool errors, and tool panics all come back as failed results.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::Value;

use super::{Tool, ToolContext, ToolResult};
use crate::provider::ToolDefinition;

#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool. A tool with the same name is replaced in place.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name();
        match self.index.get(&name) {
            Some(&slot) => {
                tracing::debug!(tool = %name, "replacing registered tool");
                self.tools[slot] = tool;
            }
            None => {
                self.index.insert(name, self.tools.len());
                self.tools.push(tool);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.index.get(name).map(|&slot| self.tools[slot].clone())
    }

    pub fn has(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Registered tool names in registration order.
    pub fn list(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Run `name` with `input`. Never panics and never returns an error.
    pub async fn execute(&self, name: &str, input: Value, ctx: &ToolContext) -> ToolResult {
        let Some(tool) = self.get(name) else {
            return unknown_tool(name);
        };
        run_guarded(tool.as_ref(), input, ctx).await
    }
}

pub(crate) fn unknown_tool(name: &str) -> ToolResult {
    ToolResult::failure(format!("Unknown tool: {name}"))
}

/// Execute one tool, converting errors and panics into failed results.
pub(crate) async fn run_guarded(tool: &dyn Tool, input: Value, ctx: &ToolContext) -> ToolResult {
    let name = tool.name();
    match AssertUnwindSafe(tool.execute(input, ctx)).catch_unwind().await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            tracing::debug!(tool = %name, error = %e, "tool returned an error");
            ToolResult::failure(format!("{e:#}"))
        }
        Err(panic) => {
            let detail = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::error!(tool = %name, %detail, "tool panicked");
            ToolResult::failure(format!("Tool '{name}' panicked: {detail}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permissions::PermissionLevel;
    use async_trait::async_trait;
    use serde_json::json;

    struct Echo {
        name: &'static str,
        description: &'static str,
    }

    #[async_trait]
    impl Tool for Echo {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: self.name.to_string(),
                description: self.description.to_string(),
                input_schema: json!({"type": "object"}),
            }
        }

        fn permission_level(&self) -> PermissionLevel {
            PermissionLevel::Safe
        }

        async fn execute(&self, input: Value, _ctx: &ToolContext) -> anyhow::Result<ToolResult> {
            match input.get("mode").and_then(Value::as_str) {
                Some("fail") => anyhow::bail!("disk on fire"),
                Some("panic") => panic!("tool exploded"),
                _ => Ok(ToolResult::ok(format!("{}:{}", self.name, input))),
            }
        }
    }

    fn echo(name: &'static str) -> Arc<dyn Tool> {
        Arc::new(Echo {
            name,
            description: "echo",
        })
    }

    fn ctx() -> ToolContext {
        ToolContext::new(".")
    }

    #[test]
    fn registration_preserves_order_and_replaces_by_name() {
        let mut registry = ToolRegistry::new();
        registry.register(echo("glob"));
        registry.register(echo("read"));
        registry.register(Arc::new(Echo {
            name: "glob",
            description: "replacement",
        }));

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.list(), vec!["glob", "read"]);
        assert_eq!(registry.definitions()[0].description, "replacement");
        assert!(registry.has("read"));
        assert!(!registry.has("write"));
    }

    #[tokio::test]
    async fn unknown_tool_is_a_failed_result() {
        let registry = ToolRegistry::new();
        let result = registry.execute("nope", json!({}), &ctx()).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Unknown tool: nope"));
    }

    #[tokio::test]
    async fn dispatches_to_named_tool() {
        let mut registry = ToolRegistry::new();
        registry.register(echo("glob"));
        let result = registry.execute("glob", json!({"p": 1}), &ctx()).await;
        assert!(result.success);
        assert_eq!(result.output, r#"glob:{"p":1}"#);
    }

    #[tokio::test]
    async fn tool_error_becomes_failed_result() {
        let mut registry = ToolRegistry::new();
        registry.register(echo("glob"));
        let result = registry
            .execute("glob", json!({"mode": "fail"}), &ctx())
            .await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("disk on fire"));
    }

    #[tokio::test]
    async fn tool_panic_becomes_failed_result() {
        let mut registry = ToolRegistry::new();
        registry.register(echo("glob"));
        let result = registry
            .execute("glob", json!({"mode": "panic"}), &ctx())
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("tool exploded"));
    }
}
