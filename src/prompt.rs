// ABOUTME: Layered system prompt builder — assembles base, tool guidance, environment, and local notes.
// ABOUTME: Compiled-in defaults can be replaced by files in ~/.localclaw/ or extended per project.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::Config;

const DEFAULT_BASE: &str = "You are localclaw, a coding assistant running in the user's terminal. \
You help with software engineering tasks: reading and changing code, running commands, and explaining what you find. \
Be direct and concise. Prefer small, verifiable steps, and say plainly when you are unsure.";

const DEFAULT_TOOLS: &str = "# Tools\n\
Use tools when they help answer the question; don't guess at file contents you can read. \
Tool calls may require the user's approval and can be denied. When a tool fails or is denied, \
read the error, adjust, and explain what happened instead of retrying the same call.";

pub const LOCAL_FILE_NAME: &str = ".localclaw.md";

/// Reads a file if it exists, returning None otherwise.
pub fn read_if_exists(path: &Path) -> Option<String> {
    if !path.exists() {
        return None;
    }
    match fs::read_to_string(path) {
        Ok(content) => Some(content),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to read prompt file");
            None
        }
    }
}

#[derive(Debug, Clone)]
pub struct SystemPromptBuilder {
    pub base: String,
    pub tools: String,
    pub environment: Option<String>,
    pub local: Option<String>,
}

impl SystemPromptBuilder {
    /// Creates a new builder loaded with the compiled-in defaults.
    pub fn new() -> Self {
        Self {
            base: DEFAULT_BASE.to_string(),
            tools: DEFAULT_TOOLS.to_string(),
            environment: None,
            local: None,
        }
    }

    /// Replace layers from `system.md` and `tools.md` in ~/.localclaw/.
    pub fn load_overrides(&mut self) -> &mut Self {
        self.load_overrides_from(&Config::base_dir())
    }

    pub fn load_overrides_from(&mut self, dir: &Path) -> &mut Self {
        if let Some(content) = read_if_exists(&dir.join("system.md")) {
            self.base = content;
        }
        if let Some(content) = read_if_exists(&dir.join("tools.md")) {
            self.tools = content;
        }
        self
    }

    /// Pick up project notes from `.localclaw.md` in `dir`.
    pub fn load_local_from(&mut self, dir: &Path) -> &mut Self {
        self.local = read_if_exists(&dir.join(LOCAL_FILE_NAME));
        self
    }

    pub fn working_directory(&mut self, dir: &Path) -> &mut Self {
        self.environment = Some(format!("Working directory: {}", dir.display()));
        self
    }

    /// Concatenates all non-empty layers separated by `"\n\n"`.
    pub fn build(&self) -> String {
        [
            Some(self.base.as_str()),
            Some(self.tools.as_str()),
            self.environment.as_deref(),
            self.local.as_deref(),
        ]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
    }
}

impl Default for SystemPromptBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The prompt used by the binary: defaults, user overrides, then project notes from `cwd`.
pub fn system_prompt_for(cwd: &Path) -> String {
    SystemPromptBuilder::new()
        .load_overrides()
        .working_directory(cwd)
        .load_local_from(cwd)
        .build()
}

/// Where project-local notes are looked up for `cwd`.
pub fn local_notes_path(cwd: &Path) -> PathBuf {
    cwd.join(LOCAL_FILE_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_contain_base_and_tool_guidance() {
        let prompt = SystemPromptBuilder::new().build();
        assert!(prompt.starts_with("You are localclaw"));
        assert!(prompt.contains("# Tools"));
    }

    #[test]
    fn build_skips_empty_layers() {
        let mut builder = SystemPromptBuilder::new();
        builder.tools = "   ".to_string();
        let prompt = builder.build();
        assert!(!prompt.contains("# Tools"));
        assert!(!prompt.contains("\n\n\n"));
    }

    #[test]
    fn override_replaces_layer() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("system.md"), "You are a pirate assistant.").unwrap();
        let prompt = SystemPromptBuilder::new()
            .load_overrides_from(dir.path())
            .build();
        assert!(prompt.starts_with("You are a pirate assistant."));
        assert!(prompt.contains("# Tools"));
    }

    #[test]
    fn local_notes_come_last() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(local_notes_path(dir.path()), "This project uses tokio.").unwrap();
        let prompt = SystemPromptBuilder::new()
            .working_directory(dir.path())
            .load_local_from(dir.path())
            .build();
        assert!(prompt.ends_with("This project uses tokio."));
        assert!(prompt.contains("Working directory: "));
    }
}
