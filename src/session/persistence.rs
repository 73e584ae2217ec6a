// ABOUTME: Session persistence — save and load full conversations as JSON.
// ABOUTME: Writes are atomic via tmp + rename; listing sorts by last update.

use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::provider::Message;

/// A conversation and its metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSession {
    pub id: String,
    pub model: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub messages: Vec<Message>,
}

impl ConversationSession {
    pub fn new(model: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: generate_id(now),
            model: model.into(),
            created_at: now,
            updated_at: now,
            messages: Vec::new(),
        }
    }

    pub fn add_message(&mut self, message: Message) {
        self.messages.push(message);
        self.touch();
    }

    /// Replace all messages, e.g. after the loop finishes a turn or compresses.
    pub fn set_messages(&mut self, messages: Vec<Message>) {
        self.messages = messages;
        self.touch();
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

fn generate_id(now: DateTime<Utc>) -> String {
    format!(
        "session-{}-{:06x}",
        now.format("%Y%m%d-%H%M%S"),
        now.timestamp_subsec_nanos() & 0xff_ffff
    )
}

/// Listing entry for a saved session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub id: String,
    pub model: String,
    pub updated_at: DateTime<Utc>,
    pub message_count: usize,
}

/// Directory of saved sessions.
#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(Config::sessions_dir())
    }
}

impl SessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> anyhow::Result<PathBuf> {
        if id.is_empty() || id.contains(['/', '\\']) || id.contains("..") {
            anyhow::bail!("invalid session id: {id:?}");
        }
        Ok(self.dir.join(format!("{id}.json")))
    }

    /// Save a session (atomic write via tmp + rename).
    pub fn save(&self, session: &ConversationSession) -> anyhow::Result<PathBuf> {
        let path = self.path_for(&session.id)?;
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create {}", self.dir.display()))?;
        let tmp_path = path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(session)?;
        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, &path)
            .with_context(|| format!("failed to replace {}", path.display()))?;
        Ok(path)
    }

    /// Load a session by id, if it exists.
    pub fn load(&self, id: &str) -> anyhow::Result<Option<ConversationSession>> {
        let path = self.path_for(id)?;
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let session = serde_json::from_str(&content)
            .with_context(|| format!("corrupt session file {}", path.display()))?;
        Ok(Some(session))
    }

    /// Most recently updated sessions first. Unreadable files are skipped.
    pub fn list_recent(&self, limit: usize) -> anyhow::Result<Vec<SessionSummary>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut sessions = Vec::new();
        for entry in std::fs::read_dir(&self.dir)
            .with_context(|| format!("failed to list {}", self.dir.display()))?
        {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let parsed = std::fs::read_to_string(&path)
                .map_err(anyhow::Error::from)
                .and_then(|c| Ok(serde_json::from_str::<ConversationSession>(&c)?));
            match parsed {
                Ok(s) => sessions.push(SessionSummary {
                    id: s.id,
                    model: s.model,
                    updated_at: s.updated_at,
                    message_count: s.messages.len(),
                }),
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = %e, "skipping unreadable session")
                }
            }
        }
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        sessions.truncate(limit);
        Ok(sessions)
    }
}
