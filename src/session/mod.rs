// ABOUTME: Session module — conversation sessions persisted to disk between runs.
// ABOUTME: One pretty-printed JSON file per session under the sessions directory.

pub mod persistence;

pub use persistence::{ConversationSession, SessionStore, SessionSummary};
