//! Conversation session storage.
//!
//! A session is keyed by an opaque id under a route name (`document_qa_chat`,
//! `document_analysis`, ...). Records hold the ordered conversation plus any pipeline results
//! stored against the session.

mod local;
mod memory;

pub use local::LocalSessionStore;
pub use memory::MemorySessionStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Storage backend selected by `[sessions].backend`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionBackend {
    /// Process memory only.
    Memory,
    /// One JSON file per session under `paths.sessions_dir`.
    Local,
}

/// Errors raised by session stores.
#[derive(Debug, Error)]
pub enum SessionError {
    /// No record exists for the id.
    #[error("session '{session_id}' not found")]
    NotFound {
        /// Requested session id.
        session_id: String,
    },
    /// The session was ended and no longer accepts turns.
    #[error("session '{session_id}' has ended")]
    Ended {
        /// Requested session id.
        session_id: String,
    },
    /// Reading or writing a session file failed.
    #[error("session file {path} failed: {source}")]
    Io {
        /// File involved.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A session file did not contain a valid record.
    #[error("session file {path} is corrupt: {source}")]
    Corrupt {
        /// File involved.
        path: PathBuf,
        /// Decoder error.
        #[source]
        source: serde_json::Error,
    },
}

/// One question/answer exchange.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationEntry {
    /// RFC 3339 time the answer was produced.
    pub timestamp: String,
    /// Question as asked by the user.
    pub question: String,
    /// Answer returned to the user.
    pub answer: String,
    /// Files uploaded together with this question.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploaded_files: Option<Vec<String>>,
}

impl ConversationEntry {
    /// Entry stamped with the current time.
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            timestamp: now_rfc3339(),
            question: question.into(),
            answer: answer.into(),
            uploaded_files: None,
        }
    }

    /// Attach the names of files uploaded with the question.
    pub fn with_uploads(mut self, files: Vec<String>) -> Self {
        if !files.is_empty() {
            self.uploaded_files = Some(files);
        }
        self
    }
}

/// Persisted state of one session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Opaque session id.
    pub session_id: String,
    /// Route the session belongs to.
    pub route: String,
    /// RFC 3339 creation time.
    pub created_at: String,
    /// RFC 3339 time of the last write.
    pub updated_at: String,
    /// Whether the session has been ended.
    #[serde(default)]
    pub ended: bool,
    /// Conversation turns in order.
    #[serde(default)]
    pub conversation: Vec<ConversationEntry>,
    /// Pipeline results stored against the session.
    #[serde(default)]
    pub results: Vec<serde_json::Value>,
}

impl SessionRecord {
    /// Fresh record with a random id.
    pub fn new(route: &str) -> Self {
        let now = now_rfc3339();
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            route: route.to_string(),
            created_at: now.clone(),
            updated_at: now,
            ended: false,
            conversation: Vec::new(),
            results: Vec::new(),
        }
    }

    /// Refresh `updated_at`.
    pub fn touch(&mut self) {
        self.updated_at = now_rfc3339();
    }

    /// Whether the record has been idle for longer than `idle`.
    pub fn is_idle(&self, idle: Duration, now: OffsetDateTime) -> bool {
        match OffsetDateTime::parse(&self.updated_at, &Rfc3339) {
            Ok(updated) => now - updated > idle,
            Err(_) => true,
        }
    }

    /// Render the conversation as `Human:`/`Assistant:` lines for question rewriting.
    pub fn history_text(&self) -> String {
        self.conversation
            .iter()
            .map(|entry| format!("Human: {}\nAssistant: {}", entry.question, entry.answer))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Storage for session records.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Create and persist a new session.
    async fn create(&self, route: &str) -> Result<SessionRecord, SessionError>;

    /// Load an existing session.
    async fn load(&self, route: &str, session_id: &str) -> Result<SessionRecord, SessionError>;

    /// Persist a record, replacing any previous version.
    async fn save(&self, record: &SessionRecord) -> Result<(), SessionError>;

    /// Remove every session idle for longer than `idle`; returns the evicted ids.
    async fn evict_idle(&self, idle: Duration) -> Result<Vec<String>, SessionError>;

    /// Append a conversation turn to an active session.
    async fn append_turn(
        &self,
        route: &str,
        session_id: &str,
        entry: ConversationEntry,
    ) -> Result<SessionRecord, SessionError> {
        let mut record = self.load(route, session_id).await?;
        if record.ended {
            return Err(SessionError::Ended {
                session_id: session_id.to_string(),
            });
        }
        record.conversation.push(entry);
        record.touch();
        self.save(&record).await?;
        Ok(record)
    }

    /// Mark a session as ended; further turns are rejected.
    async fn end(&self, route: &str, session_id: &str) -> Result<SessionRecord, SessionError> {
        let mut record = self.load(route, session_id).await?;
        record.ended = true;
        record.touch();
        self.save(&record).await?;
        tracing::info!(route, session_id, turns = record.conversation.len(), "Session ended");
        Ok(record)
    }
}

pub(crate) fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| OffsetDateTime::now_utc().unix_timestamp().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_text_interleaves_turns() {
        let mut record = SessionRecord::new("document_qa_chat");
        record.conversation.push(ConversationEntry::new("What is X?", "X is a thing."));
        record.conversation.push(ConversationEntry::new("And Y?", "Unknown."));
        assert_eq!(
            record.history_text(),
            "Human: What is X?\nAssistant: X is a thing.\nHuman: And Y?\nAssistant: Unknown."
        );
    }

    #[test]
    fn idle_detection_uses_updated_at() {
        let mut record = SessionRecord::new("document_qa_chat");
        let now = OffsetDateTime::now_utc();
        assert!(!record.is_idle(Duration::from_secs(60), now));
        record.updated_at = "2020-01-01T00:00:00Z".into();
        assert!(record.is_idle(Duration::from_secs(60), now));
    }

    #[test]
    fn uploads_are_omitted_when_empty() {
        let entry = ConversationEntry::new("q", "a").with_uploads(Vec::new());
        let json = serde_json::to_value(&entry).unwrap();
        assert!(json.get("uploaded_files").is_none());
        assert!(json.get("timestamp").is_some());
    }
}
