use super::{SessionError, SessionRecord, SessionStore};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::RwLock;

/// Session store kept in process memory.
#[derive(Default)]
pub struct MemorySessionStore {
    records: RwLock<HashMap<(String, String), SessionRecord>>,
}

impl MemorySessionStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(&self, route: &str) -> Result<SessionRecord, SessionError> {
        let record = SessionRecord::new(route);
        self.save(&record).await?;
        Ok(record)
    }

    async fn load(&self, route: &str, session_id: &str) -> Result<SessionRecord, SessionError> {
        self.records
            .read()
            .await
            .get(&(route.to_string(), session_id.to_string()))
            .cloned()
            .ok_or_else(|| SessionError::NotFound {
                session_id: session_id.to_string(),
            })
    }

    async fn save(&self, record: &SessionRecord) -> Result<(), SessionError> {
        self.records.write().await.insert(
            (record.route.clone(), record.session_id.clone()),
            record.clone(),
        );
        Ok(())
    }

    async fn evict_idle(&self, idle: Duration) -> Result<Vec<String>, SessionError> {
        let now = OffsetDateTime::now_utc();
        let mut records = self.records.write().await;
        let mut evicted = Vec::new();
        records.retain(|(_, id), record| {
            let keep = !record.is_idle(idle, now);
            if !keep {
                evicted.push(id.clone());
            }
            keep
        });
        Ok(evicted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ConversationEntry;

    #[tokio::test]
    async fn append_and_end_round_through_the_store() {
        let store = MemorySessionStore::new();
        let record = store.create("document_qa_chat").await.unwrap();
        let updated = store
            .append_turn(
                "document_qa_chat",
                &record.session_id,
                ConversationEntry::new("q1", "a1"),
            )
            .await
            .unwrap();
        assert_eq!(updated.conversation.len(), 1);

        store.end("document_qa_chat", &record.session_id).await.unwrap();
        let error = store
            .append_turn(
                "document_qa_chat",
                &record.session_id,
                ConversationEntry::new("q2", "a2"),
            )
            .await
            .unwrap_err();
        assert!(matches!(error, SessionError::Ended { .. }));
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let store = MemorySessionStore::new();
        let error = store.load("document_qa_chat", "nope").await.unwrap_err();
        assert!(matches!(error, SessionError::NotFound { .. }));
    }

    #[tokio::test]
    async fn evict_idle_removes_stale_records() {
        let store = MemorySessionStore::new();
        let fresh = store.create("r").await.unwrap();
        let mut stale = SessionRecord::new("r");
        stale.updated_at = "2020-01-01T00:00:00Z".into();
        store.save(&stale).await.unwrap();

        let evicted = store.evict_idle(Duration::from_secs(60)).await.unwrap();
        assert_eq!(evicted, vec![stale.session_id.clone()]);
        assert!(store.load("r", &fresh.session_id).await.is_ok());
    }
}
