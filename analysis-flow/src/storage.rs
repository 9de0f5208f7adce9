use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::{
    error::{FailureNotice, Result},
    presentation::Presentation,
};

/// Session information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub presentation: Presentation,
    /// Failure notices in the order they were raised
    pub notices: Vec<FailureNotice>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            presentation: Presentation::Idle,
            notices: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Record a failure notice for the client to show once.
    pub fn notify(&mut self, notice: FailureNotice) {
        self.notices.push(notice);
    }
}

/// Boxed mutation applied to a stored session under the store's lock
pub type SessionUpdate<'a, T> = Box<dyn FnOnce(&mut Session) -> T + Send + 'a>;

/// Trait for storing and retrieving sessions
#[async_trait]
pub trait SessionStorage: Send + Sync {
    async fn save(&self, session: Session) -> Result<()>;
    async fn get(&self, id: &str) -> Result<Option<Session>>;
    async fn delete(&self, id: &str) -> Result<()>;

    /// Apply `apply` atomically with respect to other updates of the same session.
    /// Returns `None` if the session does not exist.
    async fn update<'a>(
        &self,
        id: &str,
        apply: SessionUpdate<'a, Result<()>>,
    ) -> Result<Option<Result<()>>>;
}

/// In-memory implementation of SessionStorage
pub struct InMemorySessionStorage {
    sessions: Arc<DashMap<String, Session>>,
}

impl InMemorySessionStorage {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
        }
    }
}

impl Default for InMemorySessionStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStorage for InMemorySessionStorage {
    async fn save(&self, session: Session) -> Result<()> {
        self.sessions.insert(session.id.clone(), session);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Session>> {
        Ok(self.sessions.get(id).map(|entry| entry.clone()))
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.sessions.remove(id);
        Ok(())
    }

    async fn update<'a>(
        &self,
        id: &str,
        apply: SessionUpdate<'a, Result<()>>,
    ) -> Result<Option<Result<()>>> {
        Ok(self
            .sessions
            .get_mut(id)
            .map(|mut entry| apply(entry.value_mut())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FlowError;

    #[tokio::test]
    async fn test_storage() {
        let session_storage = InMemorySessionStorage::new();

        session_storage.save(Session::new("session1")).await.unwrap();
        let retrieved = session_storage.get("session1").await.unwrap();
        assert!(retrieved.is_some());
        assert_eq!(retrieved.unwrap().presentation, Presentation::Idle);

        session_storage.delete("session1").await.unwrap();
        assert!(session_storage.get("session1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_applies_in_place() {
        let storage = InMemorySessionStorage::new();
        storage.save(Session::new("s")).await.unwrap();

        let outcome = storage
            .update("s", Box::new(|session: &mut Session| session.presentation.select_file("a.pdf")))
            .await
            .unwrap();
        assert_eq!(outcome, Some(Ok(())));

        let session = storage.get("s").await.unwrap().unwrap();
        assert_eq!(session.presentation.file_name(), Some("a.pdf"));
    }

    #[tokio::test]
    async fn update_reports_missing_sessions_and_rejected_transitions() {
        let storage = InMemorySessionStorage::new();
        let missing = storage
            .update("nope", Box::new(|_: &mut Session| Ok(())))
            .await
            .unwrap();
        assert!(missing.is_none());

        storage.save(Session::new("s")).await.unwrap();
        let rejected = storage
            .update(
                "s",
                Box::new(|session: &mut Session| {
                    session
                        .presentation
                        .upload_failed(crate::error::FailureNotice::insufficient_credits())
                }),
            )
            .await
            .unwrap();
        assert!(matches!(
            rejected,
            Some(Err(FlowError::InvalidTransition { from: "idle", .. }))
        ));
    }
}
