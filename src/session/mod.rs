//! In-memory session pool.
//!
//! Holds every live conversation as an ordered list of turns, keyed by
//! (user id, session id). Each session is wrapped in its own mutex so that
//! concurrent requests against the same session append atomically instead
//! of racing on a full-list replace. Nothing here survives a restart;
//! durability is an explicit save through the message store.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::core::errors::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        ChatTurn {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        ChatTurn {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

type SessionEntry = Arc<Mutex<Vec<ChatTurn>>>;

#[derive(Clone, Default)]
pub struct SessionPool {
    inner: Arc<RwLock<HashMap<String, HashMap<String, SessionEntry>>>>,
}

impl SessionPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new user with no sessions yet and returns its id.
    pub async fn create_user(&self) -> String {
        let user_id = Uuid::new_v4().to_string();
        self.inner
            .write()
            .await
            .insert(user_id.clone(), HashMap::new());
        user_id
    }

    /// Opens a fresh, empty session for the user and returns its id.
    /// The user entry is created on the fly if it does not exist yet.
    pub async fn create_session(&self, user_id: &str) -> String {
        let session_id = format!("session_{}", Uuid::new_v4());
        let mut pool = self.inner.write().await;
        pool.entry(user_id.to_string())
            .or_default()
            .insert(session_id.clone(), Arc::new(Mutex::new(Vec::new())));
        session_id
    }

    async fn entry(&self, user_id: &str, session_id: &str) -> SessionEntry {
        {
            let pool = self.inner.read().await;
            if let Some(entry) = pool.get(user_id).and_then(|s| s.get(session_id)) {
                return entry.clone();
            }
        }

        let mut pool = self.inner.write().await;
        pool.entry(user_id.to_string())
            .or_default()
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Vec::new())))
            .clone()
    }

    /// Appends one turn to a session, creating the session if needed.
    /// The append happens under the per-session lock.
    pub async fn append(&self, user_id: &str, session_id: &str, turn: ChatTurn) {
        let entry = self.entry(user_id, session_id).await;
        entry.lock().await.push(turn);
    }

    /// Returns a copy of the session's turns, or None if the session does
    /// not exist.
    pub async fn snapshot(&self, user_id: &str, session_id: &str) -> Option<Vec<ChatTurn>> {
        let entry = {
            let pool = self.inner.read().await;
            pool.get(user_id).and_then(|s| s.get(session_id)).cloned()
        }?;
        let turns = entry.lock().await.clone();
        Some(turns)
    }

    /// Replaces a session's turns wholesale (used when rehydrating a
    /// persisted history). Creates the session if absent.
    pub async fn replace(&self, user_id: &str, session_id: &str, turns: Vec<ChatTurn>) {
        let entry = self.entry(user_id, session_id).await;
        *entry.lock().await = turns;
    }

    /// Removes a session. Deleting an absent session is a typed error so
    /// the HTTP layer can answer 404 instead of 500.
    pub async fn delete(&self, user_id: &str, session_id: &str) -> Result<(), ApiError> {
        let mut pool = self.inner.write().await;
        let removed = pool
            .get_mut(user_id)
            .and_then(|sessions| sessions.remove(session_id));
        match removed {
            Some(_) => Ok(()),
            None => Err(ApiError::NotFound(format!(
                "session {session_id} for user {user_id}"
            ))),
        }
    }

    pub async fn contains_user(&self, user_id: &str) -> bool {
        self.inner.read().await.contains_key(user_id)
    }

    /// Snapshot of all sessions belonging to a user, sorted by session id
    /// for deterministic iteration.
    pub async fn user_sessions(&self, user_id: &str) -> Vec<(String, Vec<ChatTurn>)> {
        let entries: Vec<(String, SessionEntry)> = {
            let pool = self.inner.read().await;
            match pool.get(user_id) {
                Some(sessions) => sessions
                    .iter()
                    .map(|(id, entry)| (id.clone(), entry.clone()))
                    .collect(),
                None => Vec::new(),
            }
        };

        let mut result = Vec::with_capacity(entries.len());
        for (id, entry) in entries {
            let turns = entry.lock().await.clone();
            result.push((id, turns));
        }
        result.sort_by(|a, b| a.0.cmp(&b.0));
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn append_keeps_order_and_is_visible() {
        let pool = SessionPool::new();
        let user = pool.create_user().await;
        let session = pool.create_session(&user).await;

        pool.append(&user, &session, ChatTurn::user("who are you?"))
            .await;
        pool.append(&user, &session, ChatTurn::assistant("a publisher"))
            .await;

        let turns = pool.snapshot(&user, &session).await.unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role, Role::User);
        assert_eq!(turns[1].role, Role::Assistant);
        assert_eq!(turns[1].content, "a publisher");
    }

    #[tokio::test]
    async fn append_creates_session_on_demand() {
        let pool = SessionPool::new();
        pool.append("u1", "s1", ChatTurn::user("hello")).await;
        let turns = pool.snapshot("u1", "s1").await.unwrap();
        assert_eq!(turns.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_appends_do_not_lose_turns() {
        let pool = SessionPool::new();
        let mut handles = Vec::new();
        for i in 0..32 {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move {
                pool.append("u1", "s1", ChatTurn::user(format!("msg {i}")))
                    .await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        let turns = pool.snapshot("u1", "s1").await.unwrap();
        assert_eq!(turns.len(), 32);
    }

    #[tokio::test]
    async fn delete_removes_present_and_rejects_absent() {
        let pool = SessionPool::new();
        let user = pool.create_user().await;
        let session = pool.create_session(&user).await;

        assert!(pool.delete(&user, &session).await.is_ok());
        assert!(pool.snapshot(&user, &session).await.is_none());

        let err = pool.delete(&user, &session).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn replace_installs_loaded_history() {
        let pool = SessionPool::new();
        pool.append("u1", "s1", ChatTurn::user("old")).await;

        let loaded = vec![
            ChatTurn::assistant("hello"),
            ChatTurn::user("who was Zou Taofen?"),
        ];
        pool.replace("u1", "s1", loaded.clone()).await;

        let turns = pool.snapshot("u1", "s1").await.unwrap();
        assert_eq!(turns, loaded);
    }

    #[tokio::test]
    async fn user_sessions_lists_all_sessions_sorted() {
        let pool = SessionPool::new();
        let user = pool.create_user().await;
        let s1 = pool.create_session(&user).await;
        let s2 = pool.create_session(&user).await;
        pool.append(&user, &s1, ChatTurn::user("a")).await;
        pool.append(&user, &s2, ChatTurn::user("b")).await;

        let sessions = pool.user_sessions(&user).await;
        assert_eq!(sessions.len(), 2);
        let ids: Vec<&str> = sessions.iter().map(|(id, _)| id.as_str()).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }
}
