//! Owner-keyed session map.
//!
//! Lock order: a session lock may be held while calling into the registry, never the
//! other way around. The registry lock is only held for map operations.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::{sync::Mutex, time::Instant};

use crate::{
    domain::{ChatId, UserId},
    scratch::ScratchDir,
    session::{Session, SessionHandle},
};

/// How long a finished session's outcome stays visible to status queries.
pub const OUTCOME_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug)]
struct Entry {
    id: u64,
    handle: SessionHandle,
}

#[derive(Debug)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<UserId, Entry>>,
    outcomes: Mutex<HashMap<UserId, (String, Instant)>>,
    outcome_ttl: Duration,
    next_id: AtomicU64,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            outcomes: Mutex::new(HashMap::new()),
            outcome_ttl: OUTCOME_TTL,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn with_outcome_ttl(mut self, ttl: Duration) -> Self {
        self.outcome_ttl = ttl;
        self
    }

    /// Register a fresh session for `owner`.
    ///
    /// Fails if the owner already has one; the scratch dir is handed back so the caller
    /// can release it.
    pub async fn create(
        &self,
        owner: UserId,
        chat: ChatId,
        scratch: ScratchDir,
    ) -> Result<SessionHandle, ScratchDir> {
        let mut sessions = self.sessions.lock().await;
        if sessions.contains_key(&owner) {
            return Err(scratch);
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let handle = Arc::new(Mutex::new(Session::new(id, owner, chat, scratch)));
        sessions.insert(
            owner,
            Entry {
                id,
                handle: handle.clone(),
            },
        );
        drop(sessions);

        self.outcomes.lock().await.remove(&owner);
        Ok(handle)
    }

    pub async fn get(&self, owner: UserId) -> Option<SessionHandle> {
        self.sessions
            .lock()
            .await
            .get(&owner)
            .map(|e| e.handle.clone())
    }

    /// Remove the owner's entry only if it is still session `id`.
    ///
    /// A late teardown of an old session must not evict its replacement.
    pub async fn remove(&self, owner: UserId, id: u64) -> bool {
        let mut sessions = self.sessions.lock().await;
        match sessions.get(&owner) {
            Some(entry) if entry.id == id => {
                sessions.remove(&owner);
                true
            }
            _ => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }

    /// Remember how the owner's last session ended, for status queries after teardown.
    ///
    /// Entries older than the TTL are dropped here, so the map only holds recent users.
    pub async fn record_outcome(&self, owner: UserId, text: impl Into<String>) {
        let ttl = self.outcome_ttl;
        let mut outcomes = self.outcomes.lock().await;
        outcomes.retain(|_, (_, at)| at.elapsed() < ttl);
        outcomes.insert(owner, (text.into(), Instant::now()));
    }

    pub async fn last_outcome(&self, owner: UserId) -> Option<String> {
        let outcomes = self.outcomes.lock().await;
        let (text, at) = outcomes.get(&owner)?;
        (at.elapsed() < self.outcome_ttl).then(|| text.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scratch::ScratchStore;

    #[tokio::test]
    async fn one_session_per_owner() {
        let root = tempfile::tempdir().unwrap();
        let store = ScratchStore::new(root.path());
        let reg = SessionRegistry::new();

        let first = reg
            .create(UserId(1), ChatId(1), store.allocate(UserId(1)).await.unwrap())
            .await
            .unwrap();
        let rejected = reg
            .create(UserId(1), ChatId(1), store.allocate(UserId(1)).await.unwrap())
            .await;
        let Err(returned) = rejected else {
            panic!("second create should fail");
        };
        assert!(returned.path().is_dir());

        reg.create(UserId(2), ChatId(2), store.allocate(UserId(2)).await.unwrap())
            .await
            .unwrap();
        assert_eq!(reg.len().await, 2);

        let got = reg.get(UserId(1)).await.unwrap();
        assert!(Arc::ptr_eq(&first, &got));
    }

    #[tokio::test]
    async fn stale_remove_keeps_replacement() {
        let root = tempfile::tempdir().unwrap();
        let store = ScratchStore::new(root.path());
        let reg = SessionRegistry::new();

        let old = reg
            .create(UserId(1), ChatId(1), store.allocate(UserId(1)).await.unwrap())
            .await
            .unwrap();
        let old_id = old.lock().await.id();
        assert!(reg.remove(UserId(1), old_id).await);
        assert!(!reg.remove(UserId(1), old_id).await);

        let new = reg
            .create(UserId(1), ChatId(1), store.allocate(UserId(1)).await.unwrap())
            .await
            .unwrap();
        assert_ne!(new.lock().await.id(), old_id);

        assert!(!reg.remove(UserId(1), old_id).await);
        assert!(reg.get(UserId(1)).await.is_some());
    }

    #[tokio::test]
    async fn outcome_survives_until_next_session() {
        let root = tempfile::tempdir().unwrap();
        let store = ScratchStore::new(root.path());
        let reg = SessionRegistry::new();

        reg.record_outcome(UserId(5), "cancelled").await;
        assert_eq!(reg.last_outcome(UserId(5)).await.as_deref(), Some("cancelled"));

        reg.create(UserId(5), ChatId(5), store.allocate(UserId(5)).await.unwrap())
            .await
            .unwrap();
        assert!(reg.last_outcome(UserId(5)).await.is_none());
    }

    #[tokio::test]
    async fn expired_outcomes_are_hidden_and_pruned() {
        let reg = SessionRegistry::new().with_outcome_ttl(Duration::ZERO);

        reg.record_outcome(UserId(1), "finished").await;
        assert!(reg.last_outcome(UserId(1)).await.is_none());

        reg.record_outcome(UserId(2), "failed").await;
        let outcomes = reg.outcomes.lock().await;
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes.contains_key(&UserId(2)));
    }
}
