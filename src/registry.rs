//! Live conversation sessions, keyed by canonical repository identifier.
//!
//! Each repository moves through
//!
//! ```text
//! Unseen → Loading → Indexed
//! ```
//!
//! and falls back to `Unseen` if its first analysis fails. An `Indexed`
//! repository stays `Indexed` while it is re-analyzed; the new session simply
//! replaces the old one, which resets the conversation.
//!
//! Analysis of one identifier is serialized by a per-key lock handed out by
//! [`SessionRegistry::analyze_lock`]. Different identifiers never share a lock.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::session::ConversationSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RepoState {
    Unseen,
    Loading,
    Indexed,
}

#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Arc<ConversationSession>>>,
    states: Mutex<HashMap<String, RepoState>>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock guarding analysis of `repository_id`, created on first use.
    pub async fn analyze_lock(&self, repository_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(repository_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub async fn state(&self, repository_id: &str) -> RepoState {
        self.states
            .lock()
            .await
            .get(repository_id)
            .copied()
            .unwrap_or(RepoState::Unseen)
    }

    /// `Unseen → Loading`. Other states are left alone.
    pub async fn begin_loading(&self, repository_id: &str) {
        let mut states = self.states.lock().await;
        let state = states
            .entry(repository_id.to_string())
            .or_insert(RepoState::Unseen);
        if *state == RepoState::Unseen {
            *state = RepoState::Loading;
        }
    }

    /// `Loading → Unseen` after a failed analysis.
    pub async fn abandon_loading(&self, repository_id: &str) {
        let mut states = self.states.lock().await;
        if states.get(repository_id) == Some(&RepoState::Loading) {
            states.remove(repository_id);
        }
    }

    /// Install a fresh session and mark the repository `Indexed`.
    pub async fn insert(
        &self,
        repository_id: &str,
        session: ConversationSession,
    ) -> Arc<ConversationSession> {
        let session = Arc::new(session);
        self.sessions
            .lock()
            .await
            .insert(repository_id.to_string(), session.clone());
        self.states
            .lock()
            .await
            .insert(repository_id.to_string(), RepoState::Indexed);
        session
    }

    pub async fn get(&self, repository_id: &str) -> Option<Arc<ConversationSession>> {
        self.sessions.lock().await.get(repository_id).cloned()
    }

    /// Every repository that has left `Unseen`, sorted by identifier.
    pub async fn repositories(&self) -> Vec<(String, RepoState)> {
        let states = self.states.lock().await;
        let mut out: Vec<_> = states.iter().map(|(k, v)| (k.clone(), *v)).collect();
        out.sort();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::IndexStore;
    use crate::search::MmrParams;
    use crate::testing::{HistogramEmbedder, ScriptedModel};
    use tempfile::TempDir;

    const REPO: &str = "https://github.com/acme/widgets";

    async fn empty_session(tmp: &TempDir) -> ConversationSession {
        let embedder = Arc::new(HistogramEmbedder::new());
        let index = IndexStore::new(tmp.path())
            .build(REPO, &[], embedder.as_ref(), 8)
            .await
            .unwrap();
        ConversationSession::new(
            Arc::new(index),
            embedder,
            Arc::new(ScriptedModel::replying("ok")),
            MmrParams {
                k: 8,
                fetch_k: 20,
                lambda: 0.5,
            },
            4,
        )
    }

    #[tokio::test]
    async fn test_unknown_repository_is_unseen() {
        let registry = SessionRegistry::new();
        assert_eq!(registry.state(REPO).await, RepoState::Unseen);
        assert!(registry.get(REPO).await.is_none());
        assert!(registry.repositories().await.is_empty());
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let tmp = TempDir::new().unwrap();
        let registry = SessionRegistry::new();

        registry.begin_loading(REPO).await;
        assert_eq!(registry.state(REPO).await, RepoState::Loading);

        registry.abandon_loading(REPO).await;
        assert_eq!(registry.state(REPO).await, RepoState::Unseen);

        registry.begin_loading(REPO).await;
        registry.insert(REPO, empty_session(&tmp).await).await;
        assert_eq!(registry.state(REPO).await, RepoState::Indexed);

        // Re-analysis keeps the repository answerable.
        registry.begin_loading(REPO).await;
        assert_eq!(registry.state(REPO).await, RepoState::Indexed);
        registry.abandon_loading(REPO).await;
        assert_eq!(registry.state(REPO).await, RepoState::Indexed);
        assert_eq!(
            registry.repositories().await,
            vec![(REPO.to_string(), RepoState::Indexed)]
        );
    }

    #[tokio::test]
    async fn test_insert_replaces_session() {
        let tmp = TempDir::new().unwrap();
        let registry = SessionRegistry::new();
        let first = registry.insert(REPO, empty_session(&tmp).await).await;
        let second = registry.insert(REPO, empty_session(&tmp).await).await;
        let current = registry.get(REPO).await.unwrap();
        assert!(Arc::ptr_eq(&current, &second));
        assert!(!Arc::ptr_eq(&current, &first));
    }

    #[tokio::test]
    async fn test_analyze_lock_is_per_key() {
        let registry = SessionRegistry::new();
        let a1 = registry.analyze_lock("a").await;
        let a2 = registry.analyze_lock("a").await;
        let b = registry.analyze_lock("b").await;
        assert!(Arc::ptr_eq(&a1, &a2));
        assert!(!Arc::ptr_eq(&a1, &b));

        let _held = a1.lock().await;
        assert!(a2.try_lock().is_err());
        assert!(b.try_lock().is_ok());
    }
}
