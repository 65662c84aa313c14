//! Analyze and ask: the two operations every front end drives.
//!
//! [`Pipeline::analyze`] turns a repository URL into a live conversation
//! session:
//!
//! ```text
//! validate URL → per-repository lock
//!   cache says indexed?  ── yes ──→ reuse live index, or load it from disk
//!          │ no (or index file gone)
//!          ▼
//!   fetch → load files → chunk → embed + build index → mark indexed
//!          ▼
//!   new ConversationSession → registry
//! ```
//!
//! Blocking stages (directory walk and chunking) run on tokio's blocking
//! pool. [`Pipeline::ask`] looks up the session and answers, returning one of
//! two fixed notices instead when there is nothing to answer.

use std::sync::Arc;

use crate::cache::CacheTracker;
use crate::chunk::chunk_document;
use crate::config::Config;
use crate::embedding::{EmbeddingService, OpenAiEmbeddings};
use crate::error::{Error, Result};
use crate::fetch::{GitFetcher, RepositoryFetcher};
use crate::index::{IndexStore, VectorIndex};
use crate::language::AllowList;
use crate::llm::{LanguageModel, OpenAiChat};
use crate::loader::load_repository;
use crate::models::Chunk;
use crate::registry::{RepoState, SessionRegistry};
use crate::search::MmrParams;
use crate::session::{Answer, ConversationSession, NO_QUESTION_MESSAGE};
use crate::url::UrlValidator;

/// Returned when a question arrives for a repository without a session.
pub const ANALYZE_FIRST_MESSAGE: &str = "Please analyze a repo first.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyzeOutcome {
    pub repository_id: String,
    pub chunk_count: usize,
    /// True when an existing index was reused instead of rebuilt.
    pub reused: bool,
}

/// Result of [`Pipeline::ask`].
#[derive(Debug, Clone)]
pub enum Reply {
    Answer(Answer),
    /// A fixed user-facing message; no retrieval or generation happened.
    Notice(&'static str),
}

impl Reply {
    pub fn text(&self) -> &str {
        match self {
            Reply::Answer(answer) => &answer.text,
            Reply::Notice(message) => message,
        }
    }
}

pub struct Pipeline {
    config: Config,
    validator: UrlValidator,
    allow: AllowList,
    fetcher: Arc<dyn RepositoryFetcher>,
    cache: CacheTracker,
    store: IndexStore,
    embedder: Arc<dyn EmbeddingService>,
    llm: Arc<dyn LanguageModel>,
    registry: SessionRegistry,
}

impl Pipeline {
    /// Assemble a pipeline around explicit collaborators.
    ///
    /// # Errors
    ///
    /// Fails if the cache status document exists but cannot be parsed, or
    /// the configured repository host does not form a valid URL pattern.
    pub fn new(
        config: Config,
        fetcher: Arc<dyn RepositoryFetcher>,
        embedder: Arc<dyn EmbeddingService>,
        llm: Arc<dyn LanguageModel>,
    ) -> Result<Self> {
        let validator = UrlValidator::new(&config.repository.host)?;
        let cache = CacheTracker::open(config.paths.status_file.clone())?;
        let store = IndexStore::new(config.paths.index_dir.clone());
        Ok(Self {
            config,
            validator,
            allow: AllowList::default_set(),
            fetcher,
            cache,
            store,
            embedder,
            llm,
            registry: SessionRegistry::new(),
        })
    }

    /// Production wiring: `git` CLI fetcher and OpenAI clients.
    pub fn from_config(config: Config) -> Result<Self> {
        let fetcher = Arc::new(GitFetcher::new(&config.paths, &config.repository));
        let embedder = Arc::new(OpenAiEmbeddings::new(&config.embedding)?);
        let llm = Arc::new(OpenAiChat::new(&config.llm)?);
        Self::new(config, fetcher, embedder, llm)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> &CacheTracker {
        &self.cache
    }

    pub fn store(&self) -> &IndexStore {
        &self.store
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Validate `url` and return its canonical identifier.
    pub fn canonicalize(&self, url: &str) -> Result<String> {
        self.validator.canonicalize(url)
    }

    pub async fn analyze(&self, url: &str) -> Result<AnalyzeOutcome> {
        let repository_id = self.validator.canonicalize(url)?;

        let lock = self.registry.analyze_lock(&repository_id).await;
        let _guard = lock.lock().await;

        self.registry.begin_loading(&repository_id).await;
        match self.analyze_locked(&repository_id).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.registry.abandon_loading(&repository_id).await;
                tracing::error!(repository = %repository_id, error = %e, "analysis failed");
                Err(e)
            }
        }
    }

    async fn analyze_locked(&self, repository_id: &str) -> Result<AnalyzeOutcome> {
        let reusable = if self.cache.is_indexed(repository_id) {
            self.reusable_index(repository_id).await?
        } else {
            None
        };

        let (index, reused) = match reusable {
            Some(index) => (index, true),
            None => (Arc::new(self.rebuild(repository_id).await?), false),
        };

        let outcome = AnalyzeOutcome {
            repository_id: repository_id.to_string(),
            chunk_count: index.len(),
            reused,
        };

        let session = ConversationSession::new(
            index,
            self.embedder.clone(),
            self.llm.clone(),
            MmrParams::from_config(&self.config.retrieval),
            self.config.memory.window_turns,
        );
        self.registry.insert(repository_id, session).await;

        tracing::info!(
            repository = %repository_id,
            chunks = outcome.chunk_count,
            reused,
            "repository ready"
        );
        Ok(outcome)
    }

    /// The index of a live session, else the one on disk. `None` when the
    /// cache entry has no index file behind it.
    async fn reusable_index(&self, repository_id: &str) -> Result<Option<Arc<VectorIndex>>> {
        if let Some(session) = self.registry.get(repository_id).await {
            return Ok(Some(session.index().clone()));
        }
        match self.store.load(repository_id, self.embedder.as_ref()).await {
            Ok(index) => Ok(Some(Arc::new(index))),
            Err(Error::IndexMissing(_)) => {
                tracing::warn!(
                    repository = %repository_id,
                    "marked as indexed but no index found, rebuilding"
                );
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn rebuild(&self, repository_id: &str) -> Result<VectorIndex> {
        let root = self.fetcher.fetch(repository_id).await?;

        let allow = self.allow.clone();
        let chunking = self.config.chunking.clone();
        let chunks = tokio::task::spawn_blocking(move || -> Result<Vec<Chunk>> {
            let documents = load_repository(&root, &allow)?;
            let chunks: Vec<Chunk> = documents
                .iter()
                .flat_map(|doc| chunk_document(doc, &chunking))
                .collect();
            tracing::info!(
                documents = documents.len(),
                chunks = chunks.len(),
                "chunked repository"
            );
            Ok(chunks)
        })
        .await
        .map_err(|e| Error::RepositoryUnavailable(format!("loader task failed: {}", e)))??;

        let index = self
            .store
            .build(
                repository_id,
                &chunks,
                self.embedder.as_ref(),
                self.config.embedding.batch_size,
            )
            .await?;
        self.cache.mark_indexed(repository_id)?;
        Ok(index)
    }

    /// Answer `question` about `repository`, the identifier returned by
    /// [`Pipeline::analyze`].
    ///
    /// A missing or un-analyzed repository and a blank question are not
    /// errors: they produce a [`Reply::Notice`] without calling any model.
    pub async fn ask(&self, repository: Option<&str>, question: Option<&str>) -> Result<Reply> {
        let session = match repository {
            Some(id) => self.indexed_session(id).await,
            None => None,
        };
        let Some(session) = session else {
            return Ok(Reply::Notice(ANALYZE_FIRST_MESSAGE));
        };

        let question = question.map(str::trim).unwrap_or_default();
        if question.is_empty() {
            return Ok(Reply::Notice(NO_QUESTION_MESSAGE));
        }

        let answer = session.ask(question).await?;
        Ok(Reply::Answer(answer))
    }

    async fn indexed_session(&self, repository_id: &str) -> Option<Arc<ConversationSession>> {
        if self.registry.state(repository_id).await != RepoState::Indexed {
            return None;
        }
        self.registry.get(repository_id).await
    }
}
