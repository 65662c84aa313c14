//! Error taxonomy shared by the ingestion pipeline and the session layer.
//!
//! Component errors bubble up to the request boundary unchanged in kind;
//! [`crate::server`] maps each variant to a status code and a user-facing
//! message.

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed repository URL or empty question.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Clone failure, or a missing or malformed local tree.
    #[error("repository unavailable: {0}")]
    RepositoryUnavailable(String),

    #[error("embedding service error: {0}")]
    EmbeddingService(String),

    #[error("answer generation failed: {0}")]
    AnswerGeneration(String),

    /// No persisted vector index exists for the repository.
    #[error("no vector index for {0}")]
    IndexMissing(String),

    #[error("vector index error: {0}")]
    Index(#[from] sqlx::Error),

    #[error("cache status error: {0}")]
    Cache(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
