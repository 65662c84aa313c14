//! Per-repository vector index backed by SQLite.
//!
//! Each repository gets its own database file under `paths.index_dir`,
//! named `<owner>-<repo>-<hash>.sqlite` where `<hash>` is a short SHA-256
//! prefix of the canonical repository identifier. A file holds two tables:
//!
//! | Table | Contents |
//! |-------|----------|
//! | `chunks` | chunk id, source path, sequence index, text, hash, embedding BLOB |
//! | `index_meta` | `repository`, `model`, `dims`, `built_at` key/value rows |
//!
//! Embeddings are stored as little-endian `f32` BLOBs (see
//! [`crate::embedding::vec_to_blob`]) and searched brute-force with cosine
//! similarity, which is fast enough for a single repository's chunks.
//!
//! A build computes every embedding before touching the file, then replaces
//! the table contents inside one transaction. A build that fails part-way
//! leaves the previous contents (or no file contents at all) untouched.

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::embedding::{
    blob_to_vec, cosine_similarity, embed_in_batches, vec_to_blob, EmbeddingService,
};
use crate::error::{Error, Result};
use crate::models::{Chunk, RetrievedChunk};
use crate::search::{maximal_marginal_relevance, MmrParams};
use crate::url::storage_slug;

/// Locates and creates per-repository index files.
#[derive(Debug, Clone)]
pub struct IndexStore {
    dir: PathBuf,
}

/// What a given index was built from.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexMeta {
    pub repository: String,
    pub model: String,
    pub dims: usize,
    pub built_at: Option<DateTime<Utc>>,
}

/// An opened, searchable vector index for one repository.
pub struct VectorIndex {
    pool: SqlitePool,
    path: PathBuf,
    meta: IndexMeta,
    len: usize,
}

impl IndexStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Database file for a repository identifier.
    pub fn path_for(&self, repository_id: &str) -> PathBuf {
        self.dir.join(index_file_name(repository_id))
    }

    pub fn exists(&self, repository_id: &str) -> bool {
        self.path_for(repository_id).is_file()
    }

    /// Embed `chunks` and persist them as the repository's index, replacing
    /// whatever the file held before.
    ///
    /// # Errors
    ///
    /// Embedding failures surface as [`Error::EmbeddingService`] before the
    /// file is opened for writing; storage failures as [`Error::Index`].
    pub async fn build(
        &self,
        repository_id: &str,
        chunks: &[Chunk],
        embedder: &dyn EmbeddingService,
        batch_size: usize,
    ) -> Result<VectorIndex> {
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = embed_in_batches(embedder, &texts, batch_size).await?;

        let dims = vectors.first().map(|v| v.len()).unwrap_or(embedder.dims());
        if let Some(bad) = vectors.iter().position(|v| v.len() != dims) {
            return Err(Error::EmbeddingService(format!(
                "vector {} has {} dimensions, expected {}",
                bad,
                vectors[bad].len(),
                dims
            )));
        }

        let path = self.path_for(repository_id);
        let pool = connect(&path).await?;
        run_migrations(&pool).await?;

        let meta = IndexMeta {
            repository: repository_id.to_string(),
            model: embedder.model_name().to_string(),
            dims,
            built_at: Some(Utc::now()),
        };

        let mut tx = pool.begin().await?;
        sqlx::query("DELETE FROM chunks").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM index_meta")
            .execute(&mut *tx)
            .await?;

        for (chunk, vector) in chunks.iter().zip(&vectors) {
            sqlx::query(
                r#"
                INSERT INTO chunks (id, source_path, sequence_index, text, hash, embedding)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.source_path)
            .bind(chunk.sequence_index)
            .bind(&chunk.text)
            .bind(&chunk.hash)
            .bind(vec_to_blob(vector))
            .execute(&mut *tx)
            .await?;
        }

        let built_at = meta.built_at.map(|t| t.to_rfc3339()).unwrap_or_default();
        for (key, value) in [
            ("repository", meta.repository.clone()),
            ("model", meta.model.clone()),
            ("dims", meta.dims.to_string()),
            ("built_at", built_at),
        ] {
            sqlx::query("INSERT INTO index_meta (key, value) VALUES (?, ?)")
                .bind(key)
                .bind(value)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        tracing::info!(
            repository = %repository_id,
            chunks = chunks.len(),
            model = %meta.model,
            dims,
            path = %path.display(),
            "built vector index"
        );

        Ok(VectorIndex {
            pool,
            path,
            meta,
            len: chunks.len(),
        })
    }

    /// Open an existing index without recomputing anything.
    ///
    /// Logs a warning when the stored model or dimensionality differs from
    /// `embedder`, since query vectors would then not be comparable.
    pub async fn load(
        &self,
        repository_id: &str,
        embedder: &dyn EmbeddingService,
    ) -> Result<VectorIndex> {
        let path = self.path_for(repository_id);
        if !path.is_file() {
            return Err(Error::IndexMissing(repository_id.to_string()));
        }

        let pool = connect(&path).await?;
        run_migrations(&pool).await?;

        let rows = sqlx::query("SELECT key, value FROM index_meta")
            .fetch_all(&pool)
            .await?;
        let mut meta = IndexMeta {
            repository: repository_id.to_string(),
            model: String::new(),
            dims: 0,
            built_at: None,
        };
        for row in &rows {
            let key: String = row.get("key");
            let value: String = row.get("value");
            match key.as_str() {
                "repository" => meta.repository = value,
                "model" => meta.model = value,
                "dims" => meta.dims = value.parse().unwrap_or(0),
                "built_at" => {
                    meta.built_at = DateTime::parse_from_rfc3339(&value)
                        .ok()
                        .map(|t| t.with_timezone(&Utc))
                }
                _ => {}
            }
        }

        if meta.model.is_empty() {
            return Err(Error::IndexMissing(format!(
                "{} (index at {} was never completed)",
                repository_id,
                path.display()
            )));
        }

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&pool)
            .await?;

        if meta.dims != embedder.dims() || meta.model != embedder.model_name() {
            tracing::warn!(
                repository = %repository_id,
                stored_model = %meta.model,
                stored_dims = meta.dims,
                model = %embedder.model_name(),
                dims = embedder.dims(),
                "index was built with a different embedding model"
            );
        }

        tracing::debug!(repository = %repository_id, chunks = count, "loaded vector index");

        Ok(VectorIndex {
            pool,
            path,
            meta,
            len: count.max(0) as usize,
        })
    }
}

impl VectorIndex {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn repository(&self) -> &str {
        &self.meta.repository
    }

    pub fn meta(&self) -> &IndexMeta {
        &self.meta
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The `k` chunks most similar to `query_vec`, best first.
    pub async fn similarity_search(
        &self,
        query_vec: &[f32],
        k: usize,
    ) -> Result<Vec<RetrievedChunk>> {
        let mut scored = self.scored_chunks(query_vec).await?;
        scored.truncate(k);
        Ok(scored.into_iter().map(|(chunk, _)| chunk).collect())
    }

    /// Take the `fetch_k` nearest chunks, then re-select `k` of them by
    /// maximal marginal relevance. Results are in selection order.
    pub async fn mmr_search(
        &self,
        query_vec: &[f32],
        params: MmrParams,
    ) -> Result<Vec<RetrievedChunk>> {
        let mut scored = self.scored_chunks(query_vec).await?;
        scored.truncate(params.fetch_k.max(params.k));

        let vectors: Vec<Vec<f32>> = scored.iter().map(|(_, v)| v.clone()).collect();
        let picked = maximal_marginal_relevance(query_vec, &vectors, params.k, params.lambda);

        let mut slots: Vec<Option<RetrievedChunk>> =
            scored.into_iter().map(|(chunk, _)| Some(chunk)).collect();
        Ok(picked
            .into_iter()
            .filter_map(|i| slots.get_mut(i).and_then(Option::take))
            .collect())
    }

    /// Every chunk with its similarity to the query, best first.
    async fn scored_chunks(&self, query_vec: &[f32]) -> Result<Vec<(RetrievedChunk, Vec<f32>)>> {
        let rows = sqlx::query(
            "SELECT id, source_path, sequence_index, text, embedding FROM chunks",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut scored: Vec<(RetrievedChunk, Vec<f32>)> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let vector = blob_to_vec(&blob);
                let chunk = RetrievedChunk {
                    chunk_id: row.get("id"),
                    source_path: row.get("source_path"),
                    sequence_index: row.get("sequence_index"),
                    text: row.get("text"),
                    score: cosine_similarity(query_vec, &vector),
                };
                (chunk, vector)
            })
            .collect();

        scored.sort_by(|(a, _), (b, _)| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.source_path.cmp(&b.source_path))
                .then_with(|| a.sequence_index.cmp(&b.sequence_index))
        });
        Ok(scored)
    }
}

/// `<owner>-<repo>-<12 hex chars>.sqlite`
fn index_file_name(repository_id: &str) -> String {
    format!("{}.sqlite", storage_slug(repository_id))
}

async fn connect(path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await?;

    Ok(pool)
}

async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            source_path TEXT NOT NULL,
            sequence_index INTEGER NOT NULL,
            text TEXT NOT NULL,
            hash TEXT NOT NULL,
            embedding BLOB NOT NULL,
            UNIQUE(source_path, sequence_index)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::HistogramEmbedder;
    use tempfile::TempDir;

    fn chunk(path: &str, index: i64, text: &str) -> Chunk {
        Chunk {
            id: format!("{}#{}", path, index),
            source_path: path.to_string(),
            sequence_index: index,
            text: text.to_string(),
            hash: format!("h{}", index),
        }
    }

    fn sample_chunks() -> Vec<Chunk> {
        vec![
            chunk("src/main.rs", 0, "fn main() { run(); }"),
            chunk("src/lib.rs", 0, "pub mod widgets;"),
            chunk("README.md", 0, "aaaa bbbb"),
            chunk("README.md", 1, "zzzz yyyy xxxx"),
        ]
    }

    const REPO: &str = "https://github.com/acme/widgets";

    #[test]
    fn test_path_for_is_namespaced() {
        let store = IndexStore::new("/tmp/idx");
        let a = store.path_for(REPO);
        let b = store.path_for("https://github.com/acme/gadgets");
        let name = a.file_name().unwrap().to_str().unwrap().to_string();
        assert!(name.starts_with("acme-widgets-"), "{}", name);
        assert!(name.ends_with(".sqlite"));
        assert_ne!(a, b);
        assert_eq!(a, store.path_for(REPO));
    }

    #[test]
    fn test_file_name_drops_unsafe_characters() {
        let name = index_file_name("https://example.org/we ird/../repo");
        assert!(!name.contains('/'));
        assert!(!name.contains(' '));
        assert!(name.ends_with(".sqlite"));
    }

    #[tokio::test]
    async fn test_load_missing_index() {
        let tmp = TempDir::new().unwrap();
        let store = IndexStore::new(tmp.path());
        let embedder = HistogramEmbedder::new();
        assert!(!store.exists(REPO));
        let result = store.load(REPO, &embedder).await;
        assert!(matches!(result, Err(Error::IndexMissing(_))));
    }

    #[tokio::test]
    async fn test_build_then_load() {
        let tmp = TempDir::new().unwrap();
        let store = IndexStore::new(tmp.path());
        let embedder = HistogramEmbedder::new();

        let built = store
            .build(REPO, &sample_chunks(), &embedder, 2)
            .await
            .unwrap();
        assert_eq!(built.len(), 4);
        assert_eq!(built.meta().dims, 16);
        assert!(store.exists(REPO));

        let loaded = store.load(REPO, &embedder).await.unwrap();
        assert_eq!(loaded.len(), 4);
        assert_eq!(loaded.repository(), REPO);
        assert_eq!(loaded.meta().model, "histogram");
        assert!(loaded.meta().built_at.is_some());
    }

    #[tokio::test]
    async fn test_rebuild_replaces_contents() {
        let tmp = TempDir::new().unwrap();
        let store = IndexStore::new(tmp.path());
        let embedder = HistogramEmbedder::new();

        store.build(REPO, &sample_chunks(), &embedder, 8).await.unwrap();
        let rebuilt = store
            .build(REPO, &sample_chunks()[..2], &embedder, 8)
            .await
            .unwrap();
        assert_eq!(rebuilt.len(), 2);
        assert_eq!(store.load(REPO, &embedder).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_build_keeps_previous_index() {
        let tmp = TempDir::new().unwrap();
        let store = IndexStore::new(tmp.path());
        let embedder = HistogramEmbedder::new();
        store.build(REPO, &sample_chunks(), &embedder, 8).await.unwrap();

        embedder.set_failing(true);
        let result = store.build(REPO, &sample_chunks()[..1], &embedder, 8).await;
        assert!(matches!(result, Err(Error::EmbeddingService(_))));

        embedder.set_failing(false);
        assert_eq!(store.load(REPO, &embedder).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_failed_first_build_leaves_nothing() {
        let tmp = TempDir::new().unwrap();
        let store = IndexStore::new(tmp.path());
        let embedder = HistogramEmbedder::new();
        embedder.set_failing(true);

        assert!(store.build(REPO, &sample_chunks(), &embedder, 8).await.is_err());
        assert!(!store.exists(REPO));
    }

    #[tokio::test]
    async fn test_similarity_search_ranks_exact_text_first() {
        let tmp = TempDir::new().unwrap();
        let store = IndexStore::new(tmp.path());
        let embedder = HistogramEmbedder::new();
        let index = store.build(REPO, &sample_chunks(), &embedder, 8).await.unwrap();

        let query = embedder
            .embed(&["zzzz yyyy xxxx".to_string()])
            .await
            .unwrap()
            .remove(0);
        let results = index.similarity_search(&query, 2).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].source_path, "README.md");
        assert_eq!(results[0].sequence_index, 1);
        assert!((results[0].score - 1.0).abs() < 1e-5);
        assert!(results[0].score >= results[1].score);
    }

    #[tokio::test]
    async fn test_mmr_search_returns_min_k_len() {
        let tmp = TempDir::new().unwrap();
        let store = IndexStore::new(tmp.path());
        let embedder = HistogramEmbedder::new();
        let index = store.build(REPO, &sample_chunks(), &embedder, 8).await.unwrap();
        let query = embedder.embed(&["main".to_string()]).await.unwrap().remove(0);

        let params = MmrParams {
            k: 8,
            fetch_k: 20,
            lambda: 0.5,
        };
        let results = index.mmr_search(&query, params).await.unwrap();
        assert_eq!(results.len(), 4);

        let mut ids: Vec<_> = results.iter().map(|r| r.chunk_id.clone()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 4);

        let params = MmrParams {
            k: 2,
            fetch_k: 3,
            lambda: 0.5,
        };
        assert_eq!(index.mmr_search(&query, params).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_empty_build() {
        let tmp = TempDir::new().unwrap();
        let store = IndexStore::new(tmp.path());
        let embedder = HistogramEmbedder::new();
        let index = store.build(REPO, &[], &embedder, 8).await.unwrap();
        assert!(index.is_empty());
        let results = index
            .mmr_search(&[1.0; 16], MmrParams { k: 8, fetch_k: 20, lambda: 0.5 })
            .await
            .unwrap();
        assert!(results.is_empty());
    }
}
