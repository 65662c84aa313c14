use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub repository: RepositoryConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    /// Working directory for fetched trees, one subdirectory per repository name.
    #[serde(default = "default_repo_base")]
    pub repo_base: PathBuf,
    /// Directory holding one vector index per repository.
    #[serde(default = "default_index_dir")]
    pub index_dir: PathBuf,
    /// JSON document mapping repository URL → fully indexed.
    #[serde(default = "default_status_file")]
    pub status_file: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            repo_base: default_repo_base(),
            index_dir: default_index_dir(),
            status_file: default_status_file(),
        }
    }
}

fn default_repo_base() -> PathBuf {
    PathBuf::from("./data/repos")
}
fn default_index_dir() -> PathBuf {
    PathBuf::from("./data/db")
}
fn default_status_file() -> PathBuf {
    PathBuf::from("./data/embeddings_status.json")
}

#[derive(Debug, Deserialize, Clone)]
pub struct RepositoryConfig {
    /// Host accepted by URL validation.
    #[serde(default = "default_host")]
    pub host: String,
    /// Branch to clone. `None` clones the remote's default branch.
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default = "default_true")]
    pub shallow: bool,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            branch: None,
            shallow: true,
        }
    }
}

fn default_host() -> String {
    "github.com".to_string()
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Maximum chunk length, in characters.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Characters carried from the end of one chunk into the next.
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    500
}
fn default_chunk_overlap() -> usize {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Chunks handed to the language model per question.
    #[serde(default = "default_k")]
    pub k: usize,
    /// Nearest neighbours considered before MMR re-selection.
    #[serde(default = "default_fetch_k")]
    pub fetch_k: usize,
    /// MMR trade-off: 1.0 is pure relevance, 0.0 is pure diversity.
    #[serde(default = "default_mmr_lambda")]
    pub mmr_lambda: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: default_k(),
            fetch_k: default_fetch_k(),
            mmr_lambda: default_mmr_lambda(),
        }
    }
}

fn default_k() -> usize {
    8
}
fn default_fetch_k() -> usize {
    20
}
fn default_mmr_lambda() -> f32 {
    0.5
}

#[derive(Debug, Deserialize, Clone)]
pub struct MemoryConfig {
    /// Recent turns kept verbatim before older ones are folded into the summary.
    #[serde(default = "default_window_turns")]
    pub window_turns: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            window_turns: default_window_turns(),
        }
    }
}

fn default_window_turns() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            dims: default_dims(),
            base_url: default_openai_base_url(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_dims() -> usize {
    1536
}
fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    2
}
fn default_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_chat_model")]
    pub model: String,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: default_chat_model(),
            base_url: default_openai_base_url(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_chat_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:5000".to_string()
}

impl Config {
    /// Parse and validate a TOML document. Missing sections take their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunking.chunk_size == 0 {
            anyhow::bail!("chunking.chunk_size must be > 0");
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            anyhow::bail!(
                "chunking.chunk_overlap ({}) must be smaller than chunking.chunk_size ({})",
                self.chunking.chunk_overlap,
                self.chunking.chunk_size
            );
        }

        if self.retrieval.k < 1 {
            anyhow::bail!("retrieval.k must be >= 1");
        }
        if self.retrieval.fetch_k < self.retrieval.k {
            anyhow::bail!("retrieval.fetch_k must be >= retrieval.k");
        }
        if !(0.0..=1.0).contains(&self.retrieval.mmr_lambda) {
            anyhow::bail!("retrieval.mmr_lambda must be in [0.0, 1.0]");
        }

        if self.memory.window_turns < 1 {
            anyhow::bail!("memory.window_turns must be >= 1");
        }

        if self.embedding.batch_size == 0 {
            anyhow::bail!("embedding.batch_size must be > 0");
        }
        if self.embedding.dims == 0 {
            anyhow::bail!("embedding.dims must be > 0");
        }

        if self.repository.host.trim().is_empty() {
            anyhow::bail!("repository.host must not be empty");
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    Config::from_toml_str(&content)
}
