//! # repo-qa
//!
//! Ask natural-language questions about a source-code repository and get
//! answers grounded in the repository's own files.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌───────────────┐
//! │ Git fetch   │──▶│ Load + Chunk │──▶│ Embed + Index │
//! │ (git clone) │   │ per language │   │ SQLite / repo │
//! └─────────────┘   └──────────────┘   └───────┬───────┘
//!                                              │
//!                     ┌────────────────────────┤
//!                     ▼                        ▼
//!             ┌───────────────┐        ┌──────────────┐
//!             │ Conversation  │◀──────▶│ MMR retrieval│
//!             │ session + LLM │        └──────────────┘
//!             └───────┬───────┘
//!                     ▼
//!              CLI (repo-qa) / HTTP
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy |
//! | [`url`] | Repository URL validation |
//! | [`fetch`] | Repository fetching (`git clone`) |
//! | [`language`] | Extension → language table, allow-list |
//! | [`loader`] | Repository tree → documents |
//! | [`chunk`] | Language-aware recursive chunking |
//! | [`cache`] | Persistent "already indexed" status |
//! | [`embedding`] | Embedding service abstraction |
//! | [`index`] | Per-repository SQLite vector index |
//! | [`search`] | Maximal-marginal-relevance selection |
//! | [`llm`] | Chat-completion abstraction |
//! | [`memory`] | Windowed conversation memory with rolling summary |
//! | [`session`] | Conversational retrieval over one index |
//! | [`registry`] | Live sessions and per-repository state |
//! | [`pipeline`] | Analyze / ask orchestration |
//! | [`server`] | HTTP front end |

pub mod cache;
pub mod chunk;
pub mod config;
pub mod embedding;
pub mod error;
pub mod fetch;
pub mod index;
pub mod language;
pub mod llm;
pub mod loader;
pub mod memory;
pub mod models;
pub mod pipeline;
pub mod registry;
pub mod search;
pub mod server;
pub mod session;
pub mod url;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Error, Result};
