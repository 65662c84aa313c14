//! In-process collaborators for unit tests.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::embedding::EmbeddingService;
use crate::error::{Error, Result};
use crate::fetch::RepositoryFetcher;
use crate::llm::{LanguageModel, Message};

pub const HISTOGRAM_DIMS: usize = 16;

/// Embeds text as a character histogram over [`HISTOGRAM_DIMS`] buckets.
/// Identical texts get identical vectors.
#[derive(Default)]
pub struct HistogramEmbedder {
    pub fail: AtomicBool,
    pub calls: AtomicUsize,
    pub seen: Mutex<Vec<String>>,
}

impl HistogramEmbedder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

pub fn histogram(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; HISTOGRAM_DIMS];
    for c in text.chars() {
        v[(c as usize) % HISTOGRAM_DIMS] += 1.0;
    }
    v
}

#[async_trait]
impl EmbeddingService for HistogramEmbedder {
    fn model_name(&self) -> &str {
        "histogram"
    }
    fn dims(&self) -> usize {
        HISTOGRAM_DIMS
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::EmbeddingService("unavailable".to_string()));
        }
        self.seen.lock().unwrap().extend(texts.iter().cloned());
        Ok(texts.iter().map(|t| histogram(t)).collect())
    }
}

/// Replies with a fixed string (or fails) and records every request.
pub struct ScriptedModel {
    reply: Option<String>,
    pub fail: AtomicBool,
    pub seen: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedModel {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: Some(reply.to_string()),
            fail: AtomicBool::new(false),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            reply: None,
            fail: AtomicBool::new(false),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }
    async fn chat(&self, messages: &[Message]) -> Result<String> {
        self.seen.lock().unwrap().push(messages.to_vec());
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::AnswerGeneration("offline".to_string()));
        }
        self.reply
            .clone()
            .ok_or_else(|| Error::AnswerGeneration("offline".to_string()))
    }
}

/// Writes a small fixed tree under `root` on every fetch.
pub struct FixtureFetcher {
    root: PathBuf,
    pub fetches: AtomicUsize,
}

impl FixtureFetcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RepositoryFetcher for FixtureFetcher {
    async fn fetch(&self, _url: &str) -> Result<PathBuf> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        std::fs::create_dir_all(self.root.join("src"))?;
        std::fs::write(
            self.root.join("src/lib.rs"),
            "pub fn add(a: i32, b: i32) -> i32 {\n    a + b\n}\n",
        )?;
        std::fs::write(self.root.join("README.md"), "# Widgets\n\nAdds numbers.\n")?;
        Ok(self.root.clone())
    }
}
