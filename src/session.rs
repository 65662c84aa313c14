//! Conversational retrieval over one repository's vector index.
//!
//! A [`ConversationSession`] answers questions in four steps:
//!
//! 1. With prior history, condense the follow-up into a standalone question.
//! 2. Embed it and run an MMR search over the index.
//! 3. Ask the language model, grounding it in the retrieved chunks and the
//!    conversation so far.
//! 4. Record the turn and compact memory if the window overflowed.
//!
//! The memory lock is held for the whole of [`ConversationSession::ask`], so
//! concurrent questions on one session are answered one after another.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::embedding::{embed_query, EmbeddingService};
use crate::error::{Error, Result};
use crate::index::VectorIndex;
use crate::llm::{LanguageModel, Message};
use crate::memory::ConversationMemory;
use crate::models::RetrievedChunk;
use crate::search::MmrParams;

/// Returned to users who submit a blank question.
pub const NO_QUESTION_MESSAGE: &str = "No question provided.";

const ANSWER_INSTRUCTIONS: &str = "You answer questions about a source code repository. \
Use the following pieces of context from the repository to answer the question at the end. \
Cite file paths where relevant. If you don't know the answer, just say that you don't know; \
don't try to make up an answer.";

const CONDENSE_INSTRUCTIONS: &str = "Given the following conversation and a follow up \
question, rephrase the follow up question to be a standalone question, in its original \
language. Reply with the standalone question only.";

#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<RetrievedChunk>,
}

pub struct ConversationSession {
    index: Arc<VectorIndex>,
    embedder: Arc<dyn EmbeddingService>,
    llm: Arc<dyn LanguageModel>,
    params: MmrParams,
    memory: Mutex<ConversationMemory>,
}

impl ConversationSession {
    pub fn new(
        index: Arc<VectorIndex>,
        embedder: Arc<dyn EmbeddingService>,
        llm: Arc<dyn LanguageModel>,
        params: MmrParams,
        window_turns: usize,
    ) -> Self {
        Self {
            index,
            embedder,
            llm,
            params,
            memory: Mutex::new(ConversationMemory::new(window_turns)),
        }
    }

    pub fn repository(&self) -> &str {
        self.index.repository()
    }

    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    /// Number of turns currently held verbatim (not yet summarized).
    pub async fn recent_turns(&self) -> usize {
        self.memory.lock().await.turns().count()
    }

    pub async fn ask(&self, question: &str) -> Result<Answer> {
        let question = question.trim();
        if question.is_empty() {
            return Err(Error::InvalidInput(NO_QUESTION_MESSAGE.to_string()));
        }

        let mut memory = self.memory.lock().await;

        let standalone = if memory.is_empty() {
            question.to_string()
        } else {
            self.condense(&memory, question).await?
        };

        let query_vec = embed_query(self.embedder.as_ref(), &standalone).await?;
        let sources = self.index.mmr_search(&query_vec, self.params).await?;
        tracing::debug!(
            repository = %self.repository(),
            retrieved = sources.len(),
            "retrieved context"
        );

        let messages = answer_messages(&sources, &memory.history_text(), question);
        let text = self.llm.chat(&messages).await?;

        memory.record_turn(question, text.clone());
        if memory.needs_compaction() {
            if let Err(e) = memory.compact(self.llm.as_ref()).await {
                tracing::warn!(error = %e, "failed to summarize conversation, keeping full window");
            }
        }

        Ok(Answer { text, sources })
    }

    async fn condense(&self, memory: &ConversationMemory, question: &str) -> Result<String> {
        let prompt = format!(
            "Chat history:\n{}\n\nFollow up input: {}\nStandalone question:",
            memory.history_text(),
            question
        );
        let messages = [Message::system(CONDENSE_INSTRUCTIONS), Message::user(prompt)];
        let condensed = self.llm.chat(&messages).await?;
        let condensed = condensed.trim();
        if condensed.is_empty() {
            Ok(question.to_string())
        } else {
            Ok(condensed.to_string())
        }
    }
}

fn answer_messages(sources: &[RetrievedChunk], history: &str, question: &str) -> Vec<Message> {
    let mut context = String::new();
    for chunk in sources {
        context.push_str(&format!(
            "--- {} (part {}) ---\n{}\n\n",
            chunk.source_path, chunk.sequence_index, chunk.text
        ));
    }

    let mut system = format!("{}\n\n{}", ANSWER_INSTRUCTIONS, context.trim_end());
    if !history.is_empty() {
        system.push_str("\n\nConversation so far:\n");
        system.push_str(history);
    }

    vec![Message::system(system), Message::user(question)]
}
