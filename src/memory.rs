//! Conversation memory: a bounded window of recent turns plus a rolling
//! summary of everything older.
//!
//! Once the window holds more than `window_turns` turns, [`ConversationMemory::compact`]
//! asks the language model to fold the overflow into the summary. The
//! summary only changes when that call succeeds; on failure the turns stay in
//! the window and are folded on a later compaction.

use std::collections::VecDeque;

use crate::error::Result;
use crate::llm::{LanguageModel, Message};

const SUMMARY_INSTRUCTIONS: &str = "Progressively summarize the lines of conversation provided, \
adding onto the previous summary and returning a new summary. Keep names of files, functions \
and other identifiers that were discussed.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub question: String,
    pub answer: String,
}

#[derive(Debug, Clone)]
pub struct ConversationMemory {
    turns: VecDeque<Turn>,
    summary: String,
    window_turns: usize,
}

impl ConversationMemory {
    pub fn new(window_turns: usize) -> Self {
        Self {
            turns: VecDeque::new(),
            summary: String::new(),
            window_turns: window_turns.max(1),
        }
    }

    /// True when nothing has been said yet.
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty() && self.summary.is_empty()
    }

    pub fn turns(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter()
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }

    pub fn record_turn(&mut self, question: impl Into<String>, answer: impl Into<String>) {
        self.turns.push_back(Turn {
            question: question.into(),
            answer: answer.into(),
        });
    }

    pub fn needs_compaction(&self) -> bool {
        self.turns.len() > self.window_turns
    }

    /// Fold turns beyond the window into the summary with one model call.
    pub async fn compact(&mut self, llm: &dyn LanguageModel) -> Result<()> {
        if !self.needs_compaction() {
            return Ok(());
        }
        let overflow = self.turns.len() - self.window_turns;
        let lines = format_turns(self.turns.iter().take(overflow));

        let prompt = format!(
            "Current summary:\n{}\n\nNew lines of conversation:\n{}\n\nNew summary:",
            if self.summary.is_empty() {
                "(none)"
            } else {
                self.summary.as_str()
            },
            lines
        );
        let messages = [Message::system(SUMMARY_INSTRUCTIONS), Message::user(prompt)];
        let summary = llm.chat(&messages).await?;

        self.summary = summary.trim().to_string();
        self.turns.drain(..overflow);
        tracing::debug!(folded = overflow, "compacted conversation memory");
        Ok(())
    }

    /// Summary and recent turns rendered as plain text, empty when there is
    /// no history.
    pub fn history_text(&self) -> String {
        let mut out = String::new();
        if !self.summary.is_empty() {
            out.push_str("Summary of earlier conversation:\n");
            out.push_str(&self.summary);
            out.push_str("\n\n");
        }
        out.push_str(&format_turns(self.turns.iter()));
        out.trim_end().to_string()
    }
}

fn format_turns<'a>(turns: impl Iterator<Item = &'a Turn>) -> String {
    let mut out = String::new();
    for turn in turns {
        out.push_str("Human: ");
        out.push_str(&turn.question);
        out.push_str("\nAssistant: ");
        out.push_str(&turn.answer);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedModel;

    #[test]
    fn test_new_memory_is_empty() {
        let memory = ConversationMemory::new(4);
        assert!(memory.is_empty());
        assert_eq!(memory.history_text(), "");
    }

    #[test]
    fn test_history_text_lists_turns() {
        let mut memory = ConversationMemory::new(4);
        memory.record_turn("What is X?", "X is a struct.");
        memory.record_turn("Where?", "In src/x.rs.");
        assert_eq!(
            memory.history_text(),
            "Human: What is X?\nAssistant: X is a struct.\nHuman: Where?\nAssistant: In src/x.rs."
        );
    }

    #[tokio::test]
    async fn test_compact_within_window_is_noop() {
        let model = ScriptedModel::replying("unused");
        let mut memory = ConversationMemory::new(2);
        memory.record_turn("q1", "a1");
        memory.record_turn("q2", "a2");
        memory.compact(&model).await.unwrap();
        assert!(model.seen.lock().unwrap().is_empty());
        assert_eq!(memory.turns().count(), 2);
    }

    #[tokio::test]
    async fn test_compact_folds_oldest_turns() {
        let model = ScriptedModel::replying("  They asked about q1.  ");
        let mut memory = ConversationMemory::new(2);
        for i in 1..=3 {
            memory.record_turn(format!("q{}", i), format!("a{}", i));
        }
        assert!(memory.needs_compaction());
        memory.compact(&model).await.unwrap();

        assert_eq!(memory.summary(), "They asked about q1.");
        let remaining: Vec<_> = memory.turns().map(|t| t.question.clone()).collect();
        assert_eq!(remaining, vec!["q2", "q3"]);

        let seen = model.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0][1].content.contains("Human: q1"));
        assert!(!seen[0][1].content.contains("Human: q2"));

        drop(seen);
        assert!(memory
            .history_text()
            .starts_with("Summary of earlier conversation:\nThey asked about q1."));
    }

    #[tokio::test]
    async fn test_failed_compaction_keeps_turns() {
        let model = ScriptedModel::failing();
        let mut memory = ConversationMemory::new(1);
        memory.record_turn("q1", "a1");
        memory.record_turn("q2", "a2");
        assert!(memory.compact(&model).await.is_err());
        assert_eq!(memory.summary(), "");
        assert_eq!(memory.turns().count(), 2);
    }
}
