//! Recursive, language-aware text chunker.
//!
//! Splits a [`Document`] into overlapping [`Chunk`]s of at most
//! `chunk_size` characters.
//!
//! # Algorithm
//!
//! 1. Pick the first separator in the priority list that occurs in the text.
//! 2. Split on it, keeping the separator at the start of the following piece
//!    so declarations stay attached to their bodies.
//! 3. Greedily merge pieces into chunks no longer than `chunk_size`.
//! 4. When a chunk is emitted, carry its trailing pieces (totalling at most
//!    `chunk_overlap` characters) into the next one.
//! 5. Pieces still longer than `chunk_size` are split again with the
//!    remaining, finer separators.
//!
//! Languages known to [`Language`] use their own separator list (top-level
//! declarations before statements before lines). Everything else, and any
//! document whose language-aware split fails, goes through the generic list:
//! paragraphs, lines, sentences, words, characters. The generic path never
//! fails.
//!
//! Lengths are counted in `char`s so multi-byte text is never cut mid-codepoint.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::ChunkingConfig;
use crate::language::Language;
use crate::models::{Chunk, Document};

/// Separators used when no language-aware strategy applies.
pub const GENERIC_SEPARATORS: [&str; 5] = ["\n\n", "\n", ". ", " ", ""];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SplitError {
    #[error("invalid chunking parameters: size {size}, overlap {overlap}")]
    InvalidConfig { size: usize, overlap: usize },

    /// Only reachable with a separator list that lacks the per-character
    /// `""` separator. The built-in tables all end with it.
    #[error("piece of {len} chars exceeds chunk size after all separators")]
    Oversized { len: usize },
}

/// Split a document into chunks, falling back to the generic splitter when
/// the language-aware one reports an error.
pub fn chunk_document(doc: &Document, config: &ChunkingConfig) -> Vec<Chunk> {
    let pieces = match doc.language {
        Some(lang) => match split_with_language(&doc.content, lang, config) {
            Ok(pieces) => pieces,
            Err(e) => {
                tracing::debug!(
                    path = %doc.path,
                    language = lang.name(),
                    error = %e,
                    "language-aware split failed, using generic splitter"
                );
                split_generic(&doc.content, config)
            }
        },
        None => split_generic(&doc.content, config),
    };

    pieces
        .into_iter()
        .enumerate()
        .map(|(i, text)| make_chunk(&doc.path, i as i64, text))
        .collect()
}

/// Language-aware recursive split.
pub fn split_with_language(
    text: &str,
    lang: Language,
    config: &ChunkingConfig,
) -> Result<Vec<String>, SplitError> {
    let splitter = RecursiveSplitter::new(config, lang.separators())?;
    splitter.split(text)
}

/// Generic recursive split. Never fails: invalid parameters are clamped and
/// the separator list ends with the per-character split.
pub fn split_generic(text: &str, config: &ChunkingConfig) -> Vec<String> {
    let size = config.chunk_size.max(1);
    let overlap = config.chunk_overlap.min(size - 1);
    let splitter = RecursiveSplitter {
        chunk_size: size,
        chunk_overlap: overlap,
        separators: GENERIC_SEPARATORS.to_vec(),
    };
    splitter
        .split(text)
        .unwrap_or_else(|_| vec![text.trim().to_string()])
}

struct RecursiveSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<&'static str>,
}

impl RecursiveSplitter {
    fn new(config: &ChunkingConfig, separators: Vec<&'static str>) -> Result<Self, SplitError> {
        if config.chunk_size == 0 || config.chunk_overlap >= config.chunk_size {
            return Err(SplitError::InvalidConfig {
                size: config.chunk_size,
                overlap: config.chunk_overlap,
            });
        }
        Ok(Self {
            chunk_size: config.chunk_size,
            chunk_overlap: config.chunk_overlap,
            separators,
        })
    }

    fn split(&self, text: &str) -> Result<Vec<String>, SplitError> {
        let mut out = Vec::new();
        self.split_recursive(text, &self.separators, &mut out)?;
        Ok(out)
    }

    fn split_recursive(
        &self,
        text: &str,
        separators: &[&'static str],
        out: &mut Vec<String>,
    ) -> Result<(), SplitError> {
        // First separator present in the text; "" always matches.
        let (separator, finer) = match separators
            .iter()
            .position(|s| s.is_empty() || text.contains(s))
        {
            Some(i) => (separators[i], &separators[i + 1..]),
            None => ("", &[][..]),
        };

        let mut good: Vec<&str> = Vec::new();
        for piece in split_keep_separator(text, separator) {
            if char_len(piece) <= self.chunk_size {
                good.push(piece);
                continue;
            }
            if !good.is_empty() {
                self.merge(&good, out);
                good.clear();
            }
            if finer.is_empty() {
                return Err(SplitError::Oversized {
                    len: char_len(piece),
                });
            }
            self.split_recursive(piece, finer, out)?;
        }
        if !good.is_empty() {
            self.merge(&good, out);
        }
        Ok(())
    }

    /// Greedily join pieces into chunks, keeping a tail of at most
    /// `chunk_overlap` characters when a chunk is flushed.
    fn merge(&self, pieces: &[&str], out: &mut Vec<String>) {
        let mut window: std::collections::VecDeque<(&str, usize)> =
            std::collections::VecDeque::new();
        let mut total = 0usize;

        for &piece in pieces {
            let len = char_len(piece);
            if total + len > self.chunk_size {
                if !window.is_empty() {
                    push_trimmed(out, &join(&window));
                    while total > self.chunk_overlap
                        || (total > 0 && total + len > self.chunk_size)
                    {
                        match window.pop_front() {
                            Some((_, l)) => total -= l,
                            None => break,
                        }
                    }
                }
            }
            window.push_back((piece, len));
            total += len;
        }

        if !window.is_empty() {
            push_trimmed(out, &join(&window));
        }
    }
}

/// Split `text` on `separator`, attaching each separator occurrence to the
/// start of the piece that follows it. Empty pieces are dropped. An empty
/// separator splits into single characters.
fn split_keep_separator<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    if separator.is_empty() {
        return text
            .char_indices()
            .map(|(i, c)| &text[i..i + c.len_utf8()])
            .collect();
    }

    let mut pieces = Vec::new();
    let mut start = 0;
    for (idx, _) in text.match_indices(separator) {
        if idx > start {
            pieces.push(&text[start..idx]);
        }
        start = idx;
    }
    if start < text.len() {
        pieces.push(&text[start..]);
    }
    pieces
}

fn join(window: &std::collections::VecDeque<(&str, usize)>) -> String {
    window.iter().map(|(s, _)| *s).collect()
}

fn push_trimmed(out: &mut Vec<String>, text: &str) {
    let trimmed = text.trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn make_chunk(source_path: &str, index: i64, text: String) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: Uuid::new_v5(
            &Uuid::NAMESPACE_URL,
            format!("{}#{}", source_path, index).as_bytes(),
        )
        .to_string(),
        source_path: source_path.to_string(),
        sequence_index: index,
        text,
        hash,
    }
}
