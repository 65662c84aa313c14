//! Repository URL validation and canonicalization.
//!
//! Accepted form: `https://<host>/<owner>/<repo>` with an optional trailing
//! slash, where owner and repo are ASCII letters, digits, `_` or `-`.
//! The canonical repository identifier drops surrounding whitespace and the
//! trailing slash, so both spellings share one cache entry and one session.

use regex::Regex;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct UrlValidator {
    pattern: Regex,
}

impl UrlValidator {
    pub fn new(host: &str) -> Result<Self> {
        let pattern = format!(
            r"^https://{}/[A-Za-z0-9_\-]+/[A-Za-z0-9_\-]+/?$",
            regex::escape(host)
        );
        let pattern = Regex::new(&pattern)
            .map_err(|e| Error::InvalidInput(format!("bad repository host {:?}: {}", host, e)))?;
        Ok(Self { pattern })
    }

    pub fn is_valid(&self, url: &str) -> bool {
        self.pattern.is_match(url.trim())
    }

    /// Validate and return the canonical repository identifier.
    pub fn canonicalize(&self, url: &str) -> Result<String> {
        let trimmed = url.trim();
        if !self.is_valid(trimmed) {
            return Err(Error::InvalidInput(format!(
                "Invalid repository URL: {:?}",
                trimmed
            )));
        }
        Ok(trimmed.trim_end_matches('/').to_string())
    }
}

/// Filesystem-safe name for a repository: `<owner>-<repo>-<12 hex>`.
///
/// The digest covers the whole identifier, so repositories that share a
/// name under different owners or hosts never share a checkout or an index.
pub fn storage_slug(repository_id: &str) -> String {
    let mut segments = repository_id
        .trim()
        .trim_end_matches('/')
        .rsplit('/')
        .take(2)
        .map(sanitize_segment)
        .collect::<Vec<_>>();
    segments.reverse();

    let digest = hex::encode(Sha256::digest(repository_id.as_bytes()));
    let stem = segments
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    if stem.is_empty() {
        digest[..12].to_string()
    } else {
        format!("{}-{}", stem, &digest[..12])
    }
}

fn sanitize_segment(segment: &str) -> String {
    segment
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}
