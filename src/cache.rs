//! Persistent record of which repositories have a fully built index.
//!
//! Backed by a single JSON document (`{"<repository url>": true, ...}`)
//! that is read in full when the tracker opens and rewritten in full on every
//! mutation. There is no cross-process locking: if two processes share the
//! file, the last writer wins.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::error::{Error, Result};

pub struct CacheTracker {
    path: PathBuf,
    status: RwLock<BTreeMap<String, bool>>,
}

impl CacheTracker {
    /// Load the status document, starting empty if it does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cache`] if the file exists but is unreadable or not a
    /// JSON object of booleans.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let status = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .map_err(|e| Error::Cache(format!("read {}: {}", path.display(), e)))?;
            if content.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&content)
                    .map_err(|e| Error::Cache(format!("parse {}: {}", path.display(), e)))?
            }
        } else {
            BTreeMap::new()
        };

        tracing::debug!(path = %path.display(), entries = status.len(), "loaded cache status");
        Ok(Self {
            path,
            status: RwLock::new(status),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_indexed(&self, repository_id: &str) -> bool {
        self.status
            .read()
            .map(|s| s.get(repository_id).copied().unwrap_or(false))
            .unwrap_or(false)
    }

    /// Mark a repository as fully indexed and persist the whole document.
    /// Idempotent.
    pub fn mark_indexed(&self, repository_id: &str) -> Result<()> {
        let mut status = self
            .status
            .write()
            .map_err(|_| Error::Cache("status lock poisoned".to_string()))?;
        status.insert(repository_id.to_string(), true);
        write_document(&self.path, &status)
    }

    /// Snapshot of every entry, sorted by repository identifier.
    pub fn entries(&self) -> Vec<(String, bool)> {
        self.status
            .read()
            .map(|s| s.iter().map(|(k, v)| (k.clone(), *v)).collect())
            .unwrap_or_default()
    }
}

/// Write to a sibling temp file, then rename over the original.
fn write_document(path: &Path, status: &BTreeMap<String, bool>) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_string_pretty(status)
        .map_err(|e| Error::Cache(format!("serialize: {}", e)))?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_starts_empty() {
        let tmp = TempDir::new().unwrap();
        let cache = CacheTracker::open(tmp.path().join("status.json")).unwrap();
        assert!(!cache.is_indexed("https://github.com/acme/widgets"));
        assert!(cache.entries().is_empty());
    }

    #[test]
    fn test_mark_indexed_persists_across_reopen() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested/status.json");
        let cache = CacheTracker::open(&path).unwrap();
        cache.mark_indexed("https://github.com/acme/widgets").unwrap();
        assert!(cache.is_indexed("https://github.com/acme/widgets"));

        let reopened = CacheTracker::open(&path).unwrap();
        assert!(reopened.is_indexed("https://github.com/acme/widgets"));
        assert!(!reopened.is_indexed("https://github.com/acme/gadgets"));

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["https://github.com/acme/widgets"], serde_json::json!(true));
    }

    #[test]
    fn test_mark_indexed_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let cache = CacheTracker::open(tmp.path().join("status.json")).unwrap();
        cache.mark_indexed("a").unwrap();
        cache.mark_indexed("a").unwrap();
        assert_eq!(cache.entries(), vec![("a".to_string(), true)]);
    }

    #[test]
    fn test_reads_false_entries() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("status.json");
        std::fs::write(&path, r#"{"x": false, "y": true}"#).unwrap();
        let cache = CacheTracker::open(&path).unwrap();
        assert!(!cache.is_indexed("x"));
        assert!(cache.is_indexed("y"));
    }

    #[test]
    fn test_corrupt_file_is_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("status.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(CacheTracker::open(&path), Err(Error::Cache(_))));
    }
}
