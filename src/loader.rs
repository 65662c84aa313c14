//! Repository loader.
//!
//! Walks a fetched repository tree and turns every file whose extension is in
//! the [`AllowList`] into a [`Document`]. There is no content-based filtering;
//! files outside the allow-list (binaries, images, build output) are skipped
//! silently. Version-control and dependency directories are never entered.

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::language::{AllowList, Language};
use crate::models::Document;

/// Directories pruned from the walk.
const EXCLUDED_DIRS: &[&str] = &["**/.git", "**/.git/**"];

/// Load every allowed file under `root`, sorted by relative path.
pub fn load_repository(root: &Path, allow: &AllowList) -> Result<Vec<Document>> {
    if !root.exists() {
        return Err(Error::RepositoryUnavailable(format!(
            "path does not exist: {}",
            root.display()
        )));
    }
    if !root.is_dir() {
        return Err(Error::RepositoryUnavailable(format!(
            "not a directory: {}",
            root.display()
        )));
    }

    let excluded = build_globset(EXCLUDED_DIRS)?;
    let mut docs = Vec::new();
    let mut skipped = 0usize;

    let walker = WalkDir::new(root).into_iter().filter_entry(|entry| {
        let rel = entry.path().strip_prefix(root).unwrap_or(entry.path());
        rel.as_os_str().is_empty() || !excluded.is_match(rel)
    });

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        if !allow.allows(path) {
            skipped += 1;
            continue;
        }

        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to read file");
                continue;
            }
        };

        let relative = path.strip_prefix(root).unwrap_or(path);
        docs.push(Document {
            path: relative_path_string(relative),
            content: String::from_utf8_lossy(&bytes).into_owned(),
            language: Language::from_path(path),
        });
    }

    docs.sort_by(|a, b| a.path.cmp(&b.path));
    tracing::info!(
        root = %root.display(),
        loaded = docs.len(),
        skipped,
        extensions = allow.len(),
        "loaded repository documents"
    );
    Ok(docs)
}

fn relative_path_string(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn build_globset(patterns: &[&str]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| Error::RepositoryUnavailable(format!("bad glob {}: {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| Error::RepositoryUnavailable(e.to_string()))
}
