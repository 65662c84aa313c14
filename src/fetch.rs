//! Repository fetching.
//!
//! [`RepositoryFetcher`] materializes a remote repository as a local tree.
//! [`GitFetcher`] shells out to `git clone` into
//! `<repo_base>/<owner>-<repo>-<hash>`; a non-empty existing directory is
//! reused as-is (no pull), an empty one is removed and cloned afresh.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::config::{PathsConfig, RepositoryConfig};
use crate::error::{Error, Result};
use crate::url::storage_slug;

#[async_trait]
pub trait RepositoryFetcher: Send + Sync {
    /// Make the repository available locally and return the tree root.
    async fn fetch(&self, url: &str) -> Result<PathBuf>;
}

/// Clones with the `git` CLI.
pub struct GitFetcher {
    repo_base: PathBuf,
    branch: Option<String>,
    shallow: bool,
}

impl GitFetcher {
    pub fn new(paths: &PathsConfig, repository: &RepositoryConfig) -> Self {
        Self {
            repo_base: paths.repo_base.clone(),
            branch: repository.branch.clone(),
            shallow: repository.shallow,
        }
    }

    /// Local directory a URL is cloned into, named like its vector index.
    pub fn checkout_dir(&self, url: &str) -> PathBuf {
        self.repo_base.join(storage_slug(url))
    }
}

#[async_trait]
impl RepositoryFetcher for GitFetcher {
    async fn fetch(&self, url: &str) -> Result<PathBuf> {
        let dest = self.checkout_dir(url);
        let url = url.to_string();
        let branch = self.branch.clone();
        let shallow = self.shallow;

        tokio::task::spawn_blocking(move || -> Result<PathBuf> {
            if is_populated(&dest) {
                tracing::info!(path = %dest.display(), "repository already present, reusing");
                return Ok(dest);
            }
            if dest.exists() {
                std::fs::remove_dir_all(&dest)?;
            }
            git_clone(&url, branch.as_deref(), shallow, &dest)?;
            tracing::info!(url = %url, path = %dest.display(), "cloned repository");
            Ok(dest)
        })
        .await
        .map_err(|e| Error::RepositoryUnavailable(format!("clone task failed: {}", e)))?
    }
}

fn is_populated(dir: &Path) -> bool {
    std::fs::read_dir(dir)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

fn git_clone(url: &str, branch: Option<&str>, shallow: bool, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut cmd = Command::new("git");
    cmd.arg("clone");
    if let Some(branch) = branch {
        cmd.args(["--branch", branch, "--single-branch"]);
    }
    if shallow {
        cmd.args(["--depth", "1"]);
    }
    cmd.arg(url);
    cmd.arg(dest);

    let output = cmd.output().map_err(|e| {
        Error::RepositoryUnavailable(format!("failed to execute 'git clone' (is git installed?): {}", e))
    })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::RepositoryUnavailable(format!(
            "git clone failed: {}",
            stderr.trim()
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fetcher_in(tmp: &TempDir) -> GitFetcher {
        let paths = PathsConfig {
            repo_base: tmp.path().to_path_buf(),
            ..PathsConfig::default()
        };
        GitFetcher::new(&paths, &RepositoryConfig::default())
    }

    #[test]
    fn test_checkout_dir_is_named_after_repository() {
        let tmp = TempDir::new().unwrap();
        let fetcher = fetcher_in(&tmp);
        let dir = fetcher.checkout_dir("https://github.com/acme/widgets");
        assert_eq!(dir.parent().unwrap(), tmp.path());
        let name = dir.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("acme-widgets-"), "{}", name);
    }

    #[tokio::test]
    async fn test_same_name_different_owner_gets_own_checkout() {
        let tmp = TempDir::new().unwrap();
        let fetcher = fetcher_in(&tmp);
        let alice = fetcher.checkout_dir("https://github.com/alice/widgets");
        let bob = fetcher.checkout_dir("https://github.com/bob/widgets");
        assert_ne!(alice, bob);

        std::fs::create_dir_all(&alice).unwrap();
        std::fs::write(alice.join("README.md"), "alice's code").unwrap();
        std::fs::create_dir_all(&bob).unwrap();
        std::fs::write(bob.join("README.md"), "bob's code").unwrap();

        let root = fetcher.fetch("https://github.com/bob/widgets").await.unwrap();
        assert_eq!(root, bob);
        assert_eq!(
            std::fs::read_to_string(root.join("README.md")).unwrap(),
            "bob's code"
        );
    }

    #[tokio::test]
    async fn test_populated_checkout_is_reused() {
        let tmp = TempDir::new().unwrap();
        let fetcher = fetcher_in(&tmp);
        let dir = fetcher.checkout_dir("https://github.com/acme/widgets");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("README.md"), "cached").unwrap();

        // Would fail with a network error if it tried to clone.
        let root = fetcher.fetch("https://github.com/acme/widgets").await.unwrap();
        assert_eq!(root, dir);
        assert_eq!(std::fs::read_to_string(root.join("README.md")).unwrap(), "cached");
    }

    #[test]
    fn test_is_populated() {
        let tmp = TempDir::new().unwrap();
        assert!(!is_populated(tmp.path()));
        assert!(!is_populated(&tmp.path().join("missing")));
        std::fs::write(tmp.path().join("x"), "").unwrap();
        assert!(is_populated(tmp.path()));
    }
}
