//! ---
//! fdo_section: "05-integration"
//! fdo_subsection: "module"
//! fdo_type: "source"
//! fdo_scope: "code"
//! fdo_description: "Clone, fetch and detached checkout of pinned revisions."
//! fdo_version: "v0.1.0"
//! fdo_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use fdo_env_common::config::{is_full_commit_hash, GitConfig, RepoConfig};
use tracing::{debug, info, warn};

use crate::error::FetchError;

/// How [`Fetcher::ensure_repo`] reached the pinned state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchAction {
    /// No checkout existed; cloned fresh.
    Cloned,
    /// A checkout without a resolvable HEAD was discarded and cloned again.
    Recloned,
    /// An existing checkout was fetched and moved.
    Updated,
}

/// A checkout whose HEAD equals `commit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinnedRepo {
    pub name: String,
    pub url: String,
    pub path: PathBuf,
    pub commit: String,
    pub action: FetchAction,
}

enum CheckoutState {
    Absent,
    Partial,
    Valid,
}

/// Drives the `git` command line.
#[derive(Debug, Clone)]
pub struct Fetcher {
    git: PathBuf,
}

impl Default for Fetcher {
    fn default() -> Self {
        Self::new("git")
    }
}

impl Fetcher {
    pub fn new(git: impl Into<PathBuf>) -> Self {
        Self { git: git.into() }
    }

    pub fn from_config(config: &GitConfig) -> Self {
        Self::new(config.program.clone())
    }

    /// Make `path` a checkout of `url` with HEAD detached at `commit`.
    ///
    /// One attempt per call; network failures surface as [`FetchError::Git`].
    pub fn ensure_repo(
        &self,
        name: &str,
        url: &str,
        path: &Path,
        commit: &str,
    ) -> Result<PinnedRepo, FetchError> {
        if !is_full_commit_hash(commit) {
            return Err(FetchError::InvalidCommit(commit.to_owned()));
        }
        let commit = commit.to_ascii_lowercase();

        let action = match self.inspect(path)? {
            CheckoutState::Absent => {
                self.clone_into(url, path)?;
                FetchAction::Cloned
            }
            CheckoutState::Partial => {
                warn!(repo = name, path = %path.display(), "HEAD not resolvable, discarding partial clone");
                fs::remove_dir_all(path).map_err(|source| FetchError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
                self.clone_into(url, path)?;
                FetchAction::Recloned
            }
            CheckoutState::Valid => {
                self.align_origin(name, url, path)?;
                FetchAction::Updated
            }
        };

        self.run(Some(path), &["fetch", "--quiet", "--tags", "origin"])?;

        let object = format!("{commit}^{{commit}}");
        if self
            .run(Some(path), &["rev-parse", "--verify", "--quiet", &object])
            .is_err()
        {
            return Err(FetchError::UnknownCommit {
                url: url.to_owned(),
                commit,
            });
        }

        self.run(
            Some(path),
            &[
                "-c",
                "advice.detachedHead=false",
                "checkout",
                "--quiet",
                "--force",
                "--detach",
                &commit,
            ],
        )?;

        let head = self.head(path)?;
        if head != commit {
            return Err(FetchError::HeadMismatch {
                path: path.to_path_buf(),
                expected: commit,
                actual: head,
            });
        }

        info!(repo = name, path = %path.display(), %commit, ?action, "repository pinned");
        Ok(PinnedRepo {
            name: name.to_owned(),
            url: url.to_owned(),
            path: path.to_path_buf(),
            commit,
            action,
        })
    }

    /// Pin every configured repository in order, stopping at the first failure.
    pub fn ensure_all(&self, repos: &[RepoConfig]) -> Result<Vec<PinnedRepo>, FetchError> {
        repos
            .iter()
            .map(|repo| self.ensure_repo(&repo.name, &repo.url, &repo.path, &repo.commit))
            .collect()
    }

    /// Full object name of HEAD.
    pub fn head(&self, path: &Path) -> Result<String, FetchError> {
        self.run(Some(path), &["rev-parse", "--verify", "HEAD"])
    }

    fn inspect(&self, path: &Path) -> Result<CheckoutState, FetchError> {
        if !path.exists() {
            return Ok(CheckoutState::Absent);
        }
        if !path.is_dir() {
            return Err(FetchError::NotARepository(path.to_path_buf()));
        }
        if !path.join(".git").exists() {
            let mut entries = fs::read_dir(path).map_err(|source| FetchError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            return match entries.next() {
                None => Ok(CheckoutState::Absent),
                Some(_) => Err(FetchError::NotARepository(path.to_path_buf())),
            };
        }
        // A broken .git lets discovery climb into an enclosing repository.
        let own_git_dir = match self.run(Some(path), &["rev-parse", "--git-dir"]) {
            Ok(dir) => dir == ".git",
            Err(FetchError::Git { .. }) => false,
            Err(other) => return Err(other),
        };
        if !own_git_dir {
            return Ok(CheckoutState::Partial);
        }
        match self.head(path) {
            Ok(_) => Ok(CheckoutState::Valid),
            Err(FetchError::Git { .. }) => Ok(CheckoutState::Partial),
            Err(other) => Err(other),
        }
    }

    fn clone_into(&self, url: &str, path: &Path) -> Result<(), FetchError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| FetchError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let target = path.to_string_lossy();
        self.run(None, &["clone", "--quiet", "--no-checkout", "--", url, &target])?;
        Ok(())
    }

    fn align_origin(&self, name: &str, url: &str, path: &Path) -> Result<(), FetchError> {
        match self.run(Some(path), &["remote", "get-url", "origin"]) {
            Ok(current) if current == url => Ok(()),
            Ok(current) => {
                info!(repo = name, from = %current, to = url, "re-pointing origin");
                self.run(Some(path), &["remote", "set-url", "origin", url])
                    .map(drop)
            }
            Err(FetchError::Git { .. }) => {
                self.run(Some(path), &["remote", "add", "origin", url]).map(drop)
            }
            Err(other) => Err(other),
        }
    }

    fn run(&self, cwd: Option<&Path>, args: &[&str]) -> Result<String, FetchError> {
        let mut command = Command::new(&self.git);
        if let Some(dir) = cwd {
            command.arg("-C").arg(dir);
        }
        command.args(args).env("GIT_TERMINAL_PROMPT", "0");
        debug!(git = %self.git.display(), ?args, "running git");

        let output = command.output().map_err(|source| FetchError::Spawn {
            program: self.git.display().to_string(),
            source,
        })?;
        if !output.status.success() {
            return Err(FetchError::Git {
                args: args.join(" "),
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_owned())
    }
}
