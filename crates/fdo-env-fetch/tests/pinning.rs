//! ---
//! fdo_section: "05-integration"
//! fdo_subsection: "test"
//! fdo_type: "source"
//! fdo_scope: "code"
//! fdo_description: "Pinning behaviour against local upstream repositories."
//! fdo_version: "v0.1.0"
//! fdo_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use fdo_env_common::config::RepoConfig;
use fdo_env_fetch::{FetchAction, FetchError, Fetcher};

fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

fn git(dir: &Path, args: &[&str]) -> String {
    let out = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args([
            "-c",
            "user.name=fdo-env",
            "-c",
            "user.email=fdo-env@company.invalid",
            "-c",
            "commit.gpgsign=false",
        ])
        .args(args)
        .output()
        .unwrap();
    assert!(
        out.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&out.stderr)
    );
    String::from_utf8_lossy(&out.stdout).trim().to_owned()
}

/// Upstream repository with two commits, oldest first.
fn upstream(root: &Path) -> (PathBuf, Vec<String>) {
    let dir = root.join("upstream");
    fs::create_dir_all(&dir).unwrap();
    git(&dir, &["init", "--quiet"]);
    let mut commits = Vec::new();
    for msg in ["first", "second"] {
        fs::write(dir.join("README"), msg).unwrap();
        git(&dir, &["add", "README"]);
        git(&dir, &["commit", "--quiet", "-m", msg]);
        commits.push(git(&dir, &["rev-parse", "HEAD"]));
    }
    (dir, commits)
}

fn url(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[test]
fn head_follows_the_pinned_commit() {
    if !git_available() {
        eprintln!("git not found, skipping");
        return;
    }
    let tmp = tempfile::tempdir().unwrap();
    let (up, commits) = upstream(tmp.path());
    let target = tmp.path().join("src/manufacturer");
    let fetcher = Fetcher::default();

    let pinned = fetcher
        .ensure_repo("manufacturer", &url(&up), &target, &commits[0])
        .unwrap();
    assert_eq!(pinned.action, FetchAction::Cloned);
    assert_eq!(fetcher.head(&target).unwrap(), commits[0]);

    let moved = fetcher
        .ensure_repo("manufacturer", &url(&up), &target, &commits[1].to_uppercase())
        .unwrap();
    assert_eq!(moved.action, FetchAction::Updated);
    assert_eq!(moved.commit, commits[1]);
    assert_eq!(fetcher.head(&target).unwrap(), commits[1]);

    fetcher
        .ensure_repo("manufacturer", &url(&up), &target, &commits[0])
        .unwrap();
    assert_eq!(fetcher.head(&target).unwrap(), commits[0]);
}

#[test]
fn unknown_commit_is_reported() {
    if !git_available() {
        return;
    }
    let tmp = tempfile::tempdir().unwrap();
    let (up, _) = upstream(tmp.path());
    let err = Fetcher::default()
        .ensure_repo("owner", &url(&up), &tmp.path().join("owner"), &"f".repeat(40))
        .unwrap_err();
    assert!(matches!(err, FetchError::UnknownCommit { .. }), "{err}");
}

#[test]
fn option_like_url_is_treated_as_a_repository() {
    if !git_available() {
        return;
    }
    let tmp = tempfile::tempdir().unwrap();
    let marker = tmp.path().join("marker");
    let url = format!("--upload-pack=touch {}", marker.display());
    let err = Fetcher::default()
        .ensure_repo("owner", &url, &tmp.path().join("owner"), &"a".repeat(40))
        .unwrap_err();
    assert!(matches!(err, FetchError::Git { .. }), "{err}");
    assert!(!marker.exists(), "url was parsed as a git option");
}

#[test]
fn partial_clone_is_discarded_and_recloned() {
    if !git_available() {
        return;
    }
    let tmp = tempfile::tempdir().unwrap();
    let (up, commits) = upstream(tmp.path());
    let target = tmp.path().join("partial");
    fs::create_dir_all(&target).unwrap();
    git(&target, &["init", "--quiet"]);

    let fetcher = Fetcher::default();
    let pinned = fetcher
        .ensure_repo("partial", &url(&up), &target, &commits[1])
        .unwrap();
    assert_eq!(pinned.action, FetchAction::Recloned);
    assert_eq!(fetcher.head(&target).unwrap(), commits[1]);
}

#[test]
fn origin_is_repointed_when_url_changes() {
    if !git_available() {
        return;
    }
    let tmp = tempfile::tempdir().unwrap();
    let (up, commits) = upstream(tmp.path());
    let mirror = tmp.path().join("mirror.git");
    git(
        tmp.path(),
        &["clone", "--quiet", "--bare", &url(&up), &url(&mirror)],
    );
    let target = tmp.path().join("checkout");
    let fetcher = Fetcher::default();

    fetcher
        .ensure_repo("svc", &url(&up), &target, &commits[0])
        .unwrap();
    fetcher
        .ensure_repo("svc", &url(&mirror), &target, &commits[1])
        .unwrap();
    assert_eq!(git(&target, &["remote", "get-url", "origin"]), url(&mirror));
    assert_eq!(fetcher.head(&target).unwrap(), commits[1]);
}

#[test]
fn ensure_all_stops_at_first_failure() {
    if !git_available() {
        return;
    }
    let tmp = tempfile::tempdir().unwrap();
    let (up, commits) = upstream(tmp.path());
    let repo = |name: &str, commit: &str| RepoConfig {
        name: name.to_owned(),
        url: url(&up),
        path: tmp.path().join(name),
        commit: commit.to_owned(),
    };
    let repos = vec![
        repo("one", &commits[0]),
        repo("two", "not-a-commit"),
        repo("three", &commits[1]),
    ];

    let err = Fetcher::default().ensure_all(&repos).unwrap_err();
    assert!(matches!(err, FetchError::InvalidCommit(_)));
    assert!(tmp.path().join("one/.git").is_dir());
    assert!(!tmp.path().join("three").exists());
}
