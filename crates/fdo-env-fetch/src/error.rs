//! ---
//! fdo_section: "05-integration"
//! fdo_subsection: "module"
//! fdo_type: "source"
//! fdo_scope: "code"
//! fdo_description: "Fetcher error taxonomy."
//! fdo_version: "v0.1.0"
//! fdo_owner: "tbd"
//! ---
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("'{0}' is not a full 40-character commit hash")]
    InvalidCommit(String),
    #[error("unable to invoke {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("git {args} exited with status {status:?}: {stderr}")]
    Git {
        args: String,
        status: Option<i32>,
        stderr: String,
    },
    #[error("commit {commit} is not known to {url}")]
    UnknownCommit { url: String, commit: String },
    #[error("HEAD of {path} is {actual}, expected {expected}")]
    HeadMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },
    #[error("{0} exists and is not a git checkout")]
    NotARepository(PathBuf),
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
