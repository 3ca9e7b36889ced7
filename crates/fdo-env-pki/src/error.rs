//! ---
//! fdo_section: "06-security-pki"
//! fdo_subsection: "module"
//! fdo_type: "source"
//! fdo_scope: "code"
//! fdo_description: "Error taxonomy for fixture and provisioning failures."
//! fdo_version: "v0.1.0"
//! fdo_owner: "tbd"
//! ---
use std::path::PathBuf;

use thiserror::Error;

use crate::role::Role;

/// Filesystem failures while preparing or removing a fixture.
#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{0} exists but is not a directory")]
    NotADirectory(PathBuf),
    #[error("fixture directory {path} is not writable: {source}")]
    NotWritable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("fixture directory {0} is missing; run setup first")]
    Missing(PathBuf),
}

impl FixtureError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Failures raised while generating or loading trust material.
#[derive(Debug, Error)]
pub enum ProvisioningError {
    #[error(transparent)]
    Fixture(#[from] FixtureError),
    #[error("unable to invoke {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} exited with status {status:?}: {stderr}")]
    EngineFailed {
        program: String,
        status: Option<i32>,
        stderr: String,
    },
    #[error("certificate generation failed: {0}")]
    Rcgen(#[from] rcgen::Error),
    #[error("key at {path} is unusable: {reason}")]
    InvalidKey { path: PathBuf, reason: String },
    #[error("certificate at {path} is unusable: {reason}")]
    InvalidCertificate { path: PathBuf, reason: String },
    #[error("certificate {path} was not issued for the current {role} key")]
    KeyMismatch { role: Role, path: PathBuf },
}
