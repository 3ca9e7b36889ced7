//! ---
//! fdo_section: "01-core-functionality"
//! fdo_subsection: "module"
//! fdo_type: "source"
//! fdo_scope: "code"
//! fdo_description: "Process orchestration errors."
//! fdo_version: "v0.1.0"
//! fdo_owner: "tbd"
//! ---
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use fdo_env_common::TemplateError;
use thiserror::Error;

use crate::process::ProcessStatus;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("service '{name}' is misconfigured: {reason}")]
    InvalidService { name: String, reason: String },
    #[error("service '{name}': {source}")]
    Template {
        name: String,
        #[source]
        source: TemplateError,
    },
    #[error("unable to start '{name}' ({program}): {source}")]
    Spawn {
        name: String,
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no process named '{0}'")]
    UnknownProcess(String),
    #[error("process '{name}' cannot become running from {from}")]
    InvalidTransition { name: String, from: ProcessStatus },
    #[error("process '{name}' exited with status {status:?}")]
    ExitStatus { name: String, status: Option<i32> },
    #[error("process '{name}' did not finish within {timeout:?}")]
    Timeout { name: String, timeout: Duration },
    #[error("failed to stop '{name}': {reason}")]
    Stop { name: String, reason: String },
    #[error("teardown failed for {}", TeardownList(.0))]
    Teardown(Vec<(String, ProcessError)>),
}

struct TeardownList<'a>(&'a [(String, ProcessError)]);

impl fmt::Display for TeardownList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, (name, err)) in self.0.iter().enumerate() {
            if idx > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{name}: {err}")?;
        }
        Ok(())
    }
}
