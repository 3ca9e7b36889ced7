//! ---
//! fdo_section: "05-integration"
//! fdo_subsection: "module"
//! fdo_type: "source"
//! fdo_scope: "code"
//! fdo_description: "Probe, step and sequence errors."
//! fdo_version: "v0.1.0"
//! fdo_owner: "tbd"
//! ---
use thiserror::Error;

/// Retry budget exhausted without a successful response.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error(
    "{url} did not succeed after {attempts} attempt(s){}",
    describe_last(.last_status, .last_error)
)]
pub struct ProbeError {
    pub url: String,
    /// Status of the final response, `None` when no response arrived.
    pub last_status: Option<u16>,
    pub attempts: u32,
    pub last_error: Option<String>,
}

fn describe_last(status: &Option<u16>, error: &Option<String>) -> String {
    match (status, error) {
        (Some(status), Some(error)) => format!(" (last status {status}: {error})"),
        (Some(status), None) => format!(" (last status {status})"),
        (None, Some(error)) => format!(" ({error})"),
        (None, None) => String::new(),
    }
}

/// A single step could not run or did not succeed.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("unknown template parameter `{0}`")]
    UnknownParameter(String),
    #[error("invalid device GUID '{0}': expected 32 hex digits")]
    InvalidGuid(String),
    #[error("invalid url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("step forwards the previous response but is first in the sequence")]
    NoPreviousResponse,
    #[error("unable to encode payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error(transparent)]
    Probe(#[from] ProbeError),
}

impl From<fdo_env_common::TemplateError> for StepError {
    fn from(err: fdo_env_common::TemplateError) -> Self {
        match err {
            fdo_env_common::TemplateError::UnknownParameter(name) => {
                StepError::UnknownParameter(name)
            }
        }
    }
}

/// The first failing step of a sequence; later steps never ran.
#[derive(Debug, Error)]
#[error("step {failed_step_index} ('{step_name}') failed")]
pub struct SequenceError {
    pub failed_step_index: usize,
    pub step_name: String,
    #[source]
    pub cause: StepError,
}
