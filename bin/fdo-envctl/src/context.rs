//! ---
//! fdo_section: "05-integration"
//! fdo_subsection: "binary"
//! fdo_type: "source"
//! fdo_scope: "code"
//! fdo_description: "Loaded configuration, component construction and the step runner."
//! fdo_version: "v0.1.0"
//! fdo_owner: "tbd"
//! ---
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context as _, Result};
use fdo_env_common::config::EnvConfig;
use fdo_env_common::template::Params;
use fdo_env_logging::{log_step_event, StepContext, StepOutcome};
use fdo_env_pki::Fixture;
use fdo_env_probe::{RetryPolicy, Sequencer};
use thiserror::Error;
use tracing::info;

/// Attached as context to the error of the step that halted a command.
#[derive(Debug, Error)]
#[error("step '{step}' failed")]
pub struct StepFailure {
    pub step: String,
}

/// Everything a command needs, built once from the effective configuration.
pub struct Context {
    pub config: EnvConfig,
    pub source: Option<PathBuf>,
}

impl Context {
    pub fn new(config: EnvConfig, source: Option<PathBuf>) -> Self {
        Self { config, source }
    }

    pub fn root(&self) -> &Path {
        &self.config.fixture.root
    }

    /// The fixture created by `setup`.
    pub fn fixture(&self) -> Result<Fixture> {
        Fixture::open(self.root())
            .with_context(|| format!("fixture at {} is not set up", self.root().display()))
    }

    /// Fixture directories as template parameters.
    pub fn params(&self) -> Result<Params> {
        Ok(self.fixture()?.params())
    }

    pub fn retry(&self) -> RetryPolicy {
        RetryPolicy::from_config(&self.config.probe)
    }

    pub fn sequencer(&self) -> Result<Sequencer> {
        Sequencer::from_config(&self.config.probe).context("unable to build HTTP client")
    }
}

/// Run one named step, logging its outcome and tagging a failure with [`StepFailure`].
pub async fn step<T, Fut>(name: &str, work: Fut) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    let started = Instant::now();
    info!(step = name, "step started");
    let result = work.await;
    let ctx = StepContext::new().with_elapsed(started.elapsed());
    match result {
        Ok(value) => {
            log_step_event(Some(&ctx), name, "step completed", StepOutcome::Success);
            Ok(value)
        }
        Err(err) => {
            log_step_event(Some(&ctx), name, &format!("{err:#}"), StepOutcome::Fault);
            Err(err.context(StepFailure {
                step: name.to_owned(),
            }))
        }
    }
}
