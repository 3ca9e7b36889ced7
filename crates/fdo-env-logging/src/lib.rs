//! ---
//! fdo_section: "03-logging"
//! fdo_subsection: "module"
//! fdo_type: "source"
//! fdo_scope: "code"
//! fdo_description: "Structured pipeline step events."
//! fdo_version: "v0.1.0"
//! fdo_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Step-level events shared by the CLI and the onboarding pipeline.

use std::time::Duration;

use tracing::{error, info, Level};
use tracing_subscriber::{fmt as subscriber_fmt, prelude::*, EnvFilter, Registry};

/// Initialize a baseline tracing subscriber suitable for development and tests.
pub fn init() {
    let _ = Registry::default()
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(subscriber_fmt::layer().with_test_writer())
        .try_init();
}

/// Structured context attached to a step event.
#[derive(Debug, Default, Clone)]
pub struct StepContext<'a> {
    /// Service the step targets, if any.
    pub service: Option<&'a str>,
    /// Repository the step touches, if any.
    pub repo: Option<&'a str>,
    /// Device identifier carried by the step, if any.
    pub device: Option<&'a str>,
    /// Wall time spent in the step.
    pub elapsed: Option<Duration>,
}

impl<'a> StepContext<'a> {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a service name.
    pub fn with_service(mut self, service: &'a str) -> Self {
        self.service = Some(service);
        self
    }

    /// Attach a repository name.
    pub fn with_repo(mut self, repo: &'a str) -> Self {
        self.repo = Some(repo);
        self
    }

    /// Attach a device identifier.
    pub fn with_device(mut self, device: &'a str) -> Self {
        self.device = Some(device);
        self
    }

    /// Attach the time the step took.
    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = Some(elapsed);
        self
    }
}

/// Outcome of a pipeline step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// The step completed successfully.
    Success,
    /// The step failed; the pipeline stops here.
    Fault,
}

impl StepOutcome {
    /// Stable lowercase label used in log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            StepOutcome::Success => "success",
            StepOutcome::Fault => "fault",
        }
    }
}

/// Emit a standardized step event with a success/fault outcome.
pub fn log_step_event(
    context: Option<&StepContext>,
    step: &str,
    message: &str,
    outcome: StepOutcome,
) {
    let default = StepContext::default();
    let ctx = context.unwrap_or(&default);
    let elapsed_ms = ctx.elapsed.map(|d| d.as_millis() as u64).unwrap_or_default();
    match outcome {
        StepOutcome::Success => info!(
            step,
            outcome = outcome.as_str(),
            service = ctx.service.unwrap_or(""),
            repo = ctx.repo.unwrap_or(""),
            device = ctx.device.unwrap_or(""),
            elapsed_ms,
            message = %message
        ),
        StepOutcome::Fault => error!(
            step,
            outcome = outcome.as_str(),
            service = ctx.service.unwrap_or(""),
            repo = ctx.repo.unwrap_or(""),
            device = ctx.device.unwrap_or(""),
            elapsed_ms,
            message = %message
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_does_not_panic() {
        init();
        init();
    }

    #[test]
    fn step_event_helper_emits() {
        init();
        let ctx = StepContext::new()
            .with_service("manufacturer")
            .with_elapsed(Duration::from_millis(12));
        log_step_event(
            Some(&ctx),
            "health-check",
            "manufacturer healthy",
            StepOutcome::Success,
        );
        log_step_event(None, "fetch-repos", "clone failed", StepOutcome::Fault);
    }

    #[test]
    fn outcome_labels_are_stable() {
        assert_eq!(StepOutcome::Success.as_str(), "success");
        assert_eq!(StepOutcome::Fault.as_str(), "fault");
    }
}
