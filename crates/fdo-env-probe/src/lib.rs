//! ---
//! fdo_section: "05-integration"
//! fdo_subsection: "module"
//! fdo_type: "source"
//! fdo_scope: "code"
//! fdo_description: "HTTP probe and sequencer."
//! fdo_version: "v0.1.0"
//! fdo_owner: "tbd"
//! ---
//! Readiness probing with explicit retry budgets, and ordered HTTP step
//! sequences that stop at the first failure.

pub mod error;
pub mod fdo;
pub mod retry;
pub mod sequencer;
pub mod step;

pub use error::{ProbeError, SequenceError, StepError};
pub use retry::{Backoff, RetryPolicy};
pub use sequencer::Sequencer;
pub use step::{Expect, Payload, ProbeStep, StepOutput};
