//! ---
//! fdo_section: "01-core-functionality"
//! fdo_subsection: "module"
//! fdo_type: "source"
//! fdo_scope: "code"
//! fdo_description: "Service process orchestration."
//! fdo_version: "v0.1.0"
//! fdo_owner: "tbd"
//! ---
//! Starts FDO services as local binaries or containers, tracks their lifecycle
//! and tears them down in reverse order.

pub mod error;
pub mod orchestrator;
pub mod process;

pub use error::ProcessError;
pub use orchestrator::ProcessOrchestrator;
pub use process::{ManagedProcess, ProcessStatus, Runtime};
