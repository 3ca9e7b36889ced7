//! ---
//! fdo_section: "01-core-functionality"
//! fdo_subsection: "module"
//! fdo_type: "source"
//! fdo_scope: "code"
//! fdo_description: "Shared primitives for the FDO environment driver."
//! fdo_version: "v0.1.0"
//! fdo_owner: "tbd"
//! ---
//! Shared primitives for the FDO environment driver workspace.
//! This crate exposes configuration loading, placeholder templating, and
//! logging setup consumed by every component crate.

pub mod config;
pub mod logging;
pub mod template;

pub use config::{
    BackoffKind, DeviceConfig, Endpoint, EndpointsConfig, EngineKind, EnvConfig, FixtureConfig,
    LoadedEnvConfig, LoggingConfig, OrchestratorConfig, OwnerRedirectEntry, PkiConfig,
    ProbeConfig, RepoConfig, RuntimeKind, RvInfoEntry, ServiceConfig,
};
pub use logging::{init_tracing, LogFormat};
pub use template::{render, Params, TemplateError};
