//! ---
//! fdo_section: "01-core-functionality"
//! fdo_subsection: "module"
//! fdo_type: "source"
//! fdo_scope: "code"
//! fdo_description: "Runtime descriptions and process table entries."
//! fdo_version: "v0.1.0"
//! fdo_owner: "tbd"
//! ---
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use fdo_env_common::config::{RuntimeKind, ServiceConfig};
use fdo_env_common::template::{render, Params};
use indexmap::IndexMap;

use crate::error::ProcessError;

/// How a service is launched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Runtime {
    /// A binary spawned directly.
    Local {
        program: PathBuf,
        args: Vec<String>,
        env: IndexMap<String, String>,
        cwd: Option<PathBuf>,
    },
    /// A foreground `<engine> run --rm` client; the container dies with it.
    Container {
        engine: String,
        image: String,
        args: Vec<String>,
        env: IndexMap<String, String>,
        volumes: Vec<String>,
    },
}

impl Runtime {
    /// Local runtime with no environment or working directory overrides.
    pub fn local<I, S>(program: impl Into<PathBuf>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Runtime::Local {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            env: IndexMap::new(),
            cwd: None,
        }
    }

    /// Build the runtime for a configured service, expanding fixture placeholders.
    pub fn from_service(
        name: &str,
        service: &ServiceConfig,
        params: &Params,
    ) -> Result<Self, ProcessError> {
        let expand = |value: &str| {
            render(value, params).map_err(|source| ProcessError::Template {
                name: name.to_owned(),
                source,
            })
        };
        let args = service
            .args
            .iter()
            .map(|arg| expand(arg))
            .collect::<Result<Vec<_>, _>>()?;
        let env = service
            .env
            .iter()
            .map(|(key, value)| Ok((key.clone(), expand(value)?)))
            .collect::<Result<IndexMap<_, _>, ProcessError>>()?;

        match service.runtime {
            RuntimeKind::Local => {
                let program = service
                    .program
                    .as_ref()
                    .ok_or_else(|| ProcessError::InvalidService {
                        name: name.to_owned(),
                        reason: "local runtime requires a program".to_owned(),
                    })?;
                let program = PathBuf::from(expand(&program.to_string_lossy())?);
                let cwd = service
                    .cwd
                    .as_ref()
                    .map(|dir| expand(&dir.to_string_lossy()).map(PathBuf::from))
                    .transpose()?;
                Ok(Runtime::Local {
                    program,
                    args,
                    env,
                    cwd,
                })
            }
            RuntimeKind::Container => {
                let image = service
                    .image
                    .clone()
                    .filter(|image| !image.is_empty())
                    .ok_or_else(|| ProcessError::InvalidService {
                        name: name.to_owned(),
                        reason: "container runtime requires an image".to_owned(),
                    })?;
                let volumes = service
                    .volumes
                    .iter()
                    .map(|volume| expand(volume))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Runtime::Container {
                    engine: service.engine.clone(),
                    image,
                    args,
                    env,
                    volumes,
                })
            }
        }
    }

    /// Program and argument vector used to launch `name` exposing `ports`.
    pub fn command_line(&self, name: &str, ports: &[u16]) -> (String, Vec<String>) {
        match self {
            Runtime::Local { program, args, .. } => {
                (program.display().to_string(), args.clone())
            }
            Runtime::Container {
                engine,
                image,
                args,
                env,
                volumes,
            } => {
                let mut argv = vec![
                    "run".to_owned(),
                    "--rm".to_owned(),
                    "--name".to_owned(),
                    name.to_owned(),
                ];
                for port in ports {
                    argv.push("-p".to_owned());
                    argv.push(format!("{port}:{port}"));
                }
                for volume in volumes {
                    argv.push("-v".to_owned());
                    argv.push(volume.clone());
                }
                for (key, value) in env {
                    argv.push("-e".to_owned());
                    argv.push(format!("{key}={value}"));
                }
                argv.push(image.clone());
                argv.extend(args.iter().cloned());
                (engine.clone(), argv)
            }
        }
    }

    pub fn is_container(&self) -> bool {
        matches!(self, Runtime::Container { .. })
    }
}

/// Lifecycle of a managed process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessStatus {
    Stopped,
    Starting,
    Running,
    Failed,
}

impl ProcessStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessStatus::Stopped => "stopped",
            ProcessStatus::Starting => "starting",
            ProcessStatus::Running => "running",
            ProcessStatus::Failed => "failed",
        }
    }

    /// Starting or running.
    pub fn is_live(&self) -> bool {
        matches!(self, ProcessStatus::Starting | ProcessStatus::Running)
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of one entry in the process table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedProcess {
    pub name: String,
    pub runtime: Runtime,
    pub ports: Vec<u16>,
    pub status: ProcessStatus,
    pub pid: Option<u32>,
    pub started_at: DateTime<Utc>,
    pub exit_code: Option<i32>,
}
