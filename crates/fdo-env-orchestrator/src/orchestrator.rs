//! ---
//! fdo_section: "01-core-functionality"
//! fdo_subsection: "module"
//! fdo_type: "source"
//! fdo_scope: "code"
//! fdo_description: "Process table with start, readiness marking and teardown."
//! fdo_version: "v0.1.0"
//! fdo_owner: "tbd"
//! ---
//! The orchestrator owns every service child it starts. Children are spawned
//! with `kill_on_drop`, so dropping the orchestrator without [`stop_all`]
//! still reaps local processes.
//!
//! [`stop_all`]: ProcessOrchestrator::stop_all

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use chrono::Utc;
use fdo_env_common::config::OrchestratorConfig;
use indexmap::IndexMap;
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::error::ProcessError;
use crate::process::{ManagedProcess, ProcessStatus, Runtime};

struct Entry {
    info: ManagedProcess,
    child: Option<Child>,
}

/// Owner of the name to process map.
pub struct ProcessOrchestrator {
    log_dir: Option<PathBuf>,
    stop_grace: Duration,
    processes: IndexMap<String, Entry>,
}

impl std::fmt::Debug for ProcessOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessOrchestrator")
            .field("log_dir", &self.log_dir)
            .field("stop_grace", &self.stop_grace)
            .field("processes", &self.processes.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ProcessOrchestrator {
    pub fn new(config: &OrchestratorConfig) -> Self {
        Self {
            log_dir: config.log_dir.clone(),
            stop_grace: config.stop_grace,
            processes: IndexMap::new(),
        }
    }

    /// Spawn `runtime` under `name` and return immediately with status `starting`.
    ///
    /// A name that is still starting or running is returned unchanged; a stopped or
    /// failed entry is replaced.
    pub async fn start(
        &mut self,
        name: &str,
        runtime: Runtime,
        ports: Vec<u16>,
    ) -> Result<ManagedProcess, ProcessError> {
        if self.processes.contains_key(name) {
            let status = self.refresh(name)?;
            if status.is_live() {
                debug!(process = name, %status, "already started");
                return self.snapshot(name);
            }
            self.processes.shift_remove(name);
        }

        let child = self.spawn(name, &runtime, &ports)?;
        let info = ManagedProcess {
            name: name.to_owned(),
            pid: child.id(),
            runtime,
            ports,
            status: ProcessStatus::Starting,
            started_at: Utc::now(),
            exit_code: None,
        };
        info!(
            process = name,
            pid = ?info.pid,
            ports = ?info.ports,
            container = info.runtime.is_container(),
            "process started"
        );
        self.processes.insert(
            name.to_owned(),
            Entry {
                info: info.clone(),
                child: Some(child),
            },
        );
        Ok(info)
    }

    /// Record a successful readiness probe.
    pub fn mark_running(&mut self, name: &str) -> Result<ManagedProcess, ProcessError> {
        let entry = self
            .processes
            .get_mut(name)
            .ok_or_else(|| ProcessError::UnknownProcess(name.to_owned()))?;
        match entry.info.status {
            ProcessStatus::Starting => {
                entry.info.status = ProcessStatus::Running;
                info!(process = name, "process ready");
            }
            ProcessStatus::Running => {}
            from => {
                return Err(ProcessError::InvalidTransition {
                    name: name.to_owned(),
                    from,
                })
            }
        }
        Ok(entry.info.clone())
    }

    /// Poll the OS for an exit and update the entry accordingly.
    pub fn refresh(&mut self, name: &str) -> Result<ProcessStatus, ProcessError> {
        let entry = self
            .processes
            .get_mut(name)
            .ok_or_else(|| ProcessError::UnknownProcess(name.to_owned()))?;
        let Some(child) = entry.child.as_mut() else {
            return Ok(entry.info.status);
        };
        let exited = child.try_wait().map_err(|err| ProcessError::Stop {
            name: name.to_owned(),
            reason: err.to_string(),
        })?;
        if let Some(status) = exited {
            entry.child = None;
            entry.info.exit_code = status.code();
            entry.info.status = if status.success() {
                ProcessStatus::Stopped
            } else {
                ProcessStatus::Failed
            };
            warn!(process = name, code = ?status.code(), "process exited");
        }
        Ok(entry.info.status)
    }

    pub fn status(&self, name: &str) -> Option<ManagedProcess> {
        self.processes.get(name).map(|entry| entry.info.clone())
    }

    /// Snapshots in start order.
    pub fn processes(&self) -> Vec<ManagedProcess> {
        self.processes
            .values()
            .map(|entry| entry.info.clone())
            .collect()
    }

    /// Stop `name`. Unknown or already stopped names succeed without doing anything.
    ///
    /// Local processes receive SIGTERM and containers `engine stop`; either gets
    /// `stop_grace` to exit before the client is killed. The entry always ends
    /// `stopped`, keeping the last exit code.
    pub async fn stop(&mut self, name: &str) -> Result<(), ProcessError> {
        let grace = self.stop_grace;
        let Some(entry) = self.processes.get_mut(name) else {
            debug!(process = name, "stop requested for unknown process");
            return Ok(());
        };
        let Some(mut child) = entry.child.take() else {
            entry.info.status = ProcessStatus::Stopped;
            return Ok(());
        };

        let mut failure = None;
        let already_exited = child
            .try_wait()
            .map_err(|err| ProcessError::Stop {
                name: name.to_owned(),
                reason: err.to_string(),
            })?;

        let exit = match already_exited {
            Some(status) => Some(status),
            None => {
                let asked = match &entry.info.runtime {
                    Runtime::Container { engine, .. } => {
                        match stop_container(engine, name, grace).await {
                            Ok(()) => true,
                            Err(err) => {
                                failure = Some(err);
                                false
                            }
                        }
                    }
                    Runtime::Local { .. } => request_exit(&mut child),
                };
                if !asked {
                    if let Err(err) = child.start_kill() {
                        warn!(process = name, ?err, "kill failed");
                    }
                }
                match timeout(grace, child.wait()).await {
                    Ok(Ok(status)) => Some(status),
                    Ok(Err(err)) => {
                        failure.get_or_insert(ProcessError::Stop {
                            name: name.to_owned(),
                            reason: err.to_string(),
                        });
                        None
                    }
                    Err(_) => {
                        warn!(process = name, ?grace, "grace period elapsed, killing");
                        if let Err(err) = child.start_kill() {
                            warn!(process = name, ?err, "kill failed");
                        }
                        match child.wait().await {
                            Ok(status) => Some(status),
                            Err(err) => {
                                failure.get_or_insert(ProcessError::Stop {
                                    name: name.to_owned(),
                                    reason: err.to_string(),
                                });
                                None
                            }
                        }
                    }
                }
            }
        };

        entry.info.exit_code = exit.and_then(|status| status.code());
        entry.info.status = ProcessStatus::Stopped;
        match failure {
            None => {
                info!(process = name, code = ?entry.info.exit_code, "process stopped");
                Ok(())
            }
            Some(err) => {
                error!(process = name, error = %err, "process stop reported a failure");
                Err(err)
            }
        }
    }

    /// Stop everything in reverse start order, attempting every process.
    pub async fn stop_all(&mut self) -> Result<(), ProcessError> {
        let names: Vec<String> = self.processes.keys().rev().cloned().collect();
        let mut failures = Vec::new();
        for name in names {
            if let Err(err) = self.stop(&name).await {
                failures.push((name, err));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(ProcessError::Teardown(failures))
        }
    }

    /// Run a one-shot command to completion. The process table is not touched.
    pub async fn run_to_completion(
        &self,
        name: &str,
        runtime: &Runtime,
        limit: Duration,
    ) -> Result<(), ProcessError> {
        let mut child = self.spawn(name, runtime, &[])?;
        info!(process = name, pid = ?child.id(), "running to completion");
        let status = match timeout(limit, child.wait()).await {
            Ok(result) => result.map_err(|err| ProcessError::Stop {
                name: name.to_owned(),
                reason: err.to_string(),
            })?,
            Err(_) => {
                if let Err(err) = child.start_kill() {
                    warn!(process = name, ?err, "kill after timeout failed");
                }
                let _ = child.wait().await;
                return Err(ProcessError::Timeout {
                    name: name.to_owned(),
                    timeout: limit,
                });
            }
        };
        if !status.success() {
            return Err(ProcessError::ExitStatus {
                name: name.to_owned(),
                status: status.code(),
            });
        }
        info!(process = name, "completed");
        Ok(())
    }

    fn spawn(&self, name: &str, runtime: &Runtime, ports: &[u16]) -> Result<Child, ProcessError> {
        let (program, args) = runtime.command_line(name, ports);
        let mut command = Command::new(&program);
        command.args(&args).stdin(Stdio::null()).kill_on_drop(true);
        if let Runtime::Local { env, cwd, .. } = runtime {
            command.envs(env);
            if let Some(dir) = cwd {
                command.current_dir(dir);
            }
        }

        let (stdout, stderr) = self.output_for(name)?;
        command.stdout(stdout).stderr(stderr);

        debug!(process = name, %program, ?args, "spawning");
        command.spawn().map_err(|source| ProcessError::Spawn {
            name: name.to_owned(),
            program,
            source,
        })
    }

    fn output_for(&self, name: &str) -> Result<(Stdio, Stdio), ProcessError> {
        let Some(dir) = &self.log_dir else {
            return Ok((Stdio::null(), Stdio::null()));
        };
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source: std::io::Error| ProcessError::Io { path, source }
        };
        fs::create_dir_all(dir).map_err(io_err(dir.as_path()))?;
        let path = dir.join(format!("{name}.log"));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(io_err(path.as_path()))?;
        let stderr = file.try_clone().map_err(io_err(path.as_path()))?;
        Ok((Stdio::from(file), Stdio::from(stderr)))
    }

    fn snapshot(&self, name: &str) -> Result<ManagedProcess, ProcessError> {
        self.status(name)
            .ok_or_else(|| ProcessError::UnknownProcess(name.to_owned()))
    }
}

/// Ask a local child to exit with SIGTERM. `false` means no signal was delivered.
#[cfg(unix)]
fn request_exit(child: &mut Child) -> bool {
    let Some(pid) = child.id().and_then(|pid| libc::pid_t::try_from(pid).ok()) else {
        return false;
    };
    // SAFETY: `pid` is our own child and has not been reaped yet.
    unsafe { libc::kill(pid, libc::SIGTERM) == 0 }
}

#[cfg(not(unix))]
fn request_exit(child: &mut Child) -> bool {
    child.start_kill().is_ok()
}

async fn stop_container(engine: &str, name: &str, grace: Duration) -> Result<(), ProcessError> {
    let grace_secs = grace.as_secs().to_string();
    let output = Command::new(engine)
        .args(["stop", "-t", grace_secs.as_str(), name])
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|source| ProcessError::Spawn {
            name: name.to_owned(),
            program: engine.to_owned(),
            source,
        })?;
    if output.status.success() {
        Ok(())
    } else {
        Err(ProcessError::Stop {
            name: name.to_owned(),
            reason: format!(
                "{engine} stop exited with {:?}: {}",
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        })
    }
}
