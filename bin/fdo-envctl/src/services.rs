//! ---
//! fdo_section: "05-integration"
//! fdo_subsection: "binary"
//! fdo_type: "source"
//! fdo_scope: "code"
//! fdo_description: "Service bring-up, readiness probing and health checks."
//! fdo_version: "v0.1.0"
//! fdo_owner: "tbd"
//! ---
use anyhow::{anyhow, bail, Result};
use fdo_env_common::config::Endpoint;
use fdo_env_orchestrator::{ProcessOrchestrator, ProcessStatus, Runtime};
use fdo_env_probe::fdo::{health_steps, health_url};
use tokio::signal;
use tracing::{info, warn};

use crate::context::{step, Context, StepFailure};

/// Start every configured service, then wait for each to report healthy.
///
/// Processes are started in configuration order and marked running only after
/// their readiness probe succeeds.
pub async fn start_all(ctx: &Context, orchestrator: &mut ProcessOrchestrator) -> Result<()> {
    let services = &ctx.config.services;
    if services.is_empty() {
        bail!("no services configured; add [services.<name>] tables to the configuration");
    }
    let params = ctx.params()?;

    for (name, service) in services {
        step(&format!("start:{name}"), async {
            let runtime = Runtime::from_service(name, service, &params)?;
            orchestrator.start(name, runtime, service.ports.clone()).await?;
            anyhow::Ok(())
        })
        .await?;
    }

    let sequencer = ctx.sequencer()?;
    let retry = ctx.retry();
    for (name, service) in services {
        step(&format!("ready:{name}"), async {
            let url = match (&service.health_url, service.resolved_endpoint(name)) {
                (Some(url), _) => url.to_string(),
                (None, Some(endpoint)) => health_url(&ctx.config.endpoints, endpoint),
                (None, None) => bail!("service '{name}' has no readiness URL"),
            };
            if let Err(err) = sequencer
                .probe(&url, sequencer.request_timeout(), &retry)
                .await
            {
                let status = orchestrator.refresh(name)?;
                if status == ProcessStatus::Failed || status == ProcessStatus::Stopped {
                    let code = orchestrator.status(name).and_then(|p| p.exit_code);
                    return Err(anyhow!(err).context(format!(
                        "service '{name}' exited with status {code:?} before becoming ready"
                    )));
                }
                return Err(err.into());
            }
            orchestrator.mark_running(name)?;
            anyhow::Ok(())
        })
        .await?;
    }
    Ok(())
}

/// `start-services`: bring everything up and hold it until interrupted.
///
/// An interrupt during startup tears down whatever was already started.
pub async fn start_services(ctx: &Context) -> Result<()> {
    let mut orchestrator = ProcessOrchestrator::new(&ctx.config.orchestrator);
    let started = tokio::select! {
        result = start_all(ctx, &mut orchestrator) => result,
        _ = shutdown_signal() => Err(anyhow!("interrupted").context(StepFailure {
            step: "start-services".to_owned(),
        })),
    };
    if let Err(err) = started {
        if let Err(teardown) = orchestrator.stop_all().await {
            warn!(error = %teardown, "teardown after failed start reported errors");
        }
        return Err(err);
    }

    for process in orchestrator.processes() {
        println!(
            "{} {} pid={} ports={:?}",
            process.name,
            process.status,
            process.pid.map(|p| p.to_string()).unwrap_or_else(|| "-".into()),
            process.ports
        );
    }
    info!("services running; press Ctrl+C to stop");
    shutdown_signal().await;

    step("teardown", async { anyhow::Ok(orchestrator.stop_all().await?) }).await
}

/// `health-check`: one pass over every FDO endpoint with the configured budget.
pub async fn health_check(ctx: &Context) -> Result<()> {
    let sequencer = ctx.sequencer()?;
    let steps = health_steps(&ctx.config.endpoints, &Endpoint::ALL, ctx.retry());
    let outputs = step("health-check", async {
        anyhow::Ok(sequencer.run_sequence(&steps).await?)
    })
    .await?;
    for output in outputs {
        println!("{} {}", output.name, output.status);
    }
    Ok(())
}

pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        tokio::select! {
            _ = ctrl_c() => {},
            _ = terminate() => {},
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c().await;
    }
}

async fn ctrl_c() {
    if let Err(err) = signal::ctrl_c().await {
        warn!(?err, "failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            term.recv().await;
        }
        Err(err) => {
            warn!(?err, "failed to install SIGTERM handler");
            std::future::pending::<()>().await;
        }
    }
}
