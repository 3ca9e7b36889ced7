//! ---
//! fdo_section: "05-integration"
//! fdo_subsection: "binary"
//! fdo_type: "source"
//! fdo_scope: "code"
//! fdo_description: "End-to-end onboarding pipeline with guaranteed teardown."
//! fdo_version: "v0.1.0"
//! fdo_owner: "tbd"
//! ---
//! `run-onboarding` drives one device through DI and TO against freshly started
//! services. Teardown runs whatever happened before it.

use std::fs;
use std::path::PathBuf;

use anyhow::{anyhow, bail, Context as _, Result};
use fdo_env_common::config::DeviceConfig;
use fdo_env_common::template::{render, Params};
use fdo_env_orchestrator::{ProcessOrchestrator, Runtime};
use fdo_env_probe::fdo;
use indexmap::IndexMap;
use tracing::{info, warn};

use crate::api;
use crate::context::{step, Context, StepFailure};
use crate::services::{shutdown_signal, start_all};
use crate::setup::setup;

pub async fn run_onboarding(ctx: &Context) -> Result<()> {
    ctx.config.device.validate_for_onboarding()?;
    setup(ctx).await?;

    let mut orchestrator = ProcessOrchestrator::new(&ctx.config.orchestrator);
    let outcome = tokio::select! {
        result = onboard(ctx, &mut orchestrator) => result,
        _ = shutdown_signal() => Err(anyhow!("interrupted").context(StepFailure {
            step: "run-onboarding".to_owned(),
        })),
    };

    let teardown = step("teardown", async { anyhow::Ok(orchestrator.stop_all().await?) }).await;
    match (outcome, teardown) {
        (Ok(guid), Ok(())) => {
            println!("device {guid} onboarded");
            Ok(())
        }
        (Ok(_), Err(err)) => Err(err),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(teardown)) => {
            warn!(error = %format!("{teardown:#}"), "teardown also failed");
            Err(err)
        }
    }
}

async fn onboard(ctx: &Context, orchestrator: &mut ProcessOrchestrator) -> Result<String> {
    start_all(ctx, orchestrator).await?;
    api::publish_rendezvous_config(ctx).await?;
    api::publish_owner_redirect(ctx).await?;

    let device = &ctx.config.device;
    let mut params = ctx.params()?;
    let guid_file = PathBuf::from(render(&device.guid_file, &params)?);
    params.insert("guid_file".to_owned(), guid_file.display().to_string());
    if guid_file.exists() {
        fs::remove_file(&guid_file)
            .with_context(|| format!("unable to remove stale {}", guid_file.display()))?;
    }

    let di = device_runtime(device, &device.di, &IndexMap::new(), &params)?;
    step("device-di", async {
        orchestrator
            .run_to_completion("device-di", &di, device.timeout)
            .await?;
        anyhow::Ok(())
    })
    .await?;

    let guid = step("read-device-guid", async { read_guid(&guid_file) }).await?;
    info!(device = %guid, "device initialised");
    params.insert("guid".to_owned(), guid.clone());

    api::send_ownership_voucher(ctx, &guid).await?;

    info!(wait = ?device.to0_wait, "waiting for owner TO0 registration");
    tokio::time::sleep(device.to0_wait).await;

    let to = device_runtime(device, &device.to, &device.to_env, &params)?;
    step("device-to", async {
        orchestrator
            .run_to_completion("device-to", &to, device.timeout)
            .await?;
        anyhow::Ok(())
    })
    .await?;
    Ok(guid)
}

/// Render a device argv. `extra_env` is layered over the shared device env.
fn device_runtime(
    device: &DeviceConfig,
    argv: &[String],
    extra_env: &IndexMap<String, String>,
    params: &Params,
) -> Result<Runtime> {
    let mut rendered = argv
        .iter()
        .map(|arg| render(arg, params))
        .collect::<Result<Vec<_>, _>>()?
        .into_iter();
    let Some(program) = rendered.next() else {
        bail!("device command is empty");
    };
    let env = device
        .env
        .iter()
        .chain(extra_env)
        .map(|(key, value)| Ok((key.clone(), render(value, params)?)))
        .collect::<Result<IndexMap<_, _>>>()?;
    Ok(Runtime::Local {
        program: PathBuf::from(program),
        args: rendered.collect(),
        env,
        cwd: None,
    })
}

fn read_guid(path: &std::path::Path) -> Result<String> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("device client did not write {}", path.display()))?;
    if raw.trim().is_empty() {
        bail!("{} is empty", path.display());
    }
    Ok(fdo::device_guid(&raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> Params {
        Params::from([("files".to_owned(), "/env/files".to_owned())])
    }

    fn device() -> DeviceConfig {
        DeviceConfig {
            env: IndexMap::from([
                ("STORE".to_owned(), "{files}/store".to_owned()),
                ("MODE".to_owned(), "di".to_owned()),
            ]),
            to_env: IndexMap::from([
                ("DEVICE_GUID".to_owned(), "{guid}".to_owned()),
                ("MODE".to_owned(), "to".to_owned()),
            ]),
            ..DeviceConfig::default()
        }
    }

    #[test]
    fn di_runs_before_the_guid_exists() {
        let device = device();
        let argv = vec!["/opt/fdo/client".to_owned(), "di".to_owned()];
        match device_runtime(&device, &argv, &IndexMap::new(), &params()).unwrap() {
            Runtime::Local { env, .. } => {
                assert_eq!(env["STORE"], "/env/files/store");
                assert_eq!(env["MODE"], "di");
                assert!(!env.contains_key("DEVICE_GUID"));
            }
            other => panic!("unexpected runtime {other:?}"),
        }
    }

    #[test]
    fn device_argv_is_rendered() {
        let device = device();
        let mut params = params();
        params.insert("guid".to_owned(), "abcd".to_owned());
        let argv = vec![
            "/opt/fdo/client".to_owned(),
            "to".to_owned(),
            "--store={files}/device".to_owned(),
        ];
        match device_runtime(&device, &argv, &device.to_env, &params).unwrap() {
            Runtime::Local { program, args, env, .. } => {
                assert_eq!(program, PathBuf::from("/opt/fdo/client"));
                assert_eq!(args, vec!["to", "--store=/env/files/device"]);
                assert_eq!(env["DEVICE_GUID"], "abcd");
                assert_eq!(env["MODE"], "to");
            }
            other => panic!("unexpected runtime {other:?}"),
        }
    }

    #[test]
    fn empty_guid_file_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("device.guid");
        fs::write(&path, "  \n").unwrap();
        assert!(read_guid(&path).is_err());
        fs::write(&path, "../rvinfo\n").unwrap();
        assert!(read_guid(&path).is_err());
        fs::write(&path, "0f1e2d3c4b5a69788796a5b4c3d2e1f0\n").unwrap();
        assert_eq!(read_guid(&path).unwrap(), "0f1e2d3c4b5a69788796a5b4c3d2e1f0");
    }
}
