//! ---
//! fdo_section: "05-integration"
//! fdo_subsection: "binary"
//! fdo_type: "source"
//! fdo_scope: "code"
//! fdo_description: "Management API commands against running FDO services."
//! fdo_version: "v0.1.0"
//! fdo_owner: "tbd"
//! ---
use anyhow::{Context as _, Result};
use fdo_env_common::template::Params;
use fdo_env_probe::fdo;
use fdo_env_probe::{ProbeStep, StepOutput};
use tracing::info;

use crate::context::{step, Context, StepFailure};

async fn run(
    ctx: &Context,
    name: &str,
    steps: Vec<ProbeStep>,
    params: Params,
) -> Result<Vec<StepOutput>> {
    let sequencer = ctx.sequencer()?;
    step(name, async {
        anyhow::Ok(sequencer.run_sequence_with(&steps, &params).await?)
    })
    .await
}

fn print_body(output: &StepOutput) {
    match output.json() {
        Ok(value) => match serde_json::to_string_pretty(&value) {
            Ok(pretty) => println!("{pretty}"),
            Err(_) => println!("{}", output.text()),
        },
        Err(_) => println!("{}", output.text()),
    }
}

pub async fn publish_rendezvous_config(ctx: &Context) -> Result<()> {
    let steps = fdo::publish_rvinfo_steps(&ctx.config.endpoints, &ctx.config.rendezvous)?;
    run(ctx, "publish-rendezvous-config", steps, Params::new()).await?;
    println!("published {} rendezvous entries", ctx.config.rendezvous.len());
    Ok(())
}

pub async fn get_rendezvous_config(ctx: &Context) -> Result<()> {
    let steps = fdo::get_rvinfo_steps(&ctx.config.endpoints);
    for output in run(ctx, "get-rendezvous-config", steps, Params::new()).await? {
        print_body(&output);
    }
    Ok(())
}

pub async fn publish_owner_redirect(ctx: &Context) -> Result<()> {
    let steps =
        fdo::publish_owner_redirect_steps(&ctx.config.endpoints, &ctx.config.owner_redirect)?;
    run(ctx, "publish-owner-redirect", steps, Params::new()).await?;
    println!(
        "published {} owner redirect entries",
        ctx.config.owner_redirect.len()
    );
    Ok(())
}

pub async fn get_owner_redirect(ctx: &Context) -> Result<()> {
    let steps = fdo::get_owner_redirect_steps(&ctx.config.endpoints);
    for output in run(ctx, "get-owner-redirect", steps, Params::new()).await? {
        print_body(&output);
    }
    Ok(())
}

/// Move the voucher of `guid` from the manufacturer to the owner.
pub async fn send_ownership_voucher(ctx: &Context, guid: &str) -> Result<()> {
    let params = fdo::voucher_params(guid).context(StepFailure {
        step: "send-ownership-voucher".to_owned(),
    })?;
    let steps = fdo::send_voucher_steps(&ctx.config.endpoints);
    let outputs = run(ctx, "send-ownership-voucher", steps, params).await?;
    let voucher_len = outputs.first().map(|o| o.body.len()).unwrap_or_default();
    info!(device = guid.trim(), voucher_len, "voucher accepted by owner");
    println!("ownership voucher for {} sent to owner", guid.trim());
    Ok(())
}
