//! ---
//! fdo_section: "05-integration"
//! fdo_subsection: "binary"
//! fdo_type: "source"
//! fdo_scope: "code"
//! fdo_description: "Control CLI for FDO onboarding environments."
//! fdo_version: "v0.1.0"
//! fdo_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context as _, Result};
use clap::{Parser, Subcommand};
use fdo_env_common::config::EnvConfig;
use fdo_env_common::logging::init_tracing;
use tracing::debug;

mod api;
mod context;
mod onboarding;
mod services;
mod setup;

use context::{Context, StepFailure};

const DEFAULT_CONFIG_CANDIDATES: [&str; 2] = ["fdo-env.toml", "configs/fdo-env.toml"];

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "FDO onboarding environment driver",
    long_about = None
)]
struct Cli {
    /// Configuration file (FDO_ENV_CONFIG takes precedence when set).
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Override the fixture root from the configuration.
    #[arg(long = "fixture-root", value_name = "DIR", env = "FDO_ENV_ROOT", global = true)]
    fixture_root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create the fixture and provision keys and certificates.
    Setup,
    /// Remove the fixture root.
    Clean,
    /// Clone or update the configured repositories at their pinned commits.
    FetchRepos,
    /// Start all services, wait for health, and hold them until Ctrl+C.
    StartServices,
    /// Probe the health endpoint of every FDO service.
    HealthCheck,
    /// Publish rendezvous directives to the manufacturer.
    PublishRendezvousConfig,
    /// Print the rendezvous directives known to the manufacturer.
    GetRendezvousConfig,
    /// Publish the owner's TO2 addresses.
    PublishOwnerRedirect,
    /// Print the owner's TO2 addresses.
    GetOwnerRedirect,
    /// Transfer a device's ownership voucher from manufacturer to owner.
    SendOwnershipVoucher {
        /// Device GUID.
        #[arg(value_name = "GUID")]
        guid: String,
    },
    /// Full pipeline: setup, services, configuration, device DI, voucher, device TO.
    RunOnboarding,
    /// Print the effective configuration as TOML.
    ShowConfig,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if let Some(failure) = err.downcast_ref::<StepFailure>() {
                debug!(step = %failure.step, "command halted");
            }
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let ctx = load_context(&cli)?;
    init_tracing("fdo-envctl", &ctx.config.logging)?;
    if let Some(source) = &ctx.source {
        debug!(config = %source.display(), "configuration loaded");
    }

    match cli.command {
        Commands::Setup => setup::setup(&ctx).await,
        Commands::Clean => setup::clean(&ctx).await,
        Commands::FetchRepos => setup::fetch_repos(&ctx).await,
        Commands::StartServices => services::start_services(&ctx).await,
        Commands::HealthCheck => services::health_check(&ctx).await,
        Commands::PublishRendezvousConfig => api::publish_rendezvous_config(&ctx).await,
        Commands::GetRendezvousConfig => api::get_rendezvous_config(&ctx).await,
        Commands::PublishOwnerRedirect => api::publish_owner_redirect(&ctx).await,
        Commands::GetOwnerRedirect => api::get_owner_redirect(&ctx).await,
        Commands::SendOwnershipVoucher { guid } => {
            api::send_ownership_voucher(&ctx, &guid).await
        }
        Commands::RunOnboarding => onboarding::run_onboarding(&ctx).await,
        Commands::ShowConfig => show_config(&ctx),
    }
}

fn load_context(cli: &Cli) -> Result<Context> {
    let loaded = match &cli.config {
        Some(path) => {
            if !path.exists() && std::env::var_os(EnvConfig::ENV_CONFIG_PATH).is_none() {
                bail!("config file {} does not exist", path.display());
            }
            EnvConfig::load_with_source(&[path.as_path()])?
        }
        None => EnvConfig::load_with_source(&DEFAULT_CONFIG_CANDIDATES)?,
    };
    let mut config = loaded.config;
    if let Some(root) = &cli.fixture_root {
        config.fixture.root = root.clone();
    }
    Ok(Context::new(config, loaded.source))
}

fn show_config(ctx: &Context) -> Result<()> {
    match &ctx.source {
        Some(path) => eprintln!("# loaded from {}", path.display()),
        None => eprintln!("# built-in defaults"),
    }
    let rendered =
        toml::to_string_pretty(&ctx.config).context("unable to render configuration")?;
    print!("{rendered}");
    Ok(())
}
