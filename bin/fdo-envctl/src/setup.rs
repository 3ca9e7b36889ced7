//! ---
//! fdo_section: "05-integration"
//! fdo_subsection: "binary"
//! fdo_type: "source"
//! fdo_scope: "code"
//! fdo_description: "Fixture setup, clean and repository fetch commands."
//! fdo_version: "v0.1.0"
//! fdo_owner: "tbd"
//! ---
use anyhow::Result;
use fdo_env_fetch::Fetcher;
use fdo_env_pki::{clean as clean_fixture, ensure_fixture, CleanOutcome, Provisioner};
use tracing::{info, warn};

use crate::context::{step, Context};

/// Create the fixture and provision every role's key and certificate.
pub async fn setup(ctx: &Context) -> Result<()> {
    step("setup", async {
        let fixture = ensure_fixture(ctx.root())?;
        let provisioner = Provisioner::from_config(fixture, &ctx.config.pki);
        for provisioned in provisioner.provision_all()? {
            let cert = provisioned.certificate.get();
            info!(
                role = %provisioned.role,
                key_created = provisioned.key.is_new(),
                cert_created = provisioned.certificate.is_new(),
                fingerprint = %provisioned.key.get().fingerprint(),
                not_after = %cert.not_after,
                "trust material ready"
            );
        }
        println!("fixture ready at {}", ctx.root().display());
        anyhow::Ok(())
    })
    .await
}

pub async fn clean(ctx: &Context) -> Result<()> {
    step("clean", async {
        match clean_fixture(ctx.root())? {
            CleanOutcome::Removed => println!("removed {}", ctx.root().display()),
            CleanOutcome::Absent => println!("nothing to clean at {}", ctx.root().display()),
        }
        anyhow::Ok(())
    })
    .await
}

/// Pin every configured repository, stopping at the first failure.
pub async fn fetch_repos(ctx: &Context) -> Result<()> {
    if ctx.config.repos.is_empty() {
        warn!("no repositories configured");
        return Ok(());
    }
    let fetcher = Fetcher::from_config(&ctx.config.git);
    for repo in &ctx.config.repos {
        let name = format!("fetch:{}", repo.name);
        let pinned = step(&name, async {
            anyhow::Ok(fetcher.ensure_repo(&repo.name, &repo.url, &repo.path, &repo.commit)?)
        })
        .await?;
        println!(
            "{} {} at {} ({:?})",
            pinned.name,
            pinned.path.display(),
            pinned.commit,
            pinned.action
        );
    }
    Ok(())
}
