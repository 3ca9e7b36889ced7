//! ---
//! fdo_section: "01-core-functionality"
//! fdo_subsection: "module"
//! fdo_type: "source"
//! fdo_scope: "code"
//! fdo_description: "Environment configuration consumed by every driver component."
//! fdo_version: "v0.1.0"
//! fdo_owner: "tbd"
//! ---
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr, DurationMilliSeconds, DurationSeconds};
use tracing::debug;
use url::Url;

use crate::logging::LogFormat;
use crate::template::placeholders;

fn default_fixture_root() -> PathBuf {
    PathBuf::from(".tmp/fdo-env")
}

fn default_openssl() -> PathBuf {
    PathBuf::from("openssl")
}

fn default_git() -> PathBuf {
    PathBuf::from("git")
}

fn default_country() -> String {
    "US".to_owned()
}

fn default_organization() -> String {
    "Example".to_owned()
}

fn default_validity_days() -> u32 {
    365
}

fn default_manufacturer_url() -> Url {
    Url::parse("http://127.0.0.1:8038").expect("valid default manufacturer url")
}

fn default_rendezvous_url() -> Url {
    Url::parse("http://127.0.0.1:8041").expect("valid default rendezvous url")
}

fn default_owner_url() -> Url {
    Url::parse("http://127.0.0.1:8043").expect("valid default owner url")
}

fn default_health_path() -> String {
    "/health".to_owned()
}

fn default_voucher_path() -> String {
    "/api/v1/vouchers/{guid}".to_owned()
}

fn default_owner_voucher_path() -> String {
    "/api/v1/owner/vouchers".to_owned()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_probe_attempts() -> u32 {
    30
}

fn default_initial_backoff() -> Duration {
    Duration::from_secs(1)
}

fn default_max_backoff() -> Duration {
    Duration::from_secs(10)
}

fn default_stop_grace() -> Duration {
    Duration::from_secs(10)
}

fn default_container_engine() -> String {
    "docker".to_owned()
}

fn default_guid_file() -> String {
    "{files}/device.guid".to_owned()
}

fn default_device_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_to0_wait() -> Duration {
    Duration::from_secs(5)
}

fn default_rendezvous() -> Vec<RvInfoEntry> {
    vec![RvInfoEntry {
        dns: "localhost".to_owned(),
        device_port: 8041,
        owner_port: 8041,
        protocol: "http".to_owned(),
        ip: "127.0.0.1".to_owned(),
    }]
}

fn default_owner_redirect() -> Vec<OwnerRedirectEntry> {
    vec![OwnerRedirectEntry {
        dns: "localhost".to_owned(),
        port: 8043,
        protocol: "http".to_owned(),
        ip: "127.0.0.1".to_owned(),
    }]
}

/// Complete description of one onboarding environment.
///
/// Every component receives the slice it needs at construction; nothing in the
/// workspace reads ambient environment variables after the config is loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvConfig {
    #[serde(default)]
    pub fixture: FixtureConfig,
    #[serde(default)]
    pub pki: PkiConfig,
    #[serde(default)]
    pub git: GitConfig,
    #[serde(default)]
    pub repos: Vec<RepoConfig>,
    #[serde(default)]
    pub endpoints: EndpointsConfig,
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub services: IndexMap<String, ServiceConfig>,
    #[serde(default = "default_rendezvous")]
    pub rendezvous: Vec<RvInfoEntry>,
    #[serde(default = "default_owner_redirect")]
    pub owner_redirect: Vec<OwnerRedirectEntry>,
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Metadata describing where an [`EnvConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedEnvConfig {
    pub config: EnvConfig,
    /// `None` when no file was found and the built-in defaults are in effect.
    pub source: Option<PathBuf>,
}

impl EnvConfig {
    pub const ENV_CONFIG_PATH: &str = "FDO_ENV_CONFIG";

    /// Load configuration from disk, respecting the `FDO_ENV_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration together with the effective source path.
    ///
    /// An explicit `FDO_ENV_CONFIG` path must exist. Candidates are inspected in
    /// order and the first existing one wins; with none present the defaults apply.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedEnvConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedEnvConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        for candidate in candidates {
            let candidate = candidate.as_ref();
            if candidate.exists() {
                let config = Self::from_path(candidate)?;
                return Ok(LoadedEnvConfig {
                    config,
                    source: Some(candidate.to_path_buf()),
                });
            }
        }

        debug!(
            inspected = %candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", "),
            "no configuration file found, using defaults"
        );
        let config = Self::default();
        config.validate()?;
        Ok(LoadedEnvConfig {
            config,
            source: None,
        })
    }

    fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        contents
            .parse::<EnvConfig>()
            .with_context(|| format!("invalid config file {}", path.display()))
    }

    /// Look up a configured service by name.
    pub fn service(&self, name: &str) -> Option<&ServiceConfig> {
        self.services.get(name)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        if self.fixture.root.as_os_str().is_empty() {
            return Err(anyhow!("fixture root cannot be empty"));
        }
        self.pki.validate()?;

        let mut names = HashSet::new();
        for repo in &self.repos {
            repo.validate()?;
            if !names.insert(repo.name.as_str()) {
                return Err(anyhow!("repository '{}' declared more than once", repo.name));
            }
        }

        self.endpoints.validate()?;
        self.probe.validate()?;

        for (name, service) in &self.services {
            if name.trim().is_empty() {
                return Err(anyhow!("service names cannot be empty"));
            }
            service.validate(name)?;
        }

        if self.rendezvous.is_empty() {
            return Err(anyhow!("at least one rendezvous entry is required"));
        }
        if self.owner_redirect.is_empty() {
            return Err(anyhow!("at least one owner redirect entry is required"));
        }
        Ok(())
    }
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            fixture: FixtureConfig::default(),
            pki: PkiConfig::default(),
            git: GitConfig::default(),
            repos: Vec::new(),
            endpoints: EndpointsConfig::default(),
            probe: ProbeConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            services: IndexMap::new(),
            rendezvous: default_rendezvous(),
            owner_redirect: default_owner_redirect(),
            device: DeviceConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl std::str::FromStr for EnvConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: EnvConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureConfig {
    #[serde(default = "default_fixture_root")]
    pub root: PathBuf,
}

impl Default for FixtureConfig {
    fn default() -> Self {
        Self {
            root: default_fixture_root(),
        }
    }
}

/// Which crypto engine the provisioner drives.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    #[default]
    Rcgen,
    Openssl,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PkiConfig {
    #[serde(default)]
    pub engine: EngineKind,
    /// Path or name of the `openssl` binary used by the external engine.
    #[serde(default = "default_openssl")]
    pub openssl: PathBuf,
    #[serde(default = "default_country")]
    pub country: String,
    #[serde(default = "default_organization")]
    pub organization: String,
    #[serde(default = "default_validity_days")]
    pub validity_days: u32,
}

impl Default for PkiConfig {
    fn default() -> Self {
        Self {
            engine: EngineKind::default(),
            openssl: default_openssl(),
            country: default_country(),
            organization: default_organization(),
            validity_days: default_validity_days(),
        }
    }
}

impl PkiConfig {
    pub fn validate(&self) -> Result<()> {
        if self.validity_days == 0 {
            return Err(anyhow!("pki validity_days must be greater than zero"));
        }
        if self.country.len() != 2 || !self.country.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(anyhow!(
                "pki country '{}' must be a two-letter code",
                self.country
            ));
        }
        if self.organization.trim().is_empty() {
            return Err(anyhow!("pki organization cannot be empty"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitConfig {
    #[serde(default = "default_git")]
    pub program: PathBuf,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            program: default_git(),
        }
    }
}

/// A repository pinned to one exact revision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RepoConfig {
    pub name: String,
    pub url: String,
    pub path: PathBuf,
    pub commit: String,
}

impl RepoConfig {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(anyhow!("repository name cannot be empty"));
        }
        if self.url.trim().is_empty() {
            return Err(anyhow!("repository '{}' has an empty url", self.name));
        }
        if self.path.as_os_str().is_empty() {
            return Err(anyhow!("repository '{}' has an empty path", self.name));
        }
        if !is_full_commit_hash(&self.commit) {
            return Err(anyhow!(
                "repository '{}' commit '{}' is not a 40-character hex hash",
                self.name,
                self.commit
            ));
        }
        Ok(())
    }
}

/// Whether `value` is a complete 40-character SHA-1 object name.
pub fn is_full_commit_hash(value: &str) -> bool {
    value.len() == 40 && value.chars().all(|c| c.is_ascii_hexdigit())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointsConfig {
    #[serde(default = "default_manufacturer_url")]
    pub manufacturer: Url,
    #[serde(default = "default_rendezvous_url")]
    pub rendezvous: Url,
    #[serde(default = "default_owner_url")]
    pub owner: Url,
    #[serde(default = "default_health_path")]
    pub health_path: String,
    /// Manufacturer path serving a voucher; must contain `{guid}`.
    #[serde(default = "default_voucher_path")]
    pub voucher_path: String,
    /// Owner path accepting a voucher upload.
    #[serde(default = "default_owner_voucher_path")]
    pub owner_voucher_path: String,
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            manufacturer: default_manufacturer_url(),
            rendezvous: default_rendezvous_url(),
            owner: default_owner_url(),
            health_path: default_health_path(),
            voucher_path: default_voucher_path(),
            owner_voucher_path: default_owner_voucher_path(),
        }
    }
}

impl EndpointsConfig {
    pub fn validate(&self) -> Result<()> {
        for (label, path) in [
            ("health_path", &self.health_path),
            ("voucher_path", &self.voucher_path),
            ("owner_voucher_path", &self.owner_voucher_path),
        ] {
            if !path.starts_with('/') {
                return Err(anyhow!("endpoint {} '{}' must start with '/'", label, path));
            }
        }
        if !self.voucher_path.contains("{guid}") {
            return Err(anyhow!(
                "endpoint voucher_path '{}' must contain the {{guid}} placeholder",
                self.voucher_path
            ));
        }
        Ok(())
    }

    /// Resolve the base URL of a well-known service.
    pub fn base(&self, endpoint: Endpoint) -> &Url {
        match endpoint {
            Endpoint::Manufacturer => &self.manufacturer,
            Endpoint::Rendezvous => &self.rendezvous,
            Endpoint::Owner => &self.owner,
        }
    }
}

/// The three FDO services the driver talks to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Endpoint {
    Manufacturer,
    Rendezvous,
    Owner,
}

impl Endpoint {
    pub const ALL: [Endpoint; 3] = [Endpoint::Manufacturer, Endpoint::Rendezvous, Endpoint::Owner];

    pub fn as_str(&self) -> &'static str {
        match self {
            Endpoint::Manufacturer => "manufacturer",
            Endpoint::Rendezvous => "rendezvous",
            Endpoint::Owner => "owner",
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    #[default]
    Fixed,
    Exponential,
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    #[serde(default = "default_request_timeout", rename = "request_timeout_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub request_timeout: Duration,
    #[serde(default = "default_probe_attempts")]
    pub attempts: u32,
    #[serde(default)]
    pub backoff: BackoffKind,
    #[serde(default = "default_initial_backoff", rename = "initial_backoff_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub initial_backoff: Duration,
    #[serde(default = "default_max_backoff", rename = "max_backoff_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub max_backoff: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            request_timeout: default_request_timeout(),
            attempts: default_probe_attempts(),
            backoff: BackoffKind::default(),
            initial_backoff: default_initial_backoff(),
            max_backoff: default_max_backoff(),
        }
    }
}

impl ProbeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.attempts == 0 {
            return Err(anyhow!("probe attempts must be at least 1"));
        }
        if self.request_timeout.is_zero() {
            return Err(anyhow!("probe request_timeout_ms must be greater than zero"));
        }
        if self.backoff == BackoffKind::Exponential && self.initial_backoff > self.max_backoff {
            return Err(anyhow!(
                "probe initial_backoff_ms cannot exceed max_backoff_ms"
            ));
        }
        Ok(())
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Directory receiving `<service>.log` captures; output is discarded when unset.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
    #[serde(default = "default_stop_grace", rename = "stop_grace_secs")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub stop_grace: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            log_dir: None,
            stop_grace: default_stop_grace(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    #[default]
    Local,
    Container,
}

/// A long-running service the orchestrator launches.
///
/// `args`, `env` values and `cwd` may reference `{root}`, `{certs}`, `{db}` and
/// `{files}`; they are expanded against the fixture before spawning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub runtime: RuntimeKind,
    /// Binary for local services.
    #[serde(default)]
    pub program: Option<PathBuf>,
    /// Image for container services.
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default = "default_container_engine")]
    pub engine: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: IndexMap<String, String>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    /// Host paths mounted into containers, `host:container` form.
    #[serde(default)]
    pub volumes: Vec<String>,
    #[serde(default)]
    pub ports: Vec<u16>,
    /// Which FDO endpoint this service answers for; defaults to the service name.
    #[serde(default)]
    pub endpoint: Option<Endpoint>,
    /// Explicit readiness URL, overriding the endpoint's health path.
    #[serde(default)]
    pub health_url: Option<Url>,
}

impl ServiceConfig {
    pub fn validate(&self, name: &str) -> Result<()> {
        match self.runtime {
            RuntimeKind::Local if self.program.is_none() => Err(anyhow!(
                "service '{}' uses the local runtime but has no program",
                name
            )),
            RuntimeKind::Container if self.image.as_deref().map_or(true, str::is_empty) => {
                Err(anyhow!(
                    "service '{}' uses the container runtime but has no image",
                    name
                ))
            }
            _ => Ok(()),
        }?;
        if self.health_url.is_none() && self.resolved_endpoint(name).is_none() {
            return Err(anyhow!(
                "service '{}' needs either an endpoint or a health_url for readiness probing",
                name
            ));
        }
        Ok(())
    }

    /// Endpoint this service serves, falling back to matching the service name.
    pub fn resolved_endpoint(&self, name: &str) -> Option<Endpoint> {
        self.endpoint.or_else(|| {
            Endpoint::ALL
                .into_iter()
                .find(|endpoint| endpoint.as_str() == name)
        })
    }
}

/// One rendezvous directive as accepted by `POST /api/v1/rvinfo`.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RvInfoEntry {
    pub dns: String,
    #[serde_as(as = "DisplayFromStr")]
    pub device_port: u16,
    #[serde_as(as = "DisplayFromStr")]
    pub owner_port: u16,
    pub protocol: String,
    pub ip: String,
}

/// One owner address as accepted by `POST /api/v1/owner/redirect`.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OwnerRedirectEntry {
    pub dns: String,
    #[serde_as(as = "DisplayFromStr")]
    pub port: u16,
    pub protocol: String,
    pub ip: String,
}

/// External device client invocations used by the onboarding run.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Device initialisation argv; must write the device GUID to `guid_file`.
    #[serde(default)]
    pub di: Vec<String>,
    /// Transfer-ownership argv.
    #[serde(default)]
    pub to: Vec<String>,
    /// Environment of both device commands. DI runs before the GUID exists, so
    /// values may not reference `{guid}`.
    #[serde(default)]
    pub env: IndexMap<String, String>,
    /// Extra environment of the TO command, layered over `env`. May use `{guid}`.
    #[serde(default)]
    pub to_env: IndexMap<String, String>,
    #[serde(default = "default_guid_file")]
    pub guid_file: String,
    #[serde(default = "default_device_timeout", rename = "timeout_secs")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub timeout: Duration,
    /// Pause between voucher upload and TO, letting the owner finish TO0.
    #[serde(default = "default_to0_wait", rename = "to0_wait_secs")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub to0_wait: Duration,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            di: Vec::new(),
            to: Vec::new(),
            env: IndexMap::new(),
            to_env: IndexMap::new(),
            guid_file: default_guid_file(),
            timeout: default_device_timeout(),
            to0_wait: default_to0_wait(),
        }
    }
}

impl DeviceConfig {
    /// Onboarding needs both device phases configured.
    pub fn validate_for_onboarding(&self) -> Result<()> {
        if self.di.is_empty() {
            return Err(anyhow!("device.di command is required for onboarding"));
        }
        if self.to.is_empty() {
            return Err(anyhow!("device.to command is required for onboarding"));
        }
        if let Some(arg) = self.di.iter().find(|arg| uses_guid(arg)) {
            return Err(anyhow!(
                "device.di argument '{arg}' references {{guid}}, which only exists after DI"
            ));
        }
        if let Some((key, _)) = self.env.iter().find(|(_, value)| uses_guid(value)) {
            return Err(anyhow!(
                "device.env {key} references {{guid}}, which only exists after DI; move it to device.to_env"
            ));
        }
        Ok(())
    }
}

fn uses_guid(template: &str) -> bool {
    placeholders(template).contains(&"guid")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Directory for rolling JSON log files; stderr only when unset.
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default)]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: None,
            format: LogFormat::default(),
            file_prefix: None,
        }
    }
}
