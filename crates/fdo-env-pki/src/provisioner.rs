//! ---
//! fdo_section: "06-security-pki"
//! fdo_subsection: "module"
//! fdo_type: "source"
//! fdo_scope: "code"
//! fdo_description: "Idempotent create-if-absent provisioning of role keys and certificates."
//! fdo_version: "v0.1.0"
//! fdo_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fdo_env_common::config::PkiConfig;
use rcgen::KeyPair;
use sha2::{Digest, Sha256};
use tracing::{debug, info};
use x509_parser::pem::parse_x509_pem;

use crate::engine::{engine_from_config, CryptoEngine, Subject};
use crate::error::{FixtureError, ProvisioningError};
use crate::fixture::{discard, persist, staging_path, Fixture};
use crate::role::Role;

/// Default certificate lifetime.
pub const DEFAULT_VALIDITY_DAYS: u32 = 365;

/// Result of a create-if-absent operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Created<T> {
    /// Generated by this call.
    New(T),
    /// Already present; returned unchanged.
    Existing(T),
}

impl<T> Created<T> {
    pub fn is_new(&self) -> bool {
        matches!(self, Created::New(_))
    }

    pub fn get(&self) -> &T {
        match self {
            Created::New(value) | Created::Existing(value) => value,
        }
    }

    pub fn into_inner(self) -> T {
        match self {
            Created::New(value) | Created::Existing(value) => value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyEncoding {
    Pkcs8Der,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertEncoding {
    Pem,
}

/// Private key of one role as stored in the fixture.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyMaterial {
    pub role: Role,
    pub path: PathBuf,
    pub encoding: KeyEncoding,
    der: Vec<u8>,
    public_key: Vec<u8>,
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("role", &self.role)
            .field("path", &self.path)
            .field("encoding", &self.encoding)
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

impl KeyMaterial {
    fn load(role: Role, path: &Path) -> Result<Self, ProvisioningError> {
        let der = fs::read(path).map_err(|err| FixtureError::io(path, err))?;
        let pair = KeyPair::try_from(der.as_slice()).map_err(|err| {
            ProvisioningError::InvalidKey {
                path: path.to_path_buf(),
                reason: err.to_string(),
            }
        })?;
        Ok(Self {
            role,
            path: path.to_path_buf(),
            encoding: KeyEncoding::Pkcs8Der,
            public_key: pair.public_key_raw().to_vec(),
            der,
        })
    }

    /// Raw private key bytes exactly as stored on disk.
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Uncompressed SEC1 public point.
    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    /// SHA-256 over the public key, hex encoded; safe to log.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.public_key);
        hex::encode(hasher.finalize())
    }
}

/// Self-signed certificate of one role as stored in the fixture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    pub role: Role,
    pub path: PathBuf,
    pub encoding: CertEncoding,
    pub pem: String,
    pub subject: Subject,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    public_key: Vec<u8>,
}

impl Certificate {
    fn load(role: Role, path: &Path) -> Result<Self, ProvisioningError> {
        let pem = fs::read_to_string(path).map_err(|err| FixtureError::io(path, err))?;
        let invalid = |reason: String| ProvisioningError::InvalidCertificate {
            path: path.to_path_buf(),
            reason,
        };

        let (_, block) = parse_x509_pem(pem.as_bytes()).map_err(|err| invalid(err.to_string()))?;
        let cert = block.parse_x509().map_err(|err| invalid(err.to_string()))?;

        let subject_name = cert.subject();
        let first = |values: Vec<&str>| values.first().map(|v| (*v).to_owned()).unwrap_or_default();
        let subject = Subject {
            country: first(
                subject_name
                    .iter_country()
                    .filter_map(|attr| attr.as_str().ok())
                    .collect(),
            ),
            organization: first(
                subject_name
                    .iter_organization()
                    .filter_map(|attr| attr.as_str().ok())
                    .collect(),
            ),
            common_name: first(
                subject_name
                    .iter_common_name()
                    .filter_map(|attr| attr.as_str().ok())
                    .collect(),
            ),
        };

        let validity = cert.validity();
        let not_before = DateTime::from_timestamp(validity.not_before.timestamp(), 0)
            .ok_or_else(|| invalid("notBefore out of range".to_owned()))?;
        let not_after = DateTime::from_timestamp(validity.not_after.timestamp(), 0)
            .ok_or_else(|| invalid("notAfter out of range".to_owned()))?;
        let public_key = cert.public_key().subject_public_key.data.to_vec();

        Ok(Self {
            role,
            path: path.to_path_buf(),
            encoding: CertEncoding::Pem,
            pem,
            subject,
            not_before,
            not_after,
            public_key,
        })
    }

    /// Whether this certificate carries the public half of `key`.
    pub fn matches_key(&self, key: &KeyMaterial) -> bool {
        self.public_key == key.public_key
    }

    /// Validity period in whole days.
    pub fn validity_days(&self) -> i64 {
        (self.not_after - self.not_before).num_days()
    }
}

/// Key and certificate produced for one role by [`Provisioner::provision_all`].
#[derive(Debug, Clone)]
pub struct ProvisionedRole {
    pub role: Role,
    pub key: Created<KeyMaterial>,
    pub certificate: Created<Certificate>,
}

/// Creates trust material in a fixture, never replacing what already exists.
#[derive(Debug)]
pub struct Provisioner {
    fixture: Fixture,
    engine: Box<dyn CryptoEngine>,
    country: String,
    organization: String,
    validity_days: u32,
}

impl Provisioner {
    pub fn new(fixture: Fixture, engine: Box<dyn CryptoEngine>) -> Self {
        Self {
            fixture,
            engine,
            country: "US".to_owned(),
            organization: "Example".to_owned(),
            validity_days: DEFAULT_VALIDITY_DAYS,
        }
    }

    /// Build a provisioner with the engine and subject template from configuration.
    pub fn from_config(fixture: Fixture, config: &PkiConfig) -> Self {
        Self::new(fixture, engine_from_config(config))
            .with_subject(config.country.clone(), config.organization.clone())
            .with_validity_days(config.validity_days)
    }

    pub fn with_subject(mut self, country: impl Into<String>, organization: impl Into<String>) -> Self {
        self.country = country.into();
        self.organization = organization.into();
        self
    }

    pub fn with_validity_days(mut self, days: u32) -> Self {
        self.validity_days = days;
        self
    }

    pub fn fixture(&self) -> &Fixture {
        &self.fixture
    }

    /// Generate the role's key pair unless a key file already exists.
    pub fn ensure_key_pair(&self, role: Role) -> Result<Created<KeyMaterial>, ProvisioningError> {
        let path = self.fixture.key_path(role);
        if path.is_file() {
            let key = KeyMaterial::load(role, &path)?;
            debug!(%role, path = %path.display(), "key already present");
            return Ok(Created::Existing(key));
        }

        let staging = staging_path(&path);
        if let Err(err) = self.engine.generate_key(&staging) {
            discard(&staging);
            return Err(err);
        }
        persist(&staging, &path)?;

        let key = KeyMaterial::load(role, &path)?;
        info!(
            %role,
            engine = self.engine.name(),
            path = %path.display(),
            fingerprint = %key.fingerprint(),
            "generated key pair"
        );
        Ok(Created::New(key))
    }

    /// Self-sign the role's certificate unless a certificate file already exists.
    ///
    /// The role key is created first when missing. An existing certificate that
    /// does not belong to the current key is rejected instead of being replaced.
    pub fn ensure_certificate(
        &self,
        role: Role,
        subject_cn: &str,
        validity_days: u32,
    ) -> Result<Created<Certificate>, ProvisioningError> {
        let key = self.ensure_key_pair(role)?.into_inner();
        let path = self.fixture.cert_path(role);

        if path.is_file() {
            let cert = Certificate::load(role, &path)?;
            if !cert.matches_key(&key) {
                return Err(ProvisioningError::KeyMismatch { role, path });
            }
            debug!(%role, path = %path.display(), "certificate already present");
            return Ok(Created::Existing(cert));
        }

        let subject = Subject {
            country: self.country.clone(),
            organization: self.organization.clone(),
            common_name: subject_cn.to_owned(),
        };
        let staging = staging_path(&path);
        if let Err(err) = self
            .engine
            .self_sign(&key.path, &subject, validity_days, &staging)
        {
            discard(&staging);
            return Err(err);
        }
        persist(&staging, &path)?;

        let cert = Certificate::load(role, &path)?;
        info!(
            %role,
            engine = self.engine.name(),
            subject = %cert.subject,
            not_after = %cert.not_after,
            "issued self-signed certificate"
        );
        Ok(Created::New(cert))
    }

    /// Provision every role in order, stopping at the first failure.
    pub fn provision_all(&self) -> Result<Vec<ProvisionedRole>, ProvisioningError> {
        Role::ALL
            .into_iter()
            .map(|role| {
                let key = self.ensure_key_pair(role)?;
                let certificate = self.ensure_certificate(
                    role,
                    role.default_common_name(),
                    self.validity_days,
                )?;
                Ok(ProvisionedRole {
                    role,
                    key,
                    certificate,
                })
            })
            .collect()
    }
}
