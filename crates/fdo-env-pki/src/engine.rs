//! ---
//! fdo_section: "06-security-pki"
//! fdo_subsection: "module"
//! fdo_type: "source"
//! fdo_scope: "code"
//! fdo_description: "Crypto engines producing P-256 keys and self-signed certificates."
//! fdo_version: "v0.1.0"
//! fdo_owner: "tbd"
//! ---
//! Engines write their output to the path they are given; the provisioner owns
//! staging and the final rename. Keys are PKCS#8 DER, certificates PEM.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use fdo_env_common::config::{EngineKind, PkiConfig};
use rcgen::{BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair};
use time::{Duration, OffsetDateTime};
use tracing::debug;

use crate::error::{FixtureError, ProvisioningError};

/// Subject fields stamped into every certificate, `C=.., O=.., CN=..`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    pub country: String,
    pub organization: String,
    pub common_name: String,
}

impl Subject {
    /// OpenSSL `-subj` rendering.
    pub fn to_openssl(&self) -> String {
        format!(
            "/C={}/O={}/CN={}",
            escape_rdn(&self.country),
            escape_rdn(&self.organization),
            escape_rdn(&self.common_name)
        )
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "C={}, O={}, CN={}",
            self.country, self.organization, self.common_name
        )
    }
}

fn escape_rdn(value: &str) -> String {
    value.replace('\\', "\\\\").replace('/', "\\/")
}

/// Backend that materialises keys and certificates.
pub trait CryptoEngine: fmt::Debug + Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Write a fresh P-256 private key in PKCS#8 DER to `out`.
    fn generate_key(&self, out: &Path) -> Result<(), ProvisioningError>;

    /// Write a PEM certificate for the DER key at `key`, self-signed, to `out`.
    fn self_sign(
        &self,
        key: &Path,
        subject: &Subject,
        validity_days: u32,
        out: &Path,
    ) -> Result<(), ProvisioningError>;
}

/// Build the engine selected by configuration.
pub fn engine_from_config(config: &PkiConfig) -> Box<dyn CryptoEngine> {
    match config.engine {
        EngineKind::Rcgen => Box::new(RcgenEngine),
        EngineKind::Openssl => Box::new(OpensslEngine::new(config.openssl.clone())),
    }
}

/// Drives the external `openssl` command line tool.
#[derive(Debug, Clone)]
pub struct OpensslEngine {
    program: PathBuf,
}

impl OpensslEngine {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn run(&self, args: &[&str]) -> Result<(), ProvisioningError> {
        let program = self.program.display().to_string();
        debug!(%program, ?args, "invoking crypto engine");
        let output = Command::new(&self.program)
            .args(args)
            .output()
            .map_err(|source| ProvisioningError::Spawn {
                program: program.clone(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();
            return Err(ProvisioningError::EngineFailed {
                program,
                status: output.status.code(),
                stderr,
            });
        }
        Ok(())
    }
}

impl CryptoEngine for OpensslEngine {
    fn name(&self) -> &'static str {
        "openssl"
    }

    fn generate_key(&self, out: &Path) -> Result<(), ProvisioningError> {
        let out = path_arg(out)?;
        self.run(&[
            "genpkey",
            "-algorithm",
            "EC",
            "-pkeyopt",
            "ec_paramgen_curve:P-256",
            "-outform",
            "DER",
            "-out",
            out,
        ])
    }

    fn self_sign(
        &self,
        key: &Path,
        subject: &Subject,
        validity_days: u32,
        out: &Path,
    ) -> Result<(), ProvisioningError> {
        let key = path_arg(key)?;
        let out = path_arg(out)?;
        let subj = subject.to_openssl();
        let days = validity_days.to_string();
        self.run(&[
            "req",
            "-x509",
            "-new",
            "-sha256",
            "-key",
            key,
            "-keyform",
            "DER",
            "-subj",
            subj.as_str(),
            "-days",
            days.as_str(),
            "-outform",
            "PEM",
            "-out",
            out,
        ])
    }
}

fn path_arg(path: &Path) -> Result<&str, ProvisioningError> {
    path.to_str().ok_or_else(|| ProvisioningError::InvalidKey {
        path: path.to_path_buf(),
        reason: "path is not valid UTF-8".to_owned(),
    })
}

/// In-process generation with `rcgen`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RcgenEngine;

impl CryptoEngine for RcgenEngine {
    fn name(&self) -> &'static str {
        "rcgen"
    }

    fn generate_key(&self, out: &Path) -> Result<(), ProvisioningError> {
        let key = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256)?;
        fs::write(out, key.serialize_der()).map_err(|err| FixtureError::io(out, err))?;
        Ok(())
    }

    fn self_sign(
        &self,
        key: &Path,
        subject: &Subject,
        validity_days: u32,
        out: &Path,
    ) -> Result<(), ProvisioningError> {
        let der = fs::read(key).map_err(|err| FixtureError::io(key, err))?;
        let key_pair = KeyPair::try_from(der.as_slice())?;

        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CountryName, subject.country.clone());
        dn.push(DnType::OrganizationName, subject.organization.clone());
        dn.push(DnType::CommonName, subject.common_name.clone());
        params.distinguished_name = dn;
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);

        let not_before = OffsetDateTime::now_utc();
        params.not_before = not_before;
        params.not_after = not_before + Duration::days(validity_days.into());

        let cert = params.self_signed(&key_pair)?;
        fs::write(out, cert.pem()).map_err(|err| FixtureError::io(out, err))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subject() -> Subject {
        Subject {
            country: "US".into(),
            organization: "Example".into(),
            common_name: "Device CA".into(),
        }
    }

    #[test]
    fn openssl_subject_rendering() {
        assert_eq!(subject().to_openssl(), "/C=US/O=Example/CN=Device CA");
        let odd = Subject {
            common_name: "a/b".into(),
            ..subject()
        };
        assert_eq!(odd.to_openssl(), "/C=US/O=Example/CN=a\\/b");
    }

    #[test]
    fn rcgen_writes_pkcs8_and_pem() {
        let tmp = tempfile::tempdir().unwrap();
        let key = tmp.path().join("k.der");
        let crt = tmp.path().join("c.pem");
        RcgenEngine.generate_key(&key).unwrap();
        RcgenEngine.self_sign(&key, &subject(), 30, &crt).unwrap();
        let der = fs::read(&key).unwrap();
        assert!(KeyPair::try_from(der.as_slice()).is_ok());
        let pem = fs::read_to_string(&crt).unwrap();
        assert!(pem.starts_with("-----BEGIN CERTIFICATE-----"));
    }

    #[test]
    fn missing_openssl_binary_is_a_spawn_error() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = OpensslEngine::new(tmp.path().join("no-such-openssl"));
        let err = engine.generate_key(&tmp.path().join("k.der")).unwrap_err();
        assert!(matches!(err, ProvisioningError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn non_zero_exit_surfaces_status() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = OpensslEngine::new("false");
        let err = engine.generate_key(&tmp.path().join("k.der")).unwrap_err();
        match err {
            ProvisioningError::EngineFailed { status, .. } => assert_eq!(status, Some(1)),
            other => panic!("unexpected error: {other}"),
        }
    }
}
