//! ---
//! fdo_section: "06-security-pki"
//! fdo_subsection: "module"
//! fdo_type: "source"
//! fdo_scope: "code"
//! fdo_description: "Fixture store and certificate provisioner."
//! fdo_version: "v0.1.0"
//! fdo_owner: "tbd"
//! ---
//! Fixture layout plus create-if-absent provisioning of the manufacturer,
//! device CA, and owner key pairs and self-signed certificates.

pub mod engine;
pub mod error;
pub mod fixture;
pub mod provisioner;
pub mod role;

pub use engine::{engine_from_config, CryptoEngine, OpensslEngine, RcgenEngine, Subject};
pub use error::{FixtureError, ProvisioningError};
pub use fixture::{clean, ensure_fixture, CleanOutcome, Fixture};
pub use provisioner::{
    CertEncoding, Certificate, Created, KeyEncoding, KeyMaterial, ProvisionedRole, Provisioner,
    DEFAULT_VALIDITY_DAYS,
};
pub use role::Role;
