//! ---
//! fdo_section: "06-security-pki"
//! fdo_subsection: "module"
//! fdo_type: "source"
//! fdo_scope: "code"
//! fdo_description: "Trust roles provisioned into every fixture."
//! fdo_version: "v0.1.0"
//! fdo_owner: "tbd"
//! ---
use std::fmt;
use std::str::FromStr;

/// The fixed set of identities an onboarding environment needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Role {
    /// Signs ownership vouchers at manufacturing time.
    Manufacturer,
    /// Issues device attestation certificates.
    DeviceCa,
    /// Receives ownership of onboarded devices.
    Owner,
}

impl Role {
    /// Provisioning order.
    pub const ALL: [Role; 3] = [Role::Manufacturer, Role::DeviceCa, Role::Owner];

    /// File stem under `certs/`.
    pub fn file_stem(&self) -> &'static str {
        match self {
            Role::Manufacturer => "manufacturer",
            Role::DeviceCa => "device_ca",
            Role::Owner => "owner",
        }
    }

    /// Subject common name used when the caller does not supply one.
    pub fn default_common_name(&self) -> &'static str {
        match self {
            Role::Manufacturer => "Manufacturer",
            Role::DeviceCa => "Device CA",
            Role::Owner => "Owner",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_stem())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "manufacturer" => Ok(Role::Manufacturer),
            "device_ca" => Ok(Role::DeviceCa),
            "owner" => Ok(Role::Owner),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}
