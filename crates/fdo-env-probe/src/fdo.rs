//! ---
//! fdo_section: "05-integration"
//! fdo_subsection: "module"
//! fdo_type: "source"
//! fdo_scope: "code"
//! fdo_description: "Step builders for the manufacturer, rendezvous and owner APIs."
//! fdo_version: "v0.1.0"
//! fdo_owner: "tbd"
//! ---
//! Builders for the FDO management calls the driver makes. Bodies are the typed
//! config entries serialised as JSON; ports travel as strings.

use fdo_env_common::config::{Endpoint, EndpointsConfig, OwnerRedirectEntry, RvInfoEntry};
use fdo_env_common::template::Params;

use crate::error::StepError;
use crate::retry::RetryPolicy;
use crate::step::{Payload, ProbeStep};

pub const RVINFO_PATH: &str = "/api/v1/rvinfo";
pub const OWNER_REDIRECT_PATH: &str = "/api/v1/owner/redirect";
/// Template parameter carrying the device GUID.
pub const GUID_PARAM: &str = "guid";

/// Base URL of `endpoint` joined with `path`, leaving placeholders unescaped.
pub fn endpoint_url(endpoints: &EndpointsConfig, endpoint: Endpoint, path: &str) -> String {
    let base = endpoints.base(endpoint).as_str().trim_end_matches('/');
    format!("{base}{path}")
}

/// Health URL of a well-known endpoint.
pub fn health_url(endpoints: &EndpointsConfig, endpoint: Endpoint) -> String {
    endpoint_url(endpoints, endpoint, &endpoints.health_path)
}

/// One health GET per target, each with the readiness retry budget.
pub fn health_steps(
    endpoints: &EndpointsConfig,
    targets: &[Endpoint],
    retry: RetryPolicy,
) -> Vec<ProbeStep> {
    targets
        .iter()
        .map(|endpoint| {
            ProbeStep::get(format!("health:{endpoint}"), health_url(endpoints, *endpoint))
                .with_retry(retry)
        })
        .collect()
}

pub fn publish_rvinfo_steps(
    endpoints: &EndpointsConfig,
    entries: &[RvInfoEntry],
) -> Result<Vec<ProbeStep>, serde_json::Error> {
    Ok(vec![ProbeStep::post(
        "publish-rendezvous-config",
        endpoint_url(endpoints, Endpoint::Manufacturer, RVINFO_PATH),
        Payload::Json(serde_json::to_value(entries)?),
    )])
}

pub fn get_rvinfo_steps(endpoints: &EndpointsConfig) -> Vec<ProbeStep> {
    vec![ProbeStep::get(
        "get-rendezvous-config",
        endpoint_url(endpoints, Endpoint::Manufacturer, RVINFO_PATH),
    )]
}

pub fn publish_owner_redirect_steps(
    endpoints: &EndpointsConfig,
    entries: &[OwnerRedirectEntry],
) -> Result<Vec<ProbeStep>, serde_json::Error> {
    Ok(vec![ProbeStep::post(
        "publish-owner-redirect",
        endpoint_url(endpoints, Endpoint::Owner, OWNER_REDIRECT_PATH),
        Payload::Json(serde_json::to_value(entries)?),
    )])
}

pub fn get_owner_redirect_steps(endpoints: &EndpointsConfig) -> Vec<ProbeStep> {
    vec![ProbeStep::get(
        "get-owner-redirect",
        endpoint_url(endpoints, Endpoint::Owner, OWNER_REDIRECT_PATH),
    )]
}

/// Fetch the voucher for `{guid}` from the manufacturer and hand it to the owner.
///
/// Run with [`voucher_params`].
pub fn send_voucher_steps(endpoints: &EndpointsConfig) -> Vec<ProbeStep> {
    vec![
        ProbeStep::get(
            "fetch-ownership-voucher",
            endpoint_url(endpoints, Endpoint::Manufacturer, &endpoints.voucher_path),
        ),
        ProbeStep::post(
            "upload-ownership-voucher",
            endpoint_url(endpoints, Endpoint::Owner, &endpoints.owner_voucher_path),
            Payload::PreviousResponse,
        ),
    ]
}

/// Trimmed `raw` if it is a device GUID: 32 hex digits, bare or in the
/// hyphenated 8-4-4-4-12 form.
pub fn device_guid(raw: &str) -> Result<String, StepError> {
    let guid = raw.trim();
    let valid = match guid.len() {
        32 => guid.bytes().all(|b| b.is_ascii_hexdigit()),
        36 => guid.bytes().enumerate().all(|(i, b)| match i {
            8 | 13 | 18 | 23 => b == b'-',
            _ => b.is_ascii_hexdigit(),
        }),
        _ => false,
    };
    if valid {
        Ok(guid.to_owned())
    } else {
        Err(StepError::InvalidGuid(guid.to_owned()))
    }
}

/// Parameters for [`send_voucher_steps`]. Rejects anything that is not a GUID.
pub fn voucher_params(guid: &str) -> Result<Params, StepError> {
    Ok(Params::from([(GUID_PARAM.to_owned(), device_guid(guid)?)]))
}
