//! ---
//! fdo_section: "05-integration"
//! fdo_subsection: "module"
//! fdo_type: "source"
//! fdo_scope: "code"
//! fdo_description: "Revision-pinned fetcher for external source trees."
//! fdo_version: "v0.1.0"
//! fdo_owner: "tbd"
//! ---
//! Clones the external FDO source trees and leaves each one detached at an
//! exact commit. Retries are the caller's business.

pub mod error;
pub mod fetcher;

pub use error::FetchError;
pub use fetcher::{FetchAction, Fetcher, PinnedRepo};
