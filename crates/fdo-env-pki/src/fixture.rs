//! ---
//! fdo_section: "06-security-pki"
//! fdo_subsection: "module"
//! fdo_type: "source"
//! fdo_scope: "code"
//! fdo_description: "On-disk fixture layout for keys, certificates, and databases."
//! fdo_version: "v0.1.0"
//! fdo_owner: "tbd"
//! ---
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use fdo_env_common::template::Params;
use tracing::{debug, info, warn};

use crate::error::FixtureError;
use crate::role::Role;

const CERTS_DIR: &str = "certs";
const DB_DIR: &str = "db";
const FILES_DIR: &str = "files";
const WRITE_PROBE: &str = ".write-probe";

/// Canonical layout of an environment root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fixture {
    root: PathBuf,
    certs: PathBuf,
    db: PathBuf,
    files: PathBuf,
}

/// What [`clean`] found at the root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanOutcome {
    Removed,
    Absent,
}

impl Fixture {
    fn layout<P: AsRef<Path>>(root: P) -> Self {
        let root = root.as_ref().to_path_buf();
        Self {
            certs: root.join(CERTS_DIR),
            db: root.join(DB_DIR),
            files: root.join(FILES_DIR),
            root,
        }
    }

    /// Create the root and its subdirectories if needed and verify they are writable.
    pub fn ensure<P: AsRef<Path>>(root: P) -> Result<Self, FixtureError> {
        let fixture = Self::layout(root);
        for dir in fixture.dirs() {
            if dir.exists() && !dir.is_dir() {
                return Err(FixtureError::NotADirectory(dir.to_path_buf()));
            }
            fs::create_dir_all(dir).map_err(|err| FixtureError::io(dir, err))?;
            check_writable(dir)?;
        }
        debug!(root = %fixture.root.display(), "fixture ready");
        Ok(fixture)
    }

    /// Open an existing fixture without creating anything.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self, FixtureError> {
        let fixture = Self::layout(root);
        for dir in fixture.dirs() {
            if !dir.is_dir() {
                return Err(FixtureError::Missing(dir.to_path_buf()));
            }
        }
        Ok(fixture)
    }

    fn dirs(&self) -> [&Path; 4] {
        [
            self.root.as_path(),
            self.certs.as_path(),
            self.db.as_path(),
            self.files.as_path(),
        ]
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn certs_dir(&self) -> &Path {
        &self.certs
    }

    pub fn db_dir(&self) -> &Path {
        &self.db
    }

    pub fn files_dir(&self) -> &Path {
        &self.files
    }

    /// `certs/<role>.key`
    pub fn key_path(&self, role: Role) -> PathBuf {
        self.certs.join(format!("{}.key", role.file_stem()))
    }

    /// `certs/<role>.crt`
    pub fn cert_path(&self, role: Role) -> PathBuf {
        self.certs.join(format!("{}.crt", role.file_stem()))
    }

    /// Template parameters pointing at the fixture directories.
    pub fn params(&self) -> Params {
        [
            ("root", &self.root),
            ("certs", &self.certs),
            ("db", &self.db),
            ("files", &self.files),
        ]
        .into_iter()
        .map(|(name, path)| (name.to_owned(), path.display().to_string()))
        .collect()
    }
}

fn check_writable(dir: &Path) -> Result<(), FixtureError> {
    let probe = dir.join(WRITE_PROBE);
    fs::write(&probe, b"")
        .and_then(|_| fs::remove_file(&probe))
        .map_err(|source| FixtureError::NotWritable {
            path: dir.to_path_buf(),
            source,
        })
}

/// Create or verify the fixture rooted at `root`.
pub fn ensure_fixture<P: AsRef<Path>>(root: P) -> Result<Fixture, FixtureError> {
    Fixture::ensure(root)
}

/// Remove the fixture tree. A missing root is logged and treated as success.
pub fn clean<P: AsRef<Path>>(root: P) -> Result<CleanOutcome, FixtureError> {
    let root = root.as_ref();
    match fs::remove_dir_all(root) {
        Ok(()) => {
            info!(root = %root.display(), "fixture removed");
            Ok(CleanOutcome::Removed)
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            warn!(root = %root.display(), "fixture root absent, nothing to clean");
            Ok(CleanOutcome::Absent)
        }
        Err(err) => Err(FixtureError::io(root, err)),
    }
}

/// Move a fully written temporary file into place.
pub(crate) fn persist(tmp: &Path, dest: &Path) -> Result<(), FixtureError> {
    fs::rename(tmp, dest).map_err(|err| FixtureError::io(dest, err))
}

/// Sibling path used while a file is being generated.
pub(crate) fn staging_path(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".partial");
    dest.with_file_name(name)
}

pub(crate) fn discard(tmp: &Path) {
    if let Err(err) = fs::remove_file(tmp) {
        if err.kind() != io::ErrorKind::NotFound {
            warn!(path = %tmp.display(), ?err, "unable to remove staging file");
        }
    }
}
