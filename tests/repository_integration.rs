//! ---
//! fdo_section: "06-testing"
//! fdo_subsection: "integration-tests"
//! fdo_type: "source"
//! fdo_scope: "code"
//! fdo_description: "Checks over the shipped configuration and source headers."
//! fdo_version: "v0.1.0"
//! fdo_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};

use fdo_env_common::config::{EnvConfig, RuntimeKind};
use fdo_env_common::template::placeholders;

fn workspace() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("..")
}

fn read(path: &str) -> String {
    let full = workspace().join(path);
    fs::read_to_string(&full)
        .unwrap_or_else(|err| panic!("failed to read {}: {}", full.display(), err))
}

fn collect(dir: &Path, out: &mut Vec<PathBuf>) {
    for entry in fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
            if path.file_name().is_some_and(|name| name == "target") {
                continue;
            }
            collect(&path, out);
        } else if path.extension().is_some_and(|ext| ext == "rs")
            || path.file_name().is_some_and(|name| name == "Cargo.toml")
        {
            out.push(path);
        }
    }
}

#[test]
fn sample_config_parses_and_validates() {
    let config: EnvConfig = read("configs/fdo-env.toml").parse().unwrap();
    let names: Vec<_> = config.services.keys().map(String::as_str).collect();
    assert_eq!(names, ["rendezvous", "manufacturer", "owner"]);
    assert!(config
        .services
        .values()
        .all(|service| service.runtime == RuntimeKind::Local));
    assert!(config.repos.is_empty(), "sample repos must stay commented out");
    config.device.validate_for_onboarding().unwrap();
}

#[test]
fn sample_config_only_uses_known_placeholders() {
    let config: EnvConfig = read("configs/fdo-env.toml").parse().unwrap();
    let fixture = ["root", "certs", "db", "files"];
    for (name, service) in &config.services {
        for arg in &service.args {
            for placeholder in placeholders(arg) {
                assert!(
                    fixture.contains(&placeholder),
                    "service {name} uses unknown placeholder {{{placeholder}}}"
                );
            }
        }
    }
    let device = ["root", "certs", "db", "files", "guid_file", "guid"];
    for arg in config.device.di.iter().chain(&config.device.to) {
        for placeholder in placeholders(arg) {
            assert!(device.contains(&placeholder), "unknown {placeholder}");
        }
    }
}

#[test]
fn sources_and_manifests_carry_frontmatter() {
    let mut files = Vec::new();
    for dir in ["crates", "bin", "tests"] {
        collect(&workspace().join(dir), &mut files);
    }
    assert!(!files.is_empty());
    for file in files {
        let content = fs::read_to_string(&file).unwrap();
        let marker = if file.extension().is_some_and(|ext| ext == "rs") {
            "//! ---"
        } else {
            "# ---"
        };
        assert!(
            content.starts_with(marker),
            "{} must include frontmatter header",
            file.display()
        );
        assert!(
            content.contains("fdo_version: \"v0.1.0\""),
            "{} must declare fdo_version",
            file.display()
        );
    }
}
