//! ---
//! tsim_section: "12-testing"
//! tsim_subsection: "integration-tests"
//! tsim_type: "source"
//! tsim_scope: "code"
//! tsim_description: "Repository-level checks on manifests, headers and shipped config."
//! tsim_version: "v0.0.0-prealpha"
//! tsim_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};

fn root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("..")
}

fn read(path: &str) -> String {
    let full = root().join(path);
    fs::read_to_string(&full)
        .unwrap_or_else(|err| panic!("failed to read {}: {}", full.display(), err))
}

fn rust_sources(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            if path.file_name().is_some_and(|name| name == "target") {
                continue;
            }
            rust_sources(&path, out);
        } else if path.extension().is_some_and(|ext| ext == "rs") {
            out.push(path);
        }
    }
}

#[test]
fn workspace_lists_every_member() {
    let manifest = read("Cargo.toml");
    for member in [
        "crates/telesim-common",
        "crates/telesim-catalog",
        "crates/telesim-sim",
        "crates/telesim-sink",
        "crates/telesim-metrics",
        "crates/telesim-core",
        "crates/telesim-api",
        "bin/telesimd",
        "bin/telesimctl",
    ] {
        assert!(
            manifest.contains(&format!("\"{member}\"")),
            "workspace manifest is missing {member}"
        );
        assert!(
            root().join(member).join("Cargo.toml").exists(),
            "{member} has no Cargo.toml"
        );
    }
}

#[test]
fn sources_carry_frontmatter() {
    let mut files = Vec::new();
    for dir in ["crates", "bin", "tests"] {
        rust_sources(&root().join(dir), &mut files);
    }
    assert!(!files.is_empty());
    for file in files {
        let content = fs::read_to_string(&file).unwrap();
        assert!(
            content.starts_with("//! ---\n//! tsim_section:"),
            "{} must start with the tsim frontmatter header",
            file.display()
        );
    }
}

#[test]
fn shipped_config_uses_loopback_control_api() {
    let config = read("configs/telesim.toml");
    assert!(config.starts_with("# ---"), "config must include frontmatter header");
    for section in ["[catalog]", "[engine]", "[sink]", "[logging]", "[metrics]", "[api]"] {
        assert!(config.contains(section), "config is missing {section}");
    }
    assert!(
        config.contains("listen = \"127.0.0.1:8088\""),
        "control api should bind to loopback by default"
    );
}

#[test]
fn source_descriptions_are_unique() {
    let mut files = Vec::new();
    for dir in ["crates", "bin", "tests"] {
        rust_sources(&root().join(dir), &mut files);
    }
    let mut seen = std::collections::HashMap::new();
    for file in files {
        let content = fs::read_to_string(&file).unwrap();
        let description = content
            .lines()
            .find(|line| line.starts_with("//! tsim_description:"))
            .unwrap_or_else(|| panic!("{} has no description", file.display()))
            .to_string();
        if let Some(previous) = seen.insert(description.clone(), file.clone()) {
            panic!(
                "{} and {} share the header {description}",
                previous.display(),
                file.display()
            );
        }
    }
}
