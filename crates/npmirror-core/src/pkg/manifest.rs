//! Seed manifests.
//!
//! Every `*.json` file under the manifests directory is read as a
//! `package.json`; its four dependency sections become seed specs. Problems
//! with individual files or entries are collected as [`ManifestIssue`]s and
//! never stop the load.

use super::spec::{DependencyKind, DependencySpec};
use crate::error::Error;
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Something wrong with one manifest file or entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestIssue {
    pub path: PathBuf,
    pub message: String,
}

impl ManifestIssue {
    fn new(path: &Path, message: impl Into<String>) -> Self {
        Self {
            path: path.to_path_buf(),
            message: message.into(),
        }
    }
}

/// Seeds gathered from a manifests directory.
#[derive(Debug, Clone, Default)]
pub struct Manifests {
    pub specs: Vec<DependencySpec>,
    /// Manifest files read successfully.
    pub files: usize,
    pub issues: Vec<ManifestIssue>,
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Extract the dependency sections of one parsed manifest.
pub fn extract_specs(path: &Path, root: &Map<String, Value>, out: &mut Manifests) {
    for kind in DependencyKind::ALL {
        let section = kind.field_name();
        let Some(value) = root.get(section) else {
            continue;
        };

        let Some(entries) = value.as_object() else {
            out.issues.push(ManifestIssue::new(
                path,
                format!("'{section}' must be an object, got {}", json_type_name(value)),
            ));
            continue;
        };

        for (name, range) in entries {
            match range.as_str() {
                Some(range) => out.specs.push(DependencySpec::new(name, range, kind)),
                None => out.issues.push(ManifestIssue::new(
                    path,
                    format!(
                        "'{section}.{name}' must be a string, got {}",
                        json_type_name(range)
                    ),
                )),
            }
        }
    }
}

fn read_manifest(path: &Path, out: &mut Manifests) {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            out.issues.push(ManifestIssue::new(path, format!("Failed to read: {e}")));
            return;
        }
    };

    let doc: Value = match serde_json::from_str(&content) {
        Ok(doc) => doc,
        Err(e) => {
            out.issues.push(ManifestIssue::new(path, format!("Invalid JSON: {e}")));
            return;
        }
    };

    let Some(root) = doc.as_object() else {
        out.issues.push(ManifestIssue::new(path, "Manifest must be a JSON object"));
        return;
    };

    let before = out.specs.len();
    extract_specs(path, root, out);
    out.files += 1;
    debug!(path = %path.display(), specs = out.specs.len() - before, "Read manifest");
}

/// Load every manifest under `dir`, recursively. `node_modules` directories
/// are not descended into.
///
/// # Errors
/// Returns an error if `dir` does not exist or cannot be listed.
pub fn load_manifests(dir: &Path) -> Result<Manifests, Error> {
    if !dir.exists() {
        return Err(Error::ManifestsNotFound {
            path: dir.to_path_buf(),
        });
    }

    let mut out = Manifests::default();
    let walker = WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || e.file_name() != "node_modules");

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(source) if source.depth() == 0 => {
                return Err(Error::ManifestsRead {
                    path: dir.to_path_buf(),
                    source,
                })
            }
            Err(e) => {
                let path = e.path().unwrap_or(dir).to_path_buf();
                warn!(path = %path.display(), error = %e, "Skipping unreadable entry");
                out.issues.push(ManifestIssue::new(&path, e.to_string()));
                continue;
            }
        };

        let is_json = entry.path().extension().is_some_and(|ext| ext == "json");
        if entry.file_type().is_file() && is_json {
            read_manifest(entry.path(), &mut out);
        }
    }

    Ok(out)
}
