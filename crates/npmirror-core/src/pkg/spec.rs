//! Dependency specs and their classification.
//!
//! A dependency spec is a `(name, range expression, kind)` triple as it appears
//! in a manifest or in a version's dependency maps. Only registry forms take
//! part in resolution; git, URL, path and workspace forms are recognized here
//! and excluded from the graph.

use super::error::MirrorError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Dependency category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyKind {
    Prod,
    Dev,
    Peer,
    Optional,
}

impl DependencyKind {
    /// All kinds, in manifest field order.
    pub const ALL: [Self; 4] = [Self::Prod, Self::Dev, Self::Peer, Self::Optional];

    /// The manifest / packument field holding this kind of dependency.
    #[must_use]
    pub fn field_name(self) -> &'static str {
        match self {
            Self::Prod => "dependencies",
            Self::Dev => "devDependencies",
            Self::Peer => "peerDependencies",
            Self::Optional => "optionalDependencies",
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Prod => "prod",
            Self::Dev => "dev",
            Self::Peer => "peer",
            Self::Optional => "optional",
        }
    }
}

impl fmt::Display for DependencyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A dependency as declared: package name, range expression and category.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DependencySpec {
    pub name: String,
    pub range_expr: String,
    pub kind: DependencyKind,
}

impl DependencySpec {
    #[must_use]
    pub fn new(name: impl Into<String>, range_expr: impl Into<String>, kind: DependencyKind) -> Self {
        Self {
            name: name.into(),
            range_expr: range_expr.into(),
            kind,
        }
    }

    /// Classify the range expression of this spec.
    ///
    /// # Errors
    /// Returns an error for a malformed `npm:` alias.
    pub fn classify(&self) -> Result<SpecForm, MirrorError> {
        classify(&self.name, &self.range_expr)
    }
}

impl fmt::Display for DependencySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{} ({})", self.name, self.range_expr, self.kind)
    }
}

/// Non-registry dependency sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalSource {
    Git,
    Url,
    Path,
    Workspace,
}

/// What a range expression asks the registry for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecForm {
    /// Resolve `name` against `selector` (a semver range or a dist-tag).
    Registry { name: String, selector: String },
    /// Not resolvable from the registry; excluded from the graph.
    External(ExternalSource),
}

const GIT_PREFIXES: &[&str] = &[
    "git+", "git:", "git@", "github:", "gist:", "gitlab:", "bitbucket:",
];
const PATH_PREFIXES: &[&str] = &["file:", "link:", "portal:", ".", "/", "~/"];

/// Classify a `(name, range expression)` pair.
///
/// # Errors
/// Returns an error for a malformed `npm:` alias.
pub fn classify(name: &str, range_expr: &str) -> Result<SpecForm, MirrorError> {
    let expr = range_expr.trim();

    if let Some(aliased) = expr.strip_prefix("npm:") {
        let (target, selector) = split_name_and_selector(aliased)?;
        return Ok(SpecForm::Registry {
            name: target,
            selector: selector.unwrap_or_else(|| "*".to_string()),
        });
    }

    if GIT_PREFIXES.iter().any(|p| expr.starts_with(p)) {
        return Ok(SpecForm::External(ExternalSource::Git));
    }
    if expr.starts_with("http:") || expr.starts_with("https:") {
        return Ok(SpecForm::External(ExternalSource::Url));
    }
    if expr.starts_with("workspace:") {
        return Ok(SpecForm::External(ExternalSource::Workspace));
    }
    if PATH_PREFIXES.iter().any(|p| expr.starts_with(p)) {
        return Ok(SpecForm::External(ExternalSource::Path));
    }
    // Semver ranges never contain '/', so `user/repo` is GitHub shorthand.
    if expr.contains('/') {
        return Ok(SpecForm::External(ExternalSource::Git));
    }

    let selector = if expr.is_empty() { "*" } else { expr };

    Ok(SpecForm::Registry {
        name: name.to_string(),
        selector: selector.to_string(),
    })
}

/// Split `name[@selector]` (scoped or unscoped) into its parts.
fn split_name_and_selector(input: &str) -> Result<(String, Option<String>), MirrorError> {
    let input = input.trim();

    if input.is_empty() {
        return Err(MirrorError::spec_invalid("Empty npm: alias"));
    }

    // Scoped names carry their own leading '@'; the version delimiter comes after.
    let search_from = usize::from(input.starts_with('@'));
    if search_from == 1 && !input.contains('/') {
        return Err(MirrorError::spec_invalid(format!(
            "Invalid scoped package: missing '/' in '{input}'"
        )));
    }

    match input[search_from..].find('@') {
        Some(rel) => {
            let at_pos = rel + search_from;
            let name = &input[..at_pos];
            let selector = &input[at_pos + 1..];

            if name.is_empty() || name.ends_with('/') {
                return Err(MirrorError::spec_invalid(format!(
                    "Invalid package spec: empty name in '{input}'"
                )));
            }
            if selector.is_empty() {
                return Err(MirrorError::spec_invalid(format!(
                    "Invalid package spec: empty version range in '{input}'"
                )));
            }

            Ok((name.to_string(), Some(selector.to_string())))
        }
        None => Ok((input.to_string(), None)),
    }
}
