//! Package metadata (packuments).
//!
//! A [`PackageMetadata`] is the parsed view of one upstream packument: its
//! dist-tags and version records. The raw document is kept alongside so the
//! mirror can write it back byte-for-byte.

use super::error::MirrorError;
use super::spec::DependencyKind;
use bytes::Bytes;
use semver::Version;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

/// Parsed packument for a single package.
#[derive(Debug, Clone)]
pub struct PackageMetadata {
    pub name: String,
    pub dist_tags: BTreeMap<String, Version>,
    pub versions: BTreeMap<Version, VersionRecord>,
    raw: Bytes,
}

/// One published version of a package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRecord {
    pub version: Version,
    pub dependencies: BTreeMap<DependencyKind, BTreeMap<String, String>>,
    pub tarball_url: String,
    /// Subresource Integrity string (`sha512-...`), if published.
    pub integrity: Option<String>,
    /// Legacy sha1 hex digest, if published.
    pub shasum: Option<String>,
    pub deprecated: bool,
}

#[derive(Deserialize)]
struct RawPackument {
    name: String,
    #[serde(rename = "dist-tags", default)]
    dist_tags: BTreeMap<String, Value>,
    #[serde(default)]
    versions: BTreeMap<String, Value>,
}

impl PackageMetadata {
    /// Parse a packument document.
    ///
    /// Versions whose key is not valid semver, or that carry no tarball URL,
    /// are dropped. Dist-tags pointing at dropped versions are dropped too.
    ///
    /// # Errors
    /// Returns an error if the document is not a JSON object with a `name`.
    pub fn from_slice(raw: impl Into<Bytes>) -> Result<Self, MirrorError> {
        let raw = raw.into();
        let doc: RawPackument = serde_json::from_slice(&raw)?;

        let mut versions = BTreeMap::new();
        for (key, value) in &doc.versions {
            let Ok(version) = Version::parse(key) else {
                debug!(package = %doc.name, version = %key, "Skipping non-semver version");
                continue;
            };

            match VersionRecord::from_value(version.clone(), value) {
                Some(record) => {
                    versions.insert(version, record);
                }
                None => {
                    debug!(package = %doc.name, version = %key, "Skipping version without tarball");
                }
            }
        }

        let dist_tags = doc
            .dist_tags
            .iter()
            .filter_map(|(tag, v)| {
                let version = Version::parse(v.as_str()?).ok()?;
                versions.contains_key(&version).then(|| (tag.clone(), version))
            })
            .collect();

        Ok(Self {
            name: doc.name,
            dist_tags,
            versions,
            raw,
        })
    }

    /// Serialize a JSON value and parse it as a packument.
    ///
    /// # Errors
    /// Returns an error if the value is not a valid packument.
    pub fn from_json(doc: &Value) -> Result<Self, MirrorError> {
        Self::from_slice(serde_json::to_vec(doc)?)
    }

    /// The document as fetched from upstream.
    #[must_use]
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// The version a dist-tag points at.
    #[must_use]
    pub fn tagged(&self, tag: &str) -> Option<&Version> {
        self.dist_tags.get(tag)
    }

    /// Look up a version record.
    #[must_use]
    pub fn get(&self, version: &Version) -> Option<&VersionRecord> {
        self.versions.get(version)
    }

    /// All known versions, in ascending order.
    pub fn version_list(&self) -> impl Iterator<Item = &Version> {
        self.versions.keys()
    }
}

impl VersionRecord {
    fn from_value(version: Version, value: &Value) -> Option<Self> {
        let dist = value.get("dist")?;
        let tarball_url = dist.get("tarball")?.as_str()?.to_string();

        let mut dependencies = BTreeMap::new();
        for kind in DependencyKind::ALL {
            let Some(section) = value.get(kind.field_name()).and_then(Value::as_object) else {
                continue;
            };

            let deps: BTreeMap<String, String> = section
                .iter()
                .filter_map(|(name, range)| range.as_str().map(|r| (name.clone(), r.to_string())))
                .collect();

            if !deps.is_empty() {
                dependencies.insert(kind, deps);
            }
        }

        let deprecated = match value.get("deprecated") {
            Some(Value::String(msg)) => !msg.is_empty(),
            Some(Value::Bool(flag)) => *flag,
            _ => false,
        };

        Some(Self {
            version,
            dependencies,
            tarball_url,
            integrity: dist.get("integrity").and_then(Value::as_str).map(String::from),
            shasum: dist.get("shasum").and_then(Value::as_str).map(String::from),
            deprecated,
        })
    }

    /// Dependencies of one kind as `(name, range)` pairs.
    pub fn dependencies_of(&self, kind: DependencyKind) -> impl Iterator<Item = (&str, &str)> {
        self.dependencies
            .get(&kind)
            .into_iter()
            .flat_map(|deps| deps.iter().map(|(n, r)| (n.as_str(), r.as_str())))
    }
}

/// Last path segment of a tarball URL, without query or fragment.
#[must_use]
pub fn tarball_file_name(url: &str) -> Option<&str> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit('/').next().filter(|name| !name.is_empty() && *name != "..")
}
