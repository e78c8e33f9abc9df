//! `.npmrc` reading.
//!
//! Only the settings a mirror needs are understood:
//! - `registry=URL` for the default upstream
//! - `@scope:registry=URL` for scoped upstreams
//! - `//host/path/:_authToken=TOKEN`, with `${ENV_VAR}` expansion

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use url::Url;

/// Settings gathered from one or more `.npmrc` files.
#[derive(Debug, Clone, Default)]
pub struct NpmrcConfig {
    /// Default registry (`registry=`).
    pub registry: Option<Url>,
    /// Scope → registry URL.
    pub scoped_registries: HashMap<String, Url>,
    /// `host[/path]` → auth token.
    pub auth_tokens: HashMap<String, String>,
}

/// A scoped registry joined with its auth token.
#[derive(Debug, Clone)]
pub struct ScopedRegistry {
    pub scope: String,
    pub registry_url: Url,
    pub auth_token: Option<String>,
}

enum Directive {
    Registry(Url),
    ScopedRegistry(String, Url),
    AuthToken(String, String),
}

fn registry_url(value: &str) -> Option<Url> {
    let value = value.trim().trim_matches('"');
    if value.ends_with('/') {
        Url::parse(value).ok()
    } else {
        Url::parse(&format!("{value}/")).ok()
    }
}

fn parse_line(line: &str) -> Option<Directive> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
        return None;
    }

    let (key, value) = line.split_once('=')?;
    let (key, value) = (key.trim(), value.trim());

    if key == "registry" {
        return registry_url(value).map(Directive::Registry);
    }

    if let Some(scope) = key.strip_suffix(":registry").filter(|s| s.starts_with('@')) {
        return registry_url(value).map(|url| Directive::ScopedRegistry(scope.to_string(), url));
    }

    let location = key.strip_prefix("//")?.strip_suffix(":_authToken")?;
    let token = expand_env_vars(value.trim_matches('"'));
    if token.is_empty() {
        return None;
    }
    Some(Directive::AuthToken(location.trim_end_matches('/').to_string(), token))
}

/// Parse the content of a single `.npmrc` file. Unknown keys are ignored.
#[must_use]
pub fn parse_npmrc(content: &str) -> NpmrcConfig {
    let mut config = NpmrcConfig::default();

    for directive in content.lines().filter_map(parse_line) {
        match directive {
            Directive::Registry(url) => config.registry = Some(url),
            Directive::ScopedRegistry(scope, url) => {
                config.scoped_registries.insert(scope, url);
            }
            Directive::AuthToken(location, token) => {
                config.auth_tokens.insert(location, token);
            }
        }
    }

    config
}

impl NpmrcConfig {
    /// Fill in anything not already set from `other`.
    fn merge_missing(&mut self, other: NpmrcConfig) {
        if self.registry.is_none() {
            self.registry = other.registry;
        }
        for (scope, url) in other.scoped_registries {
            self.scoped_registries.entry(scope).or_insert(url);
        }
        for (location, token) in other.auth_tokens {
            self.auth_tokens.entry(location).or_insert(token);
        }
    }

    /// Token configured for a registry URL, matching `host/path` first and
    /// then the bare host.
    #[must_use]
    pub fn token_for(&self, url: &Url) -> Option<String> {
        let host = url.host_str()?;
        let path = url.path().trim_end_matches('/');

        let with_path = format!("{host}{path}");
        self.auth_tokens
            .get(&with_path)
            .or_else(|| self.auth_tokens.get(host))
            .cloned()
    }
}

/// Load `.npmrc` files from `start_dir` upward, then from the home directory.
///
/// The nearest file wins for every key.
#[must_use]
pub fn load_npmrc_files(start_dir: &Path) -> NpmrcConfig {
    let mut merged = NpmrcConfig::default();

    let home = home_dir().map(|home| home.join(".npmrc"));
    let candidates = start_dir
        .ancestors()
        .map(|dir| dir.join(".npmrc"))
        .chain(home);

    for path in candidates {
        if let Ok(content) = std::fs::read_to_string(&path) {
            tracing::debug!(path = %path.display(), "Read .npmrc");
            merged.merge_missing(parse_npmrc(&content));
        }
    }

    merged
}

/// Pair every scoped registry with its auth token.
#[must_use]
pub fn resolve_scoped_registries(config: &NpmrcConfig) -> Vec<ScopedRegistry> {
    config
        .scoped_registries
        .iter()
        .map(|(scope, url)| ScopedRegistry {
            scope: scope.clone(),
            registry_url: url.clone(),
            auth_token: config.token_for(url),
        })
        .collect()
}

/// Expand `${ENV_VAR}`; unset variables expand to nothing.
fn expand_env_vars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                if let Ok(value) = std::env::var(&after[..end]) {
                    out.push_str(&value);
                }
                rest = &after[end + 1..];
            }
            None => {
                // Unterminated: keep literally.
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}
