//! In-memory registry.
//!
//! Serves packuments and tarballs from maps, counts every fetch, and can be
//! told to fail the next N requests for a key. Used by tests and for mirroring
//! from fixtures.

use super::error::MirrorError;
use super::metadata::PackageMetadata;
use super::registry::Registry;
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Default)]
struct State {
    packuments: HashMap<String, Bytes>,
    tarballs: HashMap<String, Bytes>,
    metadata_fetches: HashMap<String, usize>,
    tarball_fetches: HashMap<String, usize>,
    /// Key (package name or tarball URL) → remaining injected failures.
    failures: HashMap<String, usize>,
}

/// Registry backed by in-memory maps.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    state: Mutex<State>,
}

impl MemoryRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        f(&mut state)
    }

    /// Serve `doc` as the packument of the package it names.
    ///
    /// # Errors
    /// Returns an error if `doc` is not a valid packument.
    pub fn add_packument(&self, doc: &Value) -> Result<(), MirrorError> {
        let meta = PackageMetadata::from_json(doc)?;
        let raw = Bytes::copy_from_slice(meta.raw());
        self.with_state(|s| s.packuments.insert(meta.name, raw));
        Ok(())
    }

    /// Serve `bytes` at `url`.
    pub fn add_tarball(&self, url: impl Into<String>, bytes: impl Into<Bytes>) {
        let (url, bytes) = (url.into(), bytes.into());
        self.with_state(|s| s.tarballs.insert(url, bytes));
    }

    /// Fail the next `count` requests for `key` (a package name or tarball URL)
    /// with a network error.
    pub fn fail_next(&self, key: impl Into<String>, count: usize) {
        let key = key.into();
        self.with_state(|s| s.failures.insert(key, count));
    }

    /// Number of packument requests made for `name`.
    #[must_use]
    pub fn metadata_fetches(&self, name: &str) -> usize {
        self.with_state(|s| s.metadata_fetches.get(name).copied().unwrap_or(0))
    }

    /// Number of tarball requests made for `url`.
    #[must_use]
    pub fn tarball_fetches(&self, url: &str) -> usize {
        self.with_state(|s| s.tarball_fetches.get(url).copied().unwrap_or(0))
    }

    /// Total requests of either kind.
    #[must_use]
    pub fn total_fetches(&self) -> usize {
        self.with_state(|s| {
            s.metadata_fetches.values().sum::<usize>() + s.tarball_fetches.values().sum::<usize>()
        })
    }

    /// Forget all fetch counts.
    pub fn reset_counters(&self) {
        self.with_state(|s| {
            s.metadata_fetches.clear();
            s.tarball_fetches.clear();
        });
    }
}

fn take_failure(failures: &mut HashMap<String, usize>, key: &str) -> bool {
    match failures.get_mut(key) {
        Some(remaining) if *remaining > 0 => {
            *remaining -= 1;
            true
        }
        _ => false,
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    async fn fetch_metadata(&self, name: &str) -> Result<PackageMetadata, MirrorError> {
        let raw = self.with_state(|s| {
            *s.metadata_fetches.entry(name.to_string()).or_default() += 1;
            if take_failure(&mut s.failures, name) {
                return Err(MirrorError::network(format!("injected failure for '{name}'")));
            }
            s.packuments
                .get(name)
                .cloned()
                .ok_or_else(|| MirrorError::not_found(name))
        })?;

        tokio::task::yield_now().await;
        PackageMetadata::from_slice(raw)
    }

    async fn fetch_tarball(&self, url: &str) -> Result<Bytes, MirrorError> {
        let bytes = self.with_state(|s| {
            *s.tarball_fetches.entry(url.to_string()).or_default() += 1;
            if take_failure(&mut s.failures, url) {
                return Err(MirrorError::network(format!("injected failure for '{url}'")));
            }
            s.tarballs
                .get(url)
                .cloned()
                .ok_or_else(|| MirrorError::not_found(url))
        })?;

        tokio::task::yield_now().await;
        Ok(bytes)
    }
}
