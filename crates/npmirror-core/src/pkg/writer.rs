//! On-disk mirror layout.
//!
//! ```text
//! <output>/<name>/index.json        packument, as fetched
//! <output>/<name>/-/<file>.tgz      tarballs, upstream file names
//! ```
//!
//! Scoped packages nest under their scope directory (`@scope/name/...`).
//! Every file is written to a hidden temp sibling and renamed into place, so
//! an interrupted run never leaves a partial file under a final name.

use super::error::MirrorError;
use super::frontier::ResolvedEntry;
use super::metadata::{tarball_file_name, PackageMetadata};
use crate::error::Error;
use bytes::Bytes;
use npmirror_util::fs::{atomic_write, existing_file_len, remove_stale_temp_files, temp_path_for};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, trace};
use walkdir::WalkDir;

/// File name of the packument inside a package directory.
pub const METADATA_FILE: &str = "index.json";

/// Directory holding tarballs inside a package directory.
pub const TARBALL_DIR: &str = "-";

const WRITE_CHECK: &str = "write-check";

/// Result of a tarball write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// A complete file was already there.
    Skipped,
    /// Bytes written.
    Written(u64),
}

/// Writes packuments and tarballs under an output root.
#[derive(Debug)]
pub struct MirrorWriter {
    root: PathBuf,
    metadata_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

async fn blocking<T, F>(f: F) -> Result<T, MirrorError>
where
    F: FnOnce() -> Result<T, MirrorError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| MirrorError::io(format!("Write task failed: {e}")))?
}

impl MirrorWriter {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            metadata_locks: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the output root and check that files can be written in it.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be created or written to.
    pub fn prepare(&self) -> Result<(), Error> {
        let not_writable = |source| Error::OutputNotWritable {
            path: self.root.clone(),
            source,
        };

        std::fs::create_dir_all(&self.root).map_err(not_writable)?;

        // A temp name, so a check file left behind by a crash is swept next run.
        let check = temp_path_for(&self.root.join(WRITE_CHECK));
        std::fs::write(&check, b"")
            .and_then(|()| std::fs::remove_file(&check))
            .map_err(not_writable)
    }

    /// Remove temp files left behind by interrupted runs.
    ///
    /// Returns the number of files removed.
    #[must_use]
    pub fn sweep_temp_files(&self) -> usize {
        WalkDir::new(&self.root)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_dir())
            .filter_map(|dir| remove_stale_temp_files(dir.path()).ok())
            .sum()
    }

    /// Directory of a package. Rejects names that would escape the root.
    ///
    /// # Errors
    /// Returns an error for names that are not one or two plain path segments.
    pub fn package_dir(&self, name: &str) -> Result<PathBuf, MirrorError> {
        let path = Path::new(name);
        let components: Vec<_> = path.components().collect();

        let plain = !name.contains('\\')
            && components.iter().all(|c| matches!(c, Component::Normal(_)))
            && match components.len() {
                1 => !name.starts_with('@'),
                2 => name.starts_with('@'),
                _ => false,
            };

        if !plain {
            return Err(MirrorError::spec_invalid(format!(
                "Refusing to write package with unsafe name '{name}'"
            )));
        }

        Ok(self.root.join(path))
    }

    /// Path of a package's packument.
    ///
    /// # Errors
    /// Returns an error for unsafe package names.
    pub fn metadata_path(&self, name: &str) -> Result<PathBuf, MirrorError> {
        Ok(self.package_dir(name)?.join(METADATA_FILE))
    }

    /// Path of the tarball fetched from `url` for package `name`.
    ///
    /// # Errors
    /// Returns an error for unsafe package names or URLs without a file name.
    pub fn tarball_path(&self, name: &str, url: &str) -> Result<PathBuf, MirrorError> {
        let file = tarball_file_name(url)
            .filter(|f| !f.starts_with('.') && !f.contains('\\'))
            .ok_or_else(|| MirrorError::spec_invalid(format!("Tarball URL has no file name: {url}")))?;
        Ok(self.package_dir(name)?.join(TARBALL_DIR).join(file))
    }

    /// Whether a complete tarball for `url` is already on disk.
    #[must_use]
    pub fn has_tarball(&self, name: &str, url: &str) -> bool {
        self.tarball_path(name, url)
            .ok()
            .and_then(|path| existing_file_len(&path))
            .is_some()
    }

    /// Write a packument, replacing any previous copy.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub async fn write_metadata(&self, metadata: &PackageMetadata) -> Result<PathBuf, MirrorError> {
        let path = self.metadata_path(&metadata.name)?;

        let lock = {
            let mut locks = self
                .metadata_locks
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(metadata.name.clone()).or_default())
        };
        let _guard = lock.lock().await;

        let raw = Bytes::copy_from_slice(metadata.raw());
        let target = path.clone();
        blocking(move || atomic_write(&target, &raw).map_err(MirrorError::from)).await?;

        debug!(package = %metadata.name, path = %path.display(), "Wrote metadata");
        Ok(path)
    }

    /// Write a tarball unless a complete copy exists.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub async fn write_tarball(
        &self,
        entry: &ResolvedEntry,
        url: &str,
        bytes: Bytes,
    ) -> Result<WriteOutcome, MirrorError> {
        let path = self.tarball_path(&entry.name, url)?;

        let target = path.clone();
        let outcome = blocking(move || {
            if existing_file_len(&target).is_some() {
                return Ok(WriteOutcome::Skipped);
            }
            atomic_write(&target, &bytes)?;
            Ok(WriteOutcome::Written(bytes.len() as u64))
        })
        .await?;

        match outcome {
            WriteOutcome::Skipped => trace!(entry = %entry, "Tarball already present"),
            WriteOutcome::Written(len) => {
                debug!(entry = %entry, path = %path.display(), bytes = len, "Wrote tarball");
            }
        }
        Ok(outcome)
    }
}
