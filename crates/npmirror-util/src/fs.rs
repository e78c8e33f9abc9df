use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Marker embedded in every temp file name produced by this module.
pub const TEMP_MARKER: &str = ".tmp.";

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Build a unique sibling temp path for `path`.
///
/// The name is hidden (leading dot) and carries the process id plus a
/// per-process counter, so concurrent writers in one process never collide.
#[must_use]
pub fn temp_path_for(path: &Path) -> PathBuf {
    let parent = path.parent().unwrap_or(Path::new("."));
    let seq = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);

    parent.join(format!(
        ".{}{TEMP_MARKER}{}.{seq}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("file"),
        std::process::id()
    ))
}

/// Whether a file name was produced by [`temp_path_for`].
#[must_use]
pub fn is_temp_file_name(name: &str) -> bool {
    name.starts_with('.') && name.contains(TEMP_MARKER)
}

/// Atomically write bytes to a file by writing to a temp file then renaming.
///
/// This provides crash-safety: the file will either have the old contents or
/// the new contents, never a partial write. Parent directories are created.
///
/// # Errors
/// Returns an error if the write or rename fails.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let temp_path = temp_path_for(path);

    let written = File::create(&temp_path).and_then(|mut file| {
        file.write_all(bytes)?;
        file.sync_all()
    });

    if let Err(e) = written {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }

    let renamed = match fs::rename(&temp_path, path) {
        // Windows refuses to rename over an existing file. The final name must
        // only ever receive a complete file, so no copy fallback.
        Err(_) if cfg!(windows) && path.is_file() => {
            fs::remove_file(path).and_then(|()| fs::rename(&temp_path, path))
        }
        other => other,
    };

    if renamed.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    renamed
}

/// Size of a complete, non-empty regular file at `path`, if there is one.
#[must_use]
pub fn existing_file_len(path: &Path) -> Option<u64> {
    let meta = fs::metadata(path).ok()?;
    (meta.is_file() && meta.len() > 0).then_some(meta.len())
}

/// Remove leftover temp files in `dir` (non-recursive).
///
/// Returns the number of files removed. A missing directory counts as empty.
///
/// # Errors
/// Returns an error if the directory exists but cannot be read.
pub fn remove_stale_temp_files(dir: &Path) -> io::Result<usize> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let name = entry.file_name();
        if is_temp_file_name(&name.to_string_lossy()) && fs::remove_file(entry.path()).is_ok() {
            removed += 1;
        }
    }

    Ok(removed)
}
