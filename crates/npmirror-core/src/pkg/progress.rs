//! Live counters for a running mirror.
//!
//! The orchestrator bumps these as it goes; a front end polls
//! [`Progress::snapshot`] to draw whatever display it likes.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Progress {
    resolved: AtomicU64,
    pending: AtomicU64,
    packuments: AtomicU64,
    packument_bytes: AtomicU64,
    tarballs_written: AtomicU64,
    tarballs_skipped: AtomicU64,
    tarball_bytes: AtomicU64,
    tarballs_failed: AtomicU64,
    failures: AtomicU64,
}

/// Point-in-time copy of [`Progress`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressSnapshot {
    /// Admitted `(name, version)` pairs.
    pub resolved: u64,
    /// Specs queued or being expanded.
    pub pending: u64,
    pub packuments: u64,
    pub packument_bytes: u64,
    pub tarballs_written: u64,
    pub tarballs_skipped: u64,
    pub tarball_bytes: u64,
    pub tarballs_failed: u64,
    /// Every recorded failure, tarball or not.
    pub failures: u64,
}

impl ProgressSnapshot {
    /// Tarballs that no longer need work: written, already present, or failed.
    #[must_use]
    pub fn tarballs_done(&self) -> u64 {
        self.tarballs_written + self.tarballs_skipped + self.tarballs_failed
    }

    /// Whether the frontier has drained.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.pending == 0
    }
}

impl Progress {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn reset(&self) {
        for counter in [
            &self.resolved,
            &self.pending,
            &self.packuments,
            &self.packument_bytes,
            &self.tarballs_written,
            &self.tarballs_skipped,
            &self.tarball_bytes,
            &self.tarballs_failed,
            &self.failures,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub(crate) fn frontier(&self, resolved: usize, pending: usize) {
        self.resolved.store(resolved as u64, Ordering::Relaxed);
        self.pending.store(pending as u64, Ordering::Relaxed);
    }

    pub(crate) fn packument_written(&self, bytes: u64) {
        self.packuments.fetch_add(1, Ordering::Relaxed);
        self.packument_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn tarball_written(&self, bytes: u64) {
        self.tarballs_written.fetch_add(1, Ordering::Relaxed);
        self.tarball_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn tarball_skipped(&self) {
        self.tarballs_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn tarball_failed(&self) {
        self.tarballs_failed.fetch_add(1, Ordering::Relaxed);
        self.failure();
    }

    pub(crate) fn failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            resolved: self.resolved.load(Ordering::Relaxed),
            pending: self.pending.load(Ordering::Relaxed),
            packuments: self.packuments.load(Ordering::Relaxed),
            packument_bytes: self.packument_bytes.load(Ordering::Relaxed),
            tarballs_written: self.tarballs_written.load(Ordering::Relaxed),
            tarballs_skipped: self.tarballs_skipped.load(Ordering::Relaxed),
            tarball_bytes: self.tarball_bytes.load(Ordering::Relaxed),
            tarballs_failed: self.tarballs_failed.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let progress = Progress::new();
        progress.frontier(3, 1);
        progress.packument_written(100);
        progress.tarball_written(40);
        progress.tarball_skipped();
        progress.tarball_failed();
        progress.failure();

        let snap = progress.snapshot();
        assert_eq!(snap.resolved, 3);
        assert_eq!(snap.packuments, 1);
        assert_eq!(snap.packument_bytes, 100);
        assert_eq!(snap.tarball_bytes, 40);
        assert_eq!(snap.tarballs_done(), 3);
        assert_eq!(snap.failures, 2);
        assert!(!snap.is_idle());

        progress.reset();
        assert_eq!(progress.snapshot(), ProgressSnapshot::default());
    }
}
