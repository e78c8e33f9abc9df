//! Run orchestration: the worker pool, retries and the run report.

use super::engine::{Admitted, ResolutionEngine, Skip};
use super::error::{codes, MirrorError};
use super::frontier::{Frontier, FrontierTask, ResolvedEntry};
use super::integrity;
use super::progress::Progress;
use super::registry::Registry;
use super::spec::DependencySpec;
use super::writer::{MirrorWriter, WriteOutcome};
use crate::config::{MirrorConfig, RetryPolicy};
use crate::error::Error;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// An entry that could not be mirrored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedEntry {
    pub name: String,
    /// `None` when resolution itself failed.
    pub version: Option<String>,
    pub code: &'static str,
    pub message: String,
}

impl FailedEntry {
    fn resolution(spec: &DependencySpec, err: &MirrorError) -> Self {
        Self {
            name: spec.name.clone(),
            version: None,
            code: err.code(),
            message: err.message().to_string(),
        }
    }

    fn entry(entry: &ResolvedEntry, err: &MirrorError) -> Self {
        Self {
            name: entry.name.clone(),
            version: Some(entry.version.to_string()),
            code: err.code(),
            message: err.message().to_string(),
        }
    }
}

impl fmt::Display for FailedEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{}@{} [{}] {}", self.name, version, self.code, self.message),
            None => write!(f, "{} [{}] {}", self.name, self.code, self.message),
        }
    }
}

/// Summary of one run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MirrorReport {
    pub resolved: BTreeSet<ResolvedEntry>,
    pub seeds: usize,
    /// Seeds dropped by category or because they are not registry specs.
    pub seeds_excluded: usize,
    pub tarballs_written: usize,
    pub tarballs_skipped: usize,
    pub bytes_written: u64,
    pub metadata_written: usize,
    pub temp_files_removed: usize,
    pub warnings: Vec<Skip>,
    pub failures: Vec<FailedEntry>,
    pub elapsed_ms: u64,
}

impl MirrorReport {
    /// True when nothing failed. Skips do not count as failures.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// policy's attempts are used up.
///
/// # Errors
/// Returns the last error.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T, MirrorError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, MirrorError>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < policy.max_attempts => {
                let delay = policy.delay_after(attempt);
                warn!(target_item = %what, attempt, error = %err, ?delay, "Retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

struct Shared {
    config: Arc<MirrorConfig>,
    registry: Arc<dyn Registry>,
    engine: ResolutionEngine,
    writer: MirrorWriter,
    progress: Arc<Progress>,
    report: Mutex<MirrorReport>,
}

/// Marks the task complete however processing ends, so idle workers are not
/// left waiting forever.
struct Completion<'a>(&'a Frontier);

impl Drop for Completion<'_> {
    fn drop(&mut self) {
        self.0.complete();
    }
}

impl Shared {
    fn report(&self) -> MutexGuard<'_, MirrorReport> {
        self.report.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn fail(&self, failure: FailedEntry) {
        self.progress.failure();
        self.report().failures.push(failure);
    }

    async fn work(self: Arc<Self>) {
        let frontier = Arc::clone(self.engine.frontier());
        while let Some(task) = frontier.dequeue().await {
            let done = Completion(&frontier);
            let spec = task.spec.clone();

            // Each task runs on its own tokio task so a panic is confined to
            // the spec that caused it.
            let shared = Arc::clone(&self);
            let handled = tokio::spawn(async move { shared.process(&task).await }).await;
            if let Err(err) = handled {
                error!(spec = %spec, error = %err, "Processing crashed");
                let crash = MirrorError::internal(format!("Processing {spec} crashed: {err}"));
                self.fail(FailedEntry::resolution(&spec, &crash));
            }

            drop(done);
            self.progress.frontier(frontier.visited_len(), frontier.pending());
        }
    }

    async fn process(&self, task: &FrontierTask) {
        let spec = &task.spec;
        let what = spec.to_string();

        let expansion = match with_retry(&self.config.retry, &what, || self.engine.expand(task)).await {
            Ok(expansion) => expansion,
            Err(err) => {
                error!(spec = %spec, error = %err, "Resolution failed");
                self.fail(FailedEntry::resolution(spec, &err));
                return;
            }
        };

        if !expansion.warnings.is_empty() {
            self.report().warnings.extend(expansion.warnings);
        }

        if let Some(metadata) = expansion.metadata {
            match self.writer.write_metadata(&metadata).await {
                Ok(_) => {
                    self.progress.packument_written(metadata.raw().len() as u64);
                    self.report().metadata_written += 1;
                }
                Err(err) => {
                    error!(package = %metadata.name, error = %err, "Failed to write metadata");
                    self.fail(FailedEntry {
                        name: metadata.name.clone(),
                        version: None,
                        code: err.code(),
                        message: err.message().to_string(),
                    });
                }
            }
        }

        for admitted in expansion.admitted {
            self.report().resolved.insert(admitted.entry.clone());
            if let Err(err) = self.mirror_tarball(&admitted).await {
                error!(entry = %admitted.entry, error = %err, "Failed to mirror tarball");
                self.progress.tarball_failed();
                self.report().failures.push(FailedEntry::entry(&admitted.entry, &err));
            }
        }
    }

    async fn mirror_tarball(&self, admitted: &Admitted) -> Result<(), MirrorError> {
        let entry = &admitted.entry;
        let url = admitted.record.tarball_url.as_str();

        // Fail on an unusable destination before spending a download on it.
        self.writer.tarball_path(&entry.name, url)?;

        if self.writer.has_tarball(&entry.name, url) {
            debug!(entry = %entry, "Tarball already mirrored");
            self.progress.tarball_skipped();
            self.report().tarballs_skipped += 1;
            return Ok(());
        }

        let verify = self.config.verify_integrity;
        let integrity = admitted.record.integrity.as_deref();
        let bytes = with_retry(&self.config.retry, url, || async {
            let bytes = self.registry.fetch_tarball(url).await?;
            if verify {
                integrity::verify(url, &bytes, integrity)?;
            }
            Ok(bytes)
        })
        .await?;

        match self.writer.write_tarball(entry, url, bytes).await? {
            WriteOutcome::Written(len) => {
                self.progress.tarball_written(len);
                let mut report = self.report();
                report.tarballs_written += 1;
                report.bytes_written += len;
            }
            WriteOutcome::Skipped => {
                self.progress.tarball_skipped();
                self.report().tarballs_skipped += 1;
            }
        }
        Ok(())
    }
}

/// A configured mirror run.
pub struct Mirror {
    config: MirrorConfig,
    registry: Arc<dyn Registry>,
    progress: Arc<Progress>,
}

impl Mirror {
    #[must_use]
    pub fn new(config: MirrorConfig, registry: Arc<dyn Registry>) -> Self {
        Self {
            config,
            registry,
            progress: Arc::new(Progress::new()),
        }
    }

    /// Live counters for the current run.
    #[must_use]
    pub fn progress(&self) -> Arc<Progress> {
        Arc::clone(&self.progress)
    }

    /// Resolve the closure of `seeds` and mirror it to the output path.
    ///
    /// Per-entry problems are recorded in the report; the run always
    /// continues to quiescence.
    ///
    /// # Errors
    /// Returns an error only for invalid configuration or an output root that
    /// cannot be written.
    pub async fn run(&self, seeds: Vec<DependencySpec>) -> Result<MirrorReport, Error> {
        let started = Instant::now();
        self.config.validate()?;
        self.progress.reset();

        let config = Arc::new(self.config.clone());
        let writer = MirrorWriter::new(&config.output_path);
        writer.prepare()?;

        let temp_files_removed = writer.sweep_temp_files();
        if temp_files_removed > 0 {
            info!(count = temp_files_removed, "Removed leftover temp files");
        }

        let frontier = Arc::new(Frontier::new());
        let engine = ResolutionEngine::new(Arc::clone(&self.registry), Arc::clone(&frontier), Arc::clone(&config));

        let seed_count = seeds.len();
        let mut excluded = 0;
        for seed in seeds {
            if engine.admits_spec(&seed, 0) {
                frontier.enqueue(FrontierTask::seed(seed));
            } else {
                excluded += 1;
            }
        }
        self.progress.frontier(frontier.visited_len(), frontier.pending());

        info!(
            seeds = seed_count,
            excluded,
            workers = config.concurrency,
            greedy = config.greedy,
            scope = config.suppression_scope.as_str(),
            "Starting mirror run"
        );

        let shared = Arc::new(Shared {
            config: Arc::clone(&config),
            registry: Arc::clone(&self.registry),
            engine,
            writer,
            progress: Arc::clone(&self.progress),
            report: Mutex::new(MirrorReport {
                seeds: seed_count,
                seeds_excluded: excluded,
                temp_files_removed,
                ..MirrorReport::default()
            }),
        });

        let mut workers = JoinSet::new();
        for _ in 0..config.concurrency {
            workers.spawn(Arc::clone(&shared).work());
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Worker task failed");
                shared.fail(FailedEntry {
                    name: "<worker>".to_string(),
                    version: None,
                    code: codes::MIRROR_INTERNAL_ERROR,
                    message: format!("Worker stopped: {e}"),
                });
            }
        }

        let mut report = std::mem::take(&mut *shared.report());
        report.warnings.sort_by(|a, b| (&a.name, &a.range).cmp(&(&b.name, &b.range)));
        report.failures.sort_by(|a, b| (&a.name, &a.version).cmp(&(&b.name, &b.version)));
        report.elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        info!(
            resolved = report.resolved.len(),
            written = report.tarballs_written,
            skipped = report.tarballs_skipped,
            failures = report.failures.len(),
            elapsed_ms = report.elapsed_ms,
            "Mirror run finished"
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    #[tokio::test]
    async fn test_retry_until_success() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&fast_retry(4), "x", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(MirrorError::network("flaky"))
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&fast_retry(3), "x", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(MirrorError::network("down"))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_not_found_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&fast_retry(5), "x", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(MirrorError::not_found("x"))
        })
        .await;
        assert!(result.unwrap_err().is_not_found());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_entry_display() {
        let entry = ResolvedEntry::new("a", semver::Version::new(1, 0, 0));
        let failed = FailedEntry::entry(&entry, &MirrorError::network("timeout"));
        assert!(failed.to_string().starts_with("a@1.0.0 [MIRROR_NETWORK_ERROR]"));
        assert!(MirrorReport::default().is_success());
    }
}
