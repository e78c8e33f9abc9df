//! Resolution engine: expands one frontier task into resolved entries.
//!
//! Metadata is fetched at most once per package per run. Each package name has
//! an async once-cell; concurrent expansions of the same name await the same
//! fetch. A `NotFound` answer is cached as `None`. A network failure leaves the
//! cell empty so the orchestrator's retry fetches again.

use super::error::MirrorError;
use super::frontier::{Frontier, FrontierTask, ResolvedEntry};
use super::metadata::{PackageMetadata, VersionRecord};
use super::range::Range;
use super::registry::Registry;
use super::spec::{DependencyKind, DependencySpec, SpecForm};
use crate::config::MirrorConfig;
use semver::Version;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::OnceCell;
use tracing::{debug, trace, warn};

type MetadataCell = Arc<OnceCell<Option<Arc<PackageMetadata>>>>;

/// A spec that was skipped without failing the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Skip {
    pub name: String,
    pub range: String,
    pub code: &'static str,
    pub reason: String,
}

impl Skip {
    fn new(spec: &DependencySpec, err: &MirrorError) -> Self {
        Self {
            name: spec.name.clone(),
            range: spec.range_expr.clone(),
            code: err.code(),
            reason: err.message().to_string(),
        }
    }
}

impl fmt::Display for Skip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}: {}", self.name, self.range, self.reason)
    }
}

/// A version newly admitted by an expansion.
#[derive(Debug, Clone)]
pub struct Admitted {
    pub entry: ResolvedEntry,
    pub record: VersionRecord,
}

/// What one call to [`ResolutionEngine::expand`] produced.
#[derive(Debug, Default)]
pub struct Expansion {
    pub admitted: Vec<Admitted>,
    /// Set the first time any expansion sees this package's metadata, so the
    /// document is written once per run.
    pub metadata: Option<Arc<PackageMetadata>>,
    pub warnings: Vec<Skip>,
    /// Child tasks pushed onto the frontier.
    pub enqueued: usize,
}

/// Turns specs into resolved entries and new frontier tasks.
pub struct ResolutionEngine {
    registry: Arc<dyn Registry>,
    frontier: Arc<Frontier>,
    config: Arc<MirrorConfig>,
    cache: Mutex<HashMap<String, MetadataCell>>,
    /// Packages whose metadata has been handed out for writing.
    claimed: Mutex<HashSet<String>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ResolutionEngine {
    #[must_use]
    pub fn new(registry: Arc<dyn Registry>, frontier: Arc<Frontier>, config: Arc<MirrorConfig>) -> Self {
        Self {
            registry,
            frontier,
            config,
            cache: Mutex::new(HashMap::new()),
            claimed: Mutex::new(HashSet::new()),
        }
    }

    /// The frontier this engine feeds.
    #[must_use]
    pub fn frontier(&self) -> &Arc<Frontier> {
        &self.frontier
    }

    /// Get package metadata from cache or registry. `Ok(None)` means the
    /// registry does not know the package.
    ///
    /// # Errors
    /// Returns the registry error for anything other than not-found.
    pub async fn metadata(&self, name: &str) -> Result<Option<Arc<PackageMetadata>>, MirrorError> {
        let cell = Arc::clone(lock(&self.cache).entry(name.to_string()).or_default());

        let value = cell
            .get_or_try_init(|| async {
                debug!(package = %name, "Fetching metadata");
                match self.registry.fetch_metadata(name).await {
                    Ok(meta) => Ok(Some(Arc::new(meta))),
                    Err(err) if err.is_not_found() => Ok(None),
                    Err(err) => Err(err),
                }
            })
            .await?;

        Ok(value.clone())
    }

    fn claim_metadata(&self, name: &str) -> bool {
        lock(&self.claimed).insert(name.to_string())
    }

    /// Versions of `meta` selected by `selector`.
    fn candidates<'m>(&self, meta: &'m PackageMetadata, selector: &str) -> Result<Vec<&'m Version>, MirrorError> {
        if let Some(tagged) = meta.tagged(selector.trim()) {
            return Ok(vec![tagged]);
        }

        let range = Range::parse(selector)?;
        let found = if self.config.greedy {
            range.all_satisfying(meta.version_list())
        } else {
            range.max_satisfying(meta.version_list()).into_iter().collect()
        };

        if found.is_empty() {
            return Err(MirrorError::range_unsatisfiable(&meta.name, selector));
        }
        Ok(found)
    }

    /// Whether a spec found at `depth` should become a frontier task.
    ///
    /// Excluded categories and non-registry specs never enter the frontier.
    #[must_use]
    pub fn admits_spec(&self, spec: &DependencySpec, depth: usize) -> bool {
        if !self.config.includes(spec.kind, depth) {
            trace!(spec = %spec, depth, "Category excluded");
            return false;
        }
        match spec.classify() {
            Ok(SpecForm::External(source)) => {
                debug!(spec = %spec, ?source, "Skipping non-registry dependency");
                false
            }
            // Malformed aliases are reported when expanded.
            Ok(SpecForm::Registry { .. }) | Err(_) => true,
        }
    }

    /// Expand one task: resolve its spec, admit new versions, and enqueue
    /// their dependencies.
    ///
    /// # Errors
    /// Returns retryable registry errors only. Everything else is reported as
    /// a warning in the expansion. An `Err` is returned before anything has
    /// been admitted, so the task can be expanded again.
    pub async fn expand(&self, task: &FrontierTask) -> Result<Expansion, MirrorError> {
        let spec = &task.spec;
        let mut expansion = Expansion::default();

        let (name, selector) = match spec.classify() {
            Ok(SpecForm::Registry { name, selector }) => (name, selector),
            Ok(SpecForm::External(_)) => return Ok(expansion),
            Err(err) => {
                warn!(spec = %spec, error = %err, "Skipping invalid spec");
                expansion.warnings.push(Skip::new(spec, &err));
                return Ok(expansion);
            }
        };

        let Some(meta) = self.metadata(&name).await? else {
            let err = MirrorError::not_found(&name);
            warn!(spec = %spec, "Package not found in registry");
            expansion.warnings.push(Skip::new(spec, &err));
            return Ok(expansion);
        };

        if self.claim_metadata(&name) {
            expansion.metadata = Some(Arc::clone(&meta));
        }

        let candidates = match self.candidates(&meta, &selector) {
            Ok(candidates) => candidates,
            Err(err) => {
                warn!(spec = %spec, error = %err, "Skipping unresolvable range");
                expansion.warnings.push(Skip::new(spec, &err));
                return Ok(expansion);
            }
        };

        for version in candidates {
            if !self.frontier.try_admit(&name, version) {
                continue;
            }
            let Some(record) = meta.get(version) else {
                continue;
            };

            let depth = task.origin_depth + 1;
            for kind in DependencyKind::ALL {
                for (dep_name, dep_range) in record.dependencies_of(kind) {
                    let child = DependencySpec::new(dep_name, dep_range, kind);
                    if self.admits_spec(&child, depth) {
                        self.frontier.enqueue(task.child(child));
                        expansion.enqueued += 1;
                    }
                }
            }

            if record.deprecated {
                debug!(package = %name, version = %version, "Mirroring deprecated version");
            }

            expansion.admitted.push(Admitted {
                entry: ResolvedEntry::new(name.clone(), version.clone()),
                record: record.clone(),
            });
        }

        Ok(expansion)
    }
}
