//! Package resolution and mirroring.
//!
//! - Range matching over npm semver ranges
//! - Registry access (HTTP and in-memory)
//! - The resolution frontier and engine
//! - Writing the mirror to disk
//! - Running all of it with a bounded worker pool, with live progress counters

pub mod engine;
pub mod error;
pub mod frontier;
pub mod integrity;
pub mod manifest;
pub mod memory;
pub mod metadata;
pub mod npmrc;
pub mod orchestrator;
pub mod progress;
pub mod range;
pub mod registry;
pub mod spec;
pub mod writer;

pub use engine::{Admitted, Expansion, ResolutionEngine, Skip};
pub use error::{codes as mirror_codes, MirrorError};
pub use frontier::{Frontier, FrontierTask, ResolvedEntry};
pub use integrity::IntegrityCheck;
pub use manifest::{load_manifests, ManifestIssue, Manifests};
pub use memory::MemoryRegistry;
pub use metadata::{PackageMetadata, VersionRecord};
pub use npmrc::{load_npmrc_files, NpmrcConfig, ScopedRegistry};
pub use orchestrator::{with_retry, FailedEntry, Mirror, MirrorReport};
pub use progress::{Progress, ProgressSnapshot};
pub use range::{max_satisfying, satisfies, Range};
pub use registry::{HttpRegistry, Registry, DEFAULT_REGISTRY, MAX_TARBALL_SIZE, REGISTRY_ENV};
pub use spec::{DependencyKind, DependencySpec, SpecForm};
pub use writer::{MirrorWriter, WriteOutcome};
