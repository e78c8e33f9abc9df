//! Resolution frontier: the visited set and the shared work queue.
//!
//! All state sits behind one mutex so that admission (check-and-insert into
//! the visited set) and the queue/in-flight counters change together. Idle
//! workers park on a [`Notify`] and are woken by every enqueue and every
//! completion. The frontier is quiescent once the queue is empty and no task
//! is in flight; from then on [`Frontier::dequeue`] returns `None`.

use super::spec::DependencySpec;
use semver::Version;
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::pin::pin;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

/// A resolved `(package, version)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ResolvedEntry {
    pub name: String,
    #[serde(serialize_with = "serialize_version")]
    pub version: Version,
}

fn serialize_version<S: serde::Serializer>(version: &Version, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(version)
}

impl ResolvedEntry {
    #[must_use]
    pub fn new(name: impl Into<String>, version: Version) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }
}

impl fmt::Display for ResolvedEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

/// A spec waiting to be expanded.
#[derive(Debug, Clone)]
pub struct FrontierTask {
    pub spec: DependencySpec,
    /// 0 for manifest seeds.
    pub origin_depth: usize,
}

impl FrontierTask {
    #[must_use]
    pub fn seed(spec: DependencySpec) -> Self {
        Self {
            spec,
            origin_depth: 0,
        }
    }

    /// A task for a dependency found while expanding this one.
    #[must_use]
    pub fn child(&self, spec: DependencySpec) -> Self {
        Self {
            spec,
            origin_depth: self.origin_depth + 1,
        }
    }
}

#[derive(Debug, Default)]
struct State {
    queue: VecDeque<FrontierTask>,
    visited: HashSet<ResolvedEntry>,
    in_flight: usize,
}

/// Shared traversal state for one run.
#[derive(Debug, Default)]
pub struct Frontier {
    state: Mutex<State>,
    notify: Notify,
}

impl Frontier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark `(name, version)` visited. Returns `true` only for the first
    /// caller; everyone else gets `false`.
    pub fn try_admit(&self, name: &str, version: &Version) -> bool {
        self.lock()
            .visited
            .insert(ResolvedEntry::new(name, version.clone()))
    }

    /// Queue a task and wake idle workers.
    pub fn enqueue(&self, task: FrontierTask) {
        self.lock().queue.push_back(task);
        self.notify.notify_waiters();
    }

    /// Take the next task, waiting while other workers may still produce
    /// work. Returns `None` once the frontier is quiescent.
    ///
    /// Every task returned must be followed by a call to [`Frontier::complete`].
    pub async fn dequeue(&self) -> Option<FrontierTask> {
        loop {
            // Register interest before looking at the state, so a wakeup
            // between the check and the await is not lost.
            let mut notified = pin!(self.notify.notified());
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if let Some(task) = state.queue.pop_front() {
                    state.in_flight += 1;
                    return Some(task);
                }
                if state.in_flight == 0 {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// A dequeued task has been fully processed.
    pub fn complete(&self) {
        {
            let mut state = self.lock();
            state.in_flight = state.in_flight.saturating_sub(1);
        }
        self.notify.notify_waiters();
    }

    /// Tasks queued or in flight.
    #[must_use]
    pub fn pending(&self) -> usize {
        let state = self.lock();
        state.queue.len() + state.in_flight
    }

    /// Number of admitted `(name, version)` pairs.
    #[must_use]
    pub fn visited_len(&self) -> usize {
        self.lock().visited.len()
    }
}
