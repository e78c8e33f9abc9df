use crate::error::Error;
use crate::pkg::registry::DEFAULT_REGISTRY;
use crate::pkg::spec::DependencyKind;
use std::path::PathBuf;
use std::time::Duration;

/// Which depths the include flags apply to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SuppressionScope {
    /// Excluded categories are dropped everywhere in the graph.
    #[default]
    EveryDepth,
    /// Excluded categories are dropped from manifest seeds only; transitive
    /// dependencies of every category are followed.
    RootOnly,
}

impl SuppressionScope {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EveryDepth => "every-depth",
            Self::RootOnly => "root-only",
        }
    }
}

/// Backoff for retryable registry failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`, given that `attempt` (1-based)
    /// attempts have failed. Doubles each time, capped at `max_delay`.
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Settings for one mirror run.
#[derive(Debug, Clone)]
pub struct MirrorConfig {
    pub include_dev: bool,
    pub include_peer: bool,
    pub include_optional: bool,
    /// Mirror every satisfying version instead of only the highest.
    pub greedy: bool,
    /// Number of workers.
    pub concurrency: usize,
    pub output_path: PathBuf,
    pub registry_url: String,
    pub suppression_scope: SuppressionScope,
    pub retry: RetryPolicy,
    pub verify_integrity: bool,
}

/// Default worker count: twice the available parallelism.
#[must_use]
pub fn default_concurrency() -> usize {
    std::thread::available_parallelism().map_or(8, |n| n.get() * 2)
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            include_dev: true,
            include_peer: true,
            include_optional: true,
            greedy: false,
            concurrency: default_concurrency(),
            output_path: PathBuf::from("./output"),
            registry_url: DEFAULT_REGISTRY.to_string(),
            suppression_scope: SuppressionScope::default(),
            retry: RetryPolicy::default(),
            verify_integrity: true,
        }
    }
}

impl MirrorConfig {
    /// Create a config writing to `output_path`.
    #[must_use]
    pub fn new(output_path: impl Into<PathBuf>) -> Self {
        Self {
            output_path: output_path.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_greedy(mut self, greedy: bool) -> Self {
        self.greedy = greedy;
        self
    }

    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Set which optional categories are followed.
    #[must_use]
    pub fn with_categories(mut self, dev: bool, peer: bool, optional: bool) -> Self {
        self.include_dev = dev;
        self.include_peer = peer;
        self.include_optional = optional;
        self
    }

    #[must_use]
    pub fn with_suppression_scope(mut self, scope: SuppressionScope) -> Self {
        self.suppression_scope = scope;
        self
    }

    #[must_use]
    pub fn with_registry_url(mut self, url: impl Into<String>) -> Self {
        self.registry_url = url.into();
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_verify_integrity(mut self, verify: bool) -> Self {
        self.verify_integrity = verify;
        self
    }

    /// Whether a dependency of `kind` found at `depth` (0 = manifest seed)
    /// enters the graph.
    #[must_use]
    pub fn includes(&self, kind: DependencyKind, depth: usize) -> bool {
        if depth > 0 && self.suppression_scope == SuppressionScope::RootOnly {
            return true;
        }
        match kind {
            DependencyKind::Prod => true,
            DependencyKind::Dev => self.include_dev,
            DependencyKind::Peer => self.include_peer,
            DependencyKind::Optional => self.include_optional,
        }
    }

    /// Check the settings that would make a run meaningless.
    ///
    /// # Errors
    /// Returns an error for a zero worker count, zero attempts, or a registry
    /// URL that is not absolute http(s).
    pub fn validate(&self) -> Result<(), Error> {
        if self.concurrency == 0 {
            return Err(Error::invalid_config("concurrency must be at least 1"));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::invalid_config("retry attempts must be at least 1"));
        }

        let url = url::Url::parse(&self.registry_url).map_err(|e| Error::InvalidRegistryUrl {
            url: self.registry_url.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::InvalidRegistryUrl {
                url: self.registry_url.clone(),
                reason: format!("unsupported scheme '{}'", url.scheme()),
            });
        }

        Ok(())
    }
}
