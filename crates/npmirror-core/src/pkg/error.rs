//! Per-entry mirror error types.
//!
//! Every failure that concerns a single package or version is a [`MirrorError`].
//! These never abort a run; the orchestrator records them and moves on.

use std::fmt;
use std::io;

/// Mirror error codes.
pub mod codes {
    pub const MIRROR_SPEC_INVALID: &str = "MIRROR_SPEC_INVALID";
    pub const MIRROR_RANGE_INVALID: &str = "MIRROR_RANGE_INVALID";
    pub const MIRROR_RANGE_UNSATISFIABLE: &str = "MIRROR_RANGE_UNSATISFIABLE";
    pub const MIRROR_NOT_FOUND: &str = "MIRROR_NOT_FOUND";
    pub const MIRROR_NETWORK_ERROR: &str = "MIRROR_NETWORK_ERROR";
    pub const MIRROR_METADATA_INVALID: &str = "MIRROR_METADATA_INVALID";
    pub const MIRROR_INTEGRITY_MISMATCH: &str = "MIRROR_INTEGRITY_MISMATCH";
    pub const MIRROR_IO_ERROR: &str = "MIRROR_IO_ERROR";
    pub const MIRROR_INTERNAL_ERROR: &str = "MIRROR_INTERNAL_ERROR";
}

/// Mirror error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorError {
    code: &'static str,
    message: String,
}

impl MirrorError {
    /// Create a new error with the given code and message.
    #[must_use]
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Get the error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        self.code
    }

    /// Get the error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether the orchestrator should try the failed operation again.
    ///
    /// Network errors are transient. A tarball whose bytes fail the integrity
    /// check is treated the same way, since a truncated body is the usual cause.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.code,
            codes::MIRROR_NETWORK_ERROR | codes::MIRROR_INTEGRITY_MISMATCH
        )
    }

    /// Whether this error means the package does not exist upstream.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.code == codes::MIRROR_NOT_FOUND
    }

    /// Create a spec invalid error.
    pub fn spec_invalid(msg: impl Into<String>) -> Self {
        Self::new(codes::MIRROR_SPEC_INVALID, msg)
    }

    /// Create a range invalid error.
    #[must_use]
    pub fn range_invalid(range: &str, reason: &str) -> Self {
        Self::new(
            codes::MIRROR_RANGE_INVALID,
            format!("Invalid version range '{range}': {reason}"),
        )
    }

    /// Create an unsatisfiable range error.
    #[must_use]
    pub fn range_unsatisfiable(name: &str, range: &str) -> Self {
        Self::new(
            codes::MIRROR_RANGE_UNSATISFIABLE,
            format!("No version of {name} satisfies range: {range}"),
        )
    }

    /// Create a package not found error.
    #[must_use]
    pub fn not_found(what: &str) -> Self {
        Self::new(codes::MIRROR_NOT_FOUND, format!("Not found upstream: {what}"))
    }

    /// Create a network error.
    pub fn network(msg: impl Into<String>) -> Self {
        Self::new(codes::MIRROR_NETWORK_ERROR, msg)
    }

    /// Create a metadata invalid error.
    pub fn metadata_invalid(msg: impl Into<String>) -> Self {
        Self::new(codes::MIRROR_METADATA_INVALID, msg)
    }

    /// Create an integrity mismatch error.
    #[must_use]
    pub fn integrity_mismatch(url: &str, expected: &str, actual: &str) -> Self {
        Self::new(
            codes::MIRROR_INTEGRITY_MISMATCH,
            format!("Integrity mismatch for '{url}': expected {expected}, got {actual}"),
        )
    }

    /// Create an IO error.
    pub fn io(msg: impl Into<String>) -> Self {
        Self::new(codes::MIRROR_IO_ERROR, msg)
    }

    /// Processing of an entry crashed.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(codes::MIRROR_INTERNAL_ERROR, msg)
    }
}

impl fmt::Display for MirrorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for MirrorError {}

impl From<io::Error> for MirrorError {
    fn from(e: io::Error) -> Self {
        Self::io(e.to_string())
    }
}

impl From<reqwest::Error> for MirrorError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::network(format!("Request timed out: {e}"))
        } else if e.is_connect() {
            Self::network(format!("Connection failed: {e}"))
        } else if e.is_decode() {
            Self::metadata_invalid(format!("Failed to decode response: {e}"))
        } else {
            Self::network(e.to_string())
        }
    }
}

impl From<serde_json::Error> for MirrorError {
    fn from(e: serde_json::Error) -> Self {
        Self::metadata_invalid(format!("Invalid JSON: {e}"))
    }
}
