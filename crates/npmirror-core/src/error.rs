use std::path::PathBuf;
use thiserror::Error;

/// Fatal startup errors. Anything that concerns a single package is a
/// [`crate::pkg::MirrorError`] instead and never aborts a run.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Manifests path not found: {path}")]
    ManifestsNotFound { path: PathBuf },

    #[error("Failed to read manifests under {path}: {source}")]
    ManifestsRead {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("Output path {path} is not writable: {source}")]
    OutputNotWritable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid registry URL '{url}': {reason}")]
    InvalidRegistryUrl { url: String, reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    #[must_use]
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Stable code for machine-readable output.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Io(_) => "MIRROR_IO_ERROR",
            Self::ManifestsNotFound { .. } => "MIRROR_MANIFESTS_NOT_FOUND",
            Self::ManifestsRead { .. } => "MIRROR_MANIFESTS_UNREADABLE",
            Self::OutputNotWritable { .. } => "MIRROR_OUTPUT_NOT_WRITABLE",
            Self::InvalidRegistryUrl { .. } => "MIRROR_REGISTRY_URL_INVALID",
            Self::InvalidConfig(_) => "MIRROR_CONFIG_INVALID",
        }
    }
}
