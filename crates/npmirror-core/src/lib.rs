#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::return_self_not_must_use)]

//! Offline npm registry mirroring.
//!
//! Resolves the transitive dependency closure of a set of manifests against an
//! npm registry and writes the packuments and tarballs of every resolved
//! version to disk in the registry's own layout.

pub mod config;
pub mod error;
pub mod pkg;
pub mod version;

pub use config::{MirrorConfig, RetryPolicy, SuppressionScope};
pub use error::Error;
pub use pkg::{Mirror, MirrorReport};
pub use version::VERSION;
