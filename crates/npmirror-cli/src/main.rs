#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::cast_precision_loss)]

mod commands;
mod logging;
mod progress;

use clap::{Parser, ValueEnum};
use commands::mirror::MirrorArgs;
use miette::Result;
use npmirror_core::pkg::REGISTRY_ENV;
use npmirror_core::SuppressionScope;
use std::path::PathBuf;
use tracing::{debug, warn};

#[derive(Parser, Debug)]
#[command(name = "npmirror")]
#[command(author, version, about = "Build an offline mirror of an npm registry from a set of manifests", long_about = None)]
struct Cli {
    /// Directory containing the package.json files to mirror
    #[arg(short, long, env = "NPMIRROR_MANIFESTS_PATH", default_value = "./manifests", value_name = "DIR")]
    manifests_path: PathBuf,

    /// Directory the mirror is written to
    #[arg(short, long, env = "NPMIRROR_OUTPUT", default_value = "./output", value_name = "DIR")]
    output: PathBuf,

    /// Upstream registry (default: .npmrc `registry=`, then registry.npmjs.org)
    #[arg(short, long, env = REGISTRY_ENV, value_name = "URL")]
    registry_url: Option<String>,

    /// Number of concurrent workers (default: 2 x CPU count)
    #[arg(short = 'j', long, value_name = "N")]
    concurrency: Option<usize>,

    /// Mirror every version matching each range, not just the highest
    #[arg(short, long)]
    greedy: bool,

    /// Skip devDependencies
    #[arg(long)]
    no_dev: bool,

    /// Skip peerDependencies
    #[arg(long)]
    no_peer: bool,

    /// Skip optionalDependencies
    #[arg(long)]
    no_optional: bool,

    /// Where the --no-* flags apply
    #[arg(long, value_enum, default_value_t = ScopeArg::EveryDepth)]
    suppression_scope: ScopeArg,

    /// Retries for a failed download before the entry is given up
    #[arg(long, default_value_t = 3, value_name = "N")]
    retries: u32,

    /// Do not check tarballs against their published integrity hash
    #[arg(long)]
    no_verify_integrity: bool,

    /// Increase logging verbosity (-v for DEBUG, -vv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Emit JSON formatted output (stable, machine-readable)
    #[arg(long)]
    json: bool,

    /// Do not draw the progress bar
    #[arg(long)]
    no_progress: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ScopeArg {
    /// Apply at every depth of the graph
    EveryDepth,
    /// Apply to manifest entries only
    RootOnly,
}

impl From<ScopeArg> for SuppressionScope {
    fn from(arg: ScopeArg) -> Self {
        match arg {
            ScopeArg::EveryDepth => Self::EveryDepth,
            ScopeArg::RootOnly => Self::RootOnly,
        }
    }
}

impl Cli {
    fn mirror_args(&self) -> MirrorArgs {
        MirrorArgs {
            manifests_path: self.manifests_path.clone(),
            output: self.output.clone(),
            registry_url: self.registry_url.clone(),
            concurrency: self.concurrency,
            greedy: self.greedy,
            include_dev: !self.no_dev,
            include_peer: !self.no_peer,
            include_optional: !self.no_optional,
            suppression_scope: self.suppression_scope.into(),
            retries: self.retries,
            verify_integrity: !self.no_verify_integrity,
            json: self.json,
        }
    }
}

fn main() -> Result<()> {
    // Before parsing, so `.env` can supply the `NPMIRROR_*` flag defaults.
    let dotenv = dotenvy::dotenv();
    let cli = Cli::parse();

    let bar = progress::bar(!cli.json && !cli.no_progress);
    logging::init(cli.verbose, cli.json, progress::LogWriter::new(bar.clone()));
    match dotenv {
        Ok(path) => debug!(path = %path.display(), "Loaded .env"),
        Err(err) if !err.not_found() => warn!(error = %err, "Ignoring unreadable .env"),
        Err(_) => {}
    }

    let code = commands::mirror::run(&cli.mirror_args(), &bar)?;
    std::process::exit(code);
}
