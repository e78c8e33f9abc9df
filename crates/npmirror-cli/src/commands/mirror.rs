use crate::progress;
use indicatif::ProgressBar;
use miette::{IntoDiagnostic, Result};
use npmirror_core::config::default_concurrency;
use npmirror_core::pkg::{
    load_manifests, load_npmrc_files, HttpRegistry, ManifestIssue, Mirror, MirrorReport, NpmrcConfig,
    Registry, DEFAULT_REGISTRY,
};
use npmirror_core::{Error, MirrorConfig, RetryPolicy, SuppressionScope};
use npmirror_util::fmt::human_bytes;
use serde::Serialize;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Exit code when every entry was mirrored.
pub const EXIT_OK: i32 = 0;
/// Exit code when some entries failed.
pub const EXIT_FAILURES: i32 = 1;
/// Exit code for configuration errors.
pub const EXIT_CONFIG: i32 = 2;
/// Exit code after Ctrl-C.
pub const EXIT_INTERRUPTED: i32 = 130;

#[derive(Debug, Clone)]
pub struct MirrorArgs {
    pub manifests_path: PathBuf,
    pub output: PathBuf,
    pub registry_url: Option<String>,
    pub concurrency: Option<usize>,
    pub greedy: bool,
    pub include_dev: bool,
    pub include_peer: bool,
    pub include_optional: bool,
    pub suppression_scope: SuppressionScope,
    pub retries: u32,
    pub verify_integrity: bool,
    pub json: bool,
}

#[derive(Serialize)]
struct JsonSummary<'a> {
    ok: bool,
    registry: &'a str,
    output: String,
    manifests: usize,
    manifest_issues: &'a [ManifestIssue],
    /// Tarballs on disk after the run: written now or already present.
    mirrored: usize,
    #[serde(flatten)]
    report: &'a MirrorReport,
}

#[derive(Serialize)]
struct JsonError<'a> {
    ok: bool,
    error: JsonErrorBody<'a>,
}

#[derive(Serialize)]
struct JsonErrorBody<'a> {
    code: &'a str,
    message: String,
}

/// Registry URL: flag or env first, then `.npmrc`, then the public registry.
fn pick_registry_url(explicit: Option<&str>, npmrc: &NpmrcConfig) -> String {
    explicit
        .map(String::from)
        .or_else(|| npmrc.registry.as_ref().map(ToString::to_string))
        .unwrap_or_else(|| DEFAULT_REGISTRY.to_string())
}

fn build_config(args: &MirrorArgs, registry_url: String) -> MirrorConfig {
    MirrorConfig::new(&args.output)
        .with_registry_url(registry_url)
        .with_concurrency(args.concurrency.unwrap_or_else(default_concurrency))
        .with_greedy(args.greedy)
        .with_categories(args.include_dev, args.include_peer, args.include_optional)
        .with_suppression_scope(args.suppression_scope)
        .with_verify_integrity(args.verify_integrity)
        .with_retry(RetryPolicy {
            max_attempts: args.retries.saturating_add(1),
            ..RetryPolicy::default()
        })
}

fn report_fatal(err: &Error, json: bool) -> Result<i32> {
    if json {
        let body = JsonError {
            ok: false,
            error: JsonErrorBody {
                code: err.code(),
                message: err.to_string(),
            },
        };
        println!("{}", serde_json::to_string_pretty(&body).into_diagnostic()?);
    } else {
        eprintln!("error: {err}");
    }
    Ok(EXIT_CONFIG)
}

/// Run a mirror and print the summary. Returns the process exit code.
pub fn run(args: &MirrorArgs, bar: &ProgressBar) -> Result<i32> {
    let cwd = std::env::current_dir().into_diagnostic()?;
    let npmrc = load_npmrc_files(&cwd);
    let registry_url = pick_registry_url(args.registry_url.as_deref(), &npmrc);

    let config = build_config(args, registry_url.clone());
    if let Err(err) = config.validate() {
        return report_fatal(&err, args.json);
    }

    let manifests = match load_manifests(&args.manifests_path) {
        Ok(manifests) => manifests,
        Err(err) => return report_fatal(&err, args.json),
    };
    for issue in &manifests.issues {
        warn!(path = %issue.path.display(), "{}", issue.message);
    }
    info!(
        files = manifests.files,
        specs = manifests.specs.len(),
        registry = %registry_url,
        "Loaded manifests"
    );

    let registry = match HttpRegistry::new(&registry_url) {
        Ok(registry) => registry.with_npmrc(&npmrc),
        Err(err) => {
            let err = Error::InvalidRegistryUrl {
                url: registry_url,
                reason: err.message().to_string(),
            };
            return report_fatal(&err, args.json);
        }
    };
    let registry: Arc<dyn Registry> = Arc::new(registry);
    let mirror = Mirror::new(config, registry);

    let runtime = tokio::runtime::Runtime::new().into_diagnostic()?;
    let follower = runtime.spawn(progress::follow(bar.clone(), mirror.progress()));
    let outcome = runtime.block_on(async {
        tokio::select! {
            result = mirror.run(manifests.specs.clone()) => Some(result),
            _ = tokio::signal::ctrl_c() => None,
        }
    });
    follower.abort();
    progress::render(bar, &mirror.progress().snapshot());
    bar.finish_and_clear();

    let report = match outcome {
        Some(Ok(report)) => report,
        Some(Err(err)) => return report_fatal(&err, args.json),
        None => {
            warn!("Interrupted; completed tarballs are kept and the next run resumes");
            return Ok(EXIT_INTERRUPTED);
        }
    };

    if args.json {
        let summary = JsonSummary {
            ok: report.is_success(),
            registry: &registry_url,
            output: args.output.display().to_string(),
            manifests: manifests.files,
            manifest_issues: &manifests.issues,
            mirrored: report.tarballs_written + report.tarballs_skipped,
            report: &report,
        };
        println!("{}", serde_json::to_string_pretty(&summary).into_diagnostic()?);
    } else {
        print_human(&report, &manifests.issues, args).into_diagnostic()?;
    }

    Ok(if report.is_success() {
        EXIT_OK
    } else {
        EXIT_FAILURES
    })
}

fn print_human(report: &MirrorReport, issues: &[ManifestIssue], args: &MirrorArgs) -> io::Result<()> {
    let mut out = io::stdout().lock();

    let mirrored = report.tarballs_written + report.tarballs_skipped;
    writeln!(
        out,
        "Resolved {} package versions into {}",
        report.resolved.len(),
        args.output.display()
    )?;
    writeln!(
        out,
        "  mirrored: {} tarballs ({} written, {}; {} already present)",
        mirrored,
        report.tarballs_written,
        human_bytes(report.bytes_written),
        report.tarballs_skipped
    )?;
    writeln!(out, "  failed:   {}", report.failures.len())?;
    writeln!(out, "  metadata: {} documents", report.metadata_written)?;
    if report.seeds_excluded > 0 {
        writeln!(out, "  excluded: {} manifest entries", report.seeds_excluded)?;
    }
    writeln!(out, "  time:     {:.1}s", report.elapsed_ms as f64 / 1000.0)?;

    if !issues.is_empty() {
        writeln!(out, "\nManifest issues ({}):", issues.len())?;
        for issue in issues {
            writeln!(out, "  {}: {}", issue.path.display(), issue.message)?;
        }
    }

    if !report.warnings.is_empty() {
        writeln!(out, "\nSkipped ({}):", report.warnings.len())?;
        for skip in &report.warnings {
            writeln!(out, "  {skip}")?;
        }
    }

    if !report.failures.is_empty() {
        writeln!(out, "\nFailed ({}):", report.failures.len())?;
        for failure in &report.failures {
            writeln!(out, "  {failure}")?;
        }
    }

    Ok(())
}
