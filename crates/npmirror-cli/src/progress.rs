//! Terminal progress bar for a mirror run.
//!
//! The bar tracks tarballs: its length is the number of resolved versions and
//! its position the number of tarballs written, found on disk, or failed. The
//! message carries the packument and byte counters.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use npmirror_core::pkg::{Progress, ProgressSnapshot};
use npmirror_util::fmt::human_bytes;
use std::fmt::Write as _;
use std::io::{self, IsTerminal, Write};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::fmt::MakeWriter;

const TICK: Duration = Duration::from_millis(100);

const TEMPLATE: &str = "{prefix:>9.bold} [{wide_bar:.cyan/dim}] {pos}/{len} [{elapsed_precise}] {msg}";

/// A bar drawn on stderr, or a hidden one when disabled or when stderr is not
/// a terminal.
pub fn bar(enabled: bool) -> ProgressBar {
    let target = if enabled && io::stderr().is_terminal() {
        ProgressDrawTarget::stderr()
    } else {
        ProgressDrawTarget::hidden()
    };

    let bar = ProgressBar::with_draw_target(Some(0), target);
    if let Ok(style) = ProgressStyle::with_template(TEMPLATE) {
        bar.set_style(style.progress_chars("##-"));
    }
    bar.set_prefix("Mirroring");
    bar
}

pub fn message(snap: &ProgressSnapshot) -> String {
    let mut msg = format!(
        "{} packuments ({}), {} tarballs ({})",
        snap.packuments,
        human_bytes(snap.packument_bytes),
        snap.tarballs_written,
        human_bytes(snap.tarball_bytes)
    );
    if snap.tarballs_skipped > 0 {
        let _ = write!(msg, ", {} present", snap.tarballs_skipped);
    }
    if snap.failures > 0 {
        let _ = write!(msg, ", {} failed", snap.failures);
    }
    if snap.pending > 0 {
        let _ = write!(msg, ", {} queued", snap.pending);
    }
    msg
}

pub fn render(bar: &ProgressBar, snap: &ProgressSnapshot) {
    bar.set_length(snap.resolved);
    bar.set_position(snap.tarballs_done());
    bar.set_message(message(snap));
}

/// Redraw from `progress` until the task is aborted.
pub async fn follow(bar: ProgressBar, progress: Arc<Progress>) {
    let mut ticker = tokio::time::interval(TICK);
    loop {
        ticker.tick().await;
        render(&bar, &progress.snapshot());
    }
}

/// Log writer that clears the bar around each write so lines never tear it.
#[derive(Clone)]
pub struct LogWriter(ProgressBar);

impl LogWriter {
    pub fn new(bar: ProgressBar) -> Self {
        Self(bar)
    }
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.suspend(|| io::stderr().write(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()
    }
}

impl<'a> MakeWriter<'a> for LogWriter {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
