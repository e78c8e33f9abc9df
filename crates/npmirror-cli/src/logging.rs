//! Logging setup. Only the binary installs a subscriber; the library crates
//! just emit `tracing` events.

use crate::progress::LogWriter;
use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global subscriber. Logs always go to stderr, through `writer`
/// so they interleave with the progress bar, and stdout stays free for the
/// run summary.
///
/// `verbosity`: 0 = INFO, 1 = DEBUG, 2+ = TRACE. `RUST_LOG` is honoured for
/// other crates; `npmirror_*` targets follow `verbosity`.
pub fn init(verbosity: u8, json: bool, writer: LogWriter) {
    let level = match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let mut filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    for target in ["npmirror", "npmirror_core", "npmirror_cli"] {
        if let Ok(directive) = format!("{target}={level}").parse() {
            filter = filter.add_directive(directive);
        }
    }

    let registry = tracing_subscriber::registry().with(filter);

    // A second init (tests) keeps the first subscriber.
    let _ = if json {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_writer(writer),
            )
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(writer))
            .try_init()
    };
}
