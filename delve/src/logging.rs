//! Diagnostic tracing for research runs.
//!
//! Tracing is for debugging only and goes to stderr. The research record
//! itself (state file, event log, collaborator transcripts) lives under
//! `.delve/runs/<run-id>/` and is written regardless of `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when `RUST_LOG` is unset.
fn default_directive(verbose: bool) -> &'static str {
    if verbose { "warn,delve=info" } else { "warn" }
}

/// Install the global subscriber: `RUST_LOG` wins, else `warn`
/// (`delve=info` with `--verbose`). Compact output on stderr.
///
/// ```bash
/// RUST_LOG=delve=debug delve run --objective "..."
/// ```
pub fn init(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
