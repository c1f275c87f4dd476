//! Diagnostic logging setup.
//!
//! `STUBSMITH_LOG` takes an `EnvFilter` directive (`debug`,
//! `stubsmith::extract=trace`, ...). Without it the level is `warn`, or
//! `debug` with `--verbose`. Set `STUBSMITH_LOG_STYLE=full` for timestamps
//! and span timing.

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "STUBSMITH_LOG";
const LOG_STYLE_ENV: &str = "STUBSMITH_LOG_STYLE";

struct NoTimestamp;

impl FormatTime for NoTimestamp {
    fn format_time(&self, _w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        Ok(())
    }
}

/// The filter used when the environment does not set one.
pub fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "stubsmith=debug"
    } else {
        "warn"
    }
}

/// Install the stderr subscriber. Safe to call more than once; only the
/// first call takes effect.
pub fn init(verbose: bool) {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));
    let full = std::env::var(LOG_STYLE_ENV).map(|s| s == "full").unwrap_or(false);

    let result = if full {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
            .with_writer(std::io::stderr)
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_timer(NoTimestamp)
            .with_writer(std::io::stderr)
            .try_init()
    };
    if result.is_ok() {
        tracing::debug!("tracing initialized");
    }
}
