//! Tracing subscriber setup for the `fpmerge` binary.
//!
//! Controlled by two environment variables:
//! - `FPMERGE_LOG`: an `EnvFilter` directive (default `warn`, or `debug`
//!   with `-v`).
//! - `FPMERGE_LOG_FORMAT`: `json` for JSON events with span close timings,
//!   anything else for the compact human format.
//!
//! Everything goes to stderr so stdout stays a clean report stream.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

/// Filter variable.
pub const LOG_ENV: &str = "FPMERGE_LOG";

/// Format variable.
pub const LOG_FORMAT_ENV: &str = "FPMERGE_LOG_FORMAT";

/// Log output format.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    fn from_env() -> Self {
        match std::env::var(LOG_FORMAT_ENV) {
            Ok(v) if v.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Text,
        }
    }
}

/// Default directive when `FPMERGE_LOG` is unset.
#[must_use]
pub const fn default_directive(verbose: bool) -> &'static str {
    if verbose { "debug" } else { "warn" }
}

/// Install the global subscriber. Safe to call more than once; later calls
/// are ignored.
pub fn init(verbose: bool) {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));
    let registry = tracing_subscriber::registry().with(filter);

    let result = match LogFormat::from_env() {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init(),
        LogFormat::Text => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
    };
    // Already installed (tests, embedding): keep the existing one.
    let _ = result;
}
