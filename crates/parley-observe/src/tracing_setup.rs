//! Tracing subscriber initialization with structured logging.
//!
//! # Usage
//!
//! ```no_run
//! use parley_types::config::LogFormat;
//!
//! // Human-readable output at `info`, overridable with RUST_LOG
//! parley_observe::tracing_setup::init_tracing("info", LogFormat::Pretty).unwrap();
//! ```

use parley_types::config::LogFormat;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Build the level filter: `RUST_LOG` wins, otherwise `level`.
///
/// An unparseable `level` falls back to `info`.
pub fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// A minimal stderr subscriber at `warn`, for the window before the
/// configured one is installed (config loading runs inside it).
pub fn bootstrap_subscriber() -> impl tracing::Subscriber + Send + Sync + 'static {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("warn"))
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish()
}

/// Initialize the global tracing subscriber.
///
/// - `Pretty` installs the `fmt` layer with target visibility and span
///   close timing, written to stderr so command output on stdout stays clean.
/// - `Json` emits one JSON object per event, for log shipping.
///
/// # Errors
///
/// Returns an error if the global subscriber has already been set.
pub fn init_tracing(level: &str, format: LogFormat) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = build_filter(level);

    match format {
        LogFormat::Pretty => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_span_events(FmtSpan::CLOSE)
                .with_writer(std::io::stderr);
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer)
                .try_init()?;
        }
        LogFormat::Json => {
            let json_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_writer(std::io::stderr);
            tracing_subscriber::registry()
                .with(env_filter)
                .with(json_layer)
                .try_init()?;
        }
    }

    Ok(())
}
