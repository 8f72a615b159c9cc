//! Tracing setup for the CAF binaries.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Initialise the global tracing subscriber.
///
/// The default filter runs the CAF crates at `level` and everything else
/// at WARN, so third-party chatter stays out of calibration run logs.
/// `RUST_LOG`, when set, replaces the whole filter. `json` switches to
/// newline-delimited JSON lines for log aggregation.
///
/// Safe to call more than once: the global subscriber can only be set
/// once per process and later calls are ignored.
pub fn init_tracing(json: bool, level: Level) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false).json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact().with_target(false))
            .try_init()
            .ok();
    }
}

fn default_directives(level: Level) -> String {
    let level = level.as_str().to_lowercase();
    format!("warn,caf_domain={level},caf_state={level},caf_core={level},caf_cli={level}")
}
