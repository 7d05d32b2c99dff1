//! # relay-logging
//!
//! Installs the process-wide `tracing` subscriber. `RUST_LOG` takes
//! precedence over the configured level; output is human-readable text or
//! JSON lines depending on [`LoggingSettings::json`].

#![deny(unsafe_code)]

use relay_settings::LoggingSettings;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Build the filter: `RUST_LOG` if set and valid, else the configured level.
fn build_filter(settings: &LoggingSettings) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| fallback_filter(&settings.level))
}

fn fallback_filter(level: &str) -> EnvFilter {
    EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize logging. Call once at startup.
///
/// Returns `false` if a global subscriber was already installed (e.g. by a
/// test harness), in which case the existing one is left in place.
pub fn init_subscriber(settings: &LoggingSettings) -> bool {
    let filter = build_filter(settings);

    let fmt_layer = if settings.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .with_filter(filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_filter(filter)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .try_init()
        .is_ok()
}
