//! Shared tracing/logging initialization.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Build the env-filter, falling back to `default_filter` when `RUST_LOG` is
/// unset or unparsable.
fn env_filter(default_filter: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter))
}

/// Initialise the global tracing subscriber.
///
/// * `default_filter` -- filter used when `RUST_LOG` is not set
///   (e.g. `"hivelink_server=info,tower_http=info"`).
/// * `log_json` -- emit one JSON object per event instead of the
///   human-readable format. Field names (`user_id`, `sponsorship_id`, ...)
///   are preserved as top-level keys for log aggregation.
pub fn init_tracing(default_filter: &str, log_json: bool) {
    let (json, pretty) = if log_json {
        (Some(fmt::layer().json().flatten_event(true)), None)
    } else {
        (None, Some(fmt::layer().with_target(true)))
    };

    tracing_subscriber::registry()
        .with(env_filter(default_filter))
        .with(json)
        .with(pretty)
        .init();
}

